//! The packet capture ring and its snapshot writer. One producer (the
//! compute worker handling PACKET_IN) and one consumer (the flush
//! task). The producer never blocks: a full ring sheds its oldest
//! half and counts the loss.

use fplf_config::CaptureConfig;
use fplf_proto::CapturedPacket;
use fplf_utils::unix_time::unix_now;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::{info, warn};

pub struct CaptureBuffer {
    ring: Mutex<VecDeque<CapturedPacket>>,
    capacity: usize,
    drops: AtomicU64,
    /// Woken when the ring reaches capacity, so the flusher runs
    /// ahead of its timer.
    pub flush_signal: Notify,
    /// Filenames must carry a strictly increasing timestamp so the
    /// offline pipeline can ingest snapshots in order.
    last_stamp: Mutex<u64>,
}

impl CaptureBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            drops: AtomicU64::new(0),
            flush_signal: Notify::new(),
            last_stamp: Mutex::new(0),
        }
    }

    /// Append a record. Signals the flusher when the ring is full;
    /// sheds the oldest half if the flusher has not caught up.
    pub fn push(&self, record: CapturedPacket) {
        let mut ring = self.ring.lock();
        if ring.len() >= self.capacity {
            let shed = self.capacity / 2;
            ring.drain(..shed);
            self.drops.fetch_add(shed as u64, Ordering::Relaxed);
            warn!("Capture ring overflow: dropped {shed} oldest records");
        }
        ring.push_back(record);
        if ring.len() >= self.capacity {
            self.flush_signal.notify_one();
        }
    }

    /// Number of records shed under back-pressure.
    pub fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }

    /// Swap the ring for an empty one and return the drained batch.
    pub fn drain(&self) -> Vec<CapturedPacket> {
        let mut ring = self.ring.lock();
        let drained: Vec<CapturedPacket> = ring.drain(..).collect();
        drained
    }

    /// Drain the ring and write one snapshot file into `directory`.
    /// Snapshot files are written whole and never appended to again.
    pub fn flush_to(&self, directory: &Path) -> std::io::Result<Option<PathBuf>> {
        let batch = self.drain();
        if batch.is_empty() {
            return Ok(None);
        }

        let stamp = {
            let mut last = self.last_stamp.lock();
            let now = unix_now().unwrap_or(*last + 1);
            *last = now.max(*last + 1);
            *last
        };

        std::fs::create_dir_all(directory)?;
        let path = directory.join(format!("captured_packets_{stamp}.json"));
        let json = serde_json::to_string(&batch)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, json)?;
        info!("Saved {} packets to {}", batch.len(), path.display());
        Ok(Some(path))
    }
}

/// Remove snapshots beyond the configured count or age.
pub fn rotate_snapshots(directory: &Path, config: &CaptureConfig) {
    let Ok(entries) = std::fs::read_dir(directory) else {
        return;
    };
    let mut snapshots: Vec<(u64, PathBuf)> = entries
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            let name = path.file_name()?.to_str()?;
            let stamp: u64 = name
                .strip_prefix("captured_packets_")?
                .strip_suffix(".json")?
                .parse()
                .ok()?;
            Some((stamp, path))
        })
        .collect();
    snapshots.sort_unstable_by_key(|(stamp, _)| *stamp);

    let now = unix_now().unwrap_or(0);
    let cutoff = now.saturating_sub(config.max_snapshot_age_secs);
    let mut remove_until = snapshots
        .iter()
        .take_while(|(stamp, _)| *stamp < cutoff)
        .count();
    if snapshots.len() - remove_until > config.max_snapshot_files {
        remove_until = snapshots.len() - config.max_snapshot_files;
    }
    for (_, path) in snapshots.drain(..remove_until) {
        if std::fs::remove_file(&path).is_ok() {
            info!("Rotated out old snapshot {}", path.display());
        }
    }
}

/// The flush task: wakes on the period timer or on a ring-full
/// signal, writes the batch, then rotates old files.
pub async fn run_flusher(
    buffer: std::sync::Arc<CaptureBuffer>,
    directory: PathBuf,
    config: CaptureConfig,
) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
        config.flush_period_secs.max(1),
    ));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = buffer.flush_signal.notified() => {}
        }
        if let Err(e) = buffer.flush_to(&directory) {
            warn!("Unable to write packet snapshot: {e}");
        }
        rotate_snapshots(&directory, &config);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(n: u16) -> CapturedPacket {
        CapturedPacket {
            timestamp: 1_700_000_000.0 + n as f64,
            dpid: 1,
            in_port: 1,
            eth_src: "00:00:00:00:00:01".to_string(),
            eth_dst: "00:00:00:00:00:02".to_string(),
            protocol: "TCP".to_string(),
            src_ip: Some("10.0.0.1".to_string()),
            dst_ip: Some("10.0.0.2".to_string()),
            src_port: 40_000,
            dst_port: n,
            length: 64,
            tcp_flags: 0x10,
            ttl: 64,
            tos: 0,
            window: 8192,
        }
    }

    #[test]
    fn size_triggered_flush_writes_full_ring() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = CaptureBuffer::new(10_000);
        for i in 0..10_000u32 {
            buffer.push(record((i % 65_536) as u16));
        }
        assert_eq!(buffer.len(), 10_000);

        let path = buffer.flush_to(dir.path()).unwrap().unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        let records: Vec<CapturedPacket> = serde_json::from_str(&body).unwrap();
        assert_eq!(records.len(), 10_000);
        assert_eq!(buffer.drop_count(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn surplus_lands_in_second_file() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = CaptureBuffer::new(10_000);
        for i in 0..10_000u32 {
            buffer.push(record((i % 65_536) as u16));
        }
        let first = buffer.flush_to(dir.path()).unwrap().unwrap();
        for i in 0..137u32 {
            buffer.push(record(i as u16));
        }
        let second = buffer.flush_to(dir.path()).unwrap().unwrap();
        assert_ne!(first, second);
        let body = std::fs::read_to_string(&second).unwrap();
        let records: Vec<CapturedPacket> = serde_json::from_str(&body).unwrap();
        assert_eq!(records.len(), 137);
        assert_eq!(buffer.drop_count(), 0);
    }

    #[test]
    fn overflow_sheds_oldest_half() {
        let buffer = CaptureBuffer::new(100);
        for i in 0..101u32 {
            buffer.push(record(i as u16));
        }
        assert_eq!(buffer.drop_count(), 50);
        let batch = buffer.drain();
        assert_eq!(batch.len(), 51);
        // The oldest records went first.
        assert_eq!(batch[0].dst_port, 50);
    }

    #[test]
    fn empty_flush_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = CaptureBuffer::new(16);
        assert!(buffer.flush_to(dir.path()).unwrap().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn snapshot_filenames_strictly_increase() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = CaptureBuffer::new(16);
        buffer.push(record(1));
        let a = buffer.flush_to(dir.path()).unwrap().unwrap();
        buffer.push(record(2));
        let b = buffer.flush_to(dir.path()).unwrap().unwrap();
        let stamp = |p: &PathBuf| -> u64 {
            p.file_name()
                .unwrap()
                .to_str()
                .unwrap()
                .strip_prefix("captured_packets_")
                .unwrap()
                .strip_suffix(".json")
                .unwrap()
                .parse()
                .unwrap()
        };
        assert!(stamp(&b) > stamp(&a));
    }

    #[test]
    fn rotation_keeps_newest_files() {
        let dir = tempfile::tempdir().unwrap();
        for stamp in 1..=5u64 {
            std::fs::write(
                dir.path().join(format!("captured_packets_{stamp}.json")),
                "[]",
            )
            .unwrap();
        }
        let config = CaptureConfig {
            ring_capacity: 16,
            flush_period_secs: 30,
            max_snapshot_files: 2,
            max_snapshot_age_secs: u64::MAX,
        };
        rotate_snapshots(dir.path(), &config);
        let mut left: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec!["captured_packets_4.json", "captured_packets_5.json"]
        );
    }
}
