//! Statistical feature rows, one per bidirectional flow, and the CSV
//! they are persisted to. Extraction is deterministic: the same
//! snapshots in the same order produce byte-identical output.

use crate::flows::{inter_arrival_times, mean, std_dev, FlowAccumulator, FlowKey};
use fplf_proto::CapturedPacket;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// One feature row. Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    // Identity columns (not model features).
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: String,

    pub total_packets: u64,
    pub forward_packets: u64,
    pub backward_packets: u64,
    pub total_bytes: u64,
    pub forward_bytes: u64,
    pub backward_bytes: u64,
    pub flow_duration: f64,
    pub packets_per_second: f64,
    pub bytes_per_second: f64,
    pub min_packet_size: f64,
    pub max_packet_size: f64,
    pub mean_packet_size: f64,
    pub std_packet_size: f64,
    pub mean_forward_packet_size: f64,
    pub mean_backward_packet_size: f64,
    pub mean_inter_arrival_time: f64,
    pub std_inter_arrival_time: f64,
    pub min_inter_arrival_time: f64,
    pub max_inter_arrival_time: f64,
    pub forward_iat_mean: f64,
    pub forward_iat_std: f64,
    pub backward_iat_mean: f64,
    pub backward_iat_std: f64,
    pub syn_count: u32,
    pub ack_count: u32,
    pub fin_count: u32,
    pub rst_count: u32,
    pub psh_count: u32,
    pub mean_tcp_window: f64,
    pub mean_ttl: f64,
    pub mean_tos: f64,
}

impl FeatureRow {
    /// Numeric protocol code, matching the training pipeline's
    /// encoding.
    pub fn protocol_code(&self) -> f64 {
        match self.protocol.as_str() {
            "TCP" => 0.0,
            "UDP" => 1.0,
            "ICMP" => 2.0,
            _ => 3.0,
        }
    }

    fn from_accumulator(acc: &FlowAccumulator) -> Self {
        let (src_ip, src_port, dst_ip, dst_port) = acc.endpoints();
        let total_packets = acc.total_packets() as u64;
        let total_bytes: f64 = acc.sizes.iter().sum();
        let forward_bytes: f64 = acc.forward_sizes.iter().sum();
        let backward_bytes: f64 = acc.backward_sizes.iter().sum();

        // Flows with a single packet have no duration and no
        // inter-arrival series; their std/ia columns stay zero.
        let flow_duration = match (acc.timestamps.first(), acc.timestamps.last()) {
            (Some(first), Some(last)) if acc.timestamps.len() > 1 => last - first,
            _ => 0.0,
        };

        let ia = inter_arrival_times(&acc.timestamps);
        let forward_ia = inter_arrival_times(&acc.forward_timestamps);
        let backward_ia = inter_arrival_times(&acc.backward_timestamps);

        let (packets_per_second, bytes_per_second) = if flow_duration > 0.0 {
            (total_packets as f64 / flow_duration, total_bytes / flow_duration)
        } else {
            (0.0, 0.0)
        };

        FeatureRow {
            // The accumulator does not track the protocol; the caller
            // fills it in from the flow key.
            protocol: String::new(),
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            total_packets,
            forward_packets: acc.forward_sizes.len() as u64,
            backward_packets: acc.backward_sizes.len() as u64,
            total_bytes: total_bytes as u64,
            forward_bytes: forward_bytes as u64,
            backward_bytes: backward_bytes as u64,
            flow_duration,
            packets_per_second,
            bytes_per_second,
            min_packet_size: min_or_zero(&acc.sizes),
            max_packet_size: max_or_zero(&acc.sizes),
            mean_packet_size: mean(&acc.sizes),
            std_packet_size: std_dev(&acc.sizes),
            mean_forward_packet_size: mean(&acc.forward_sizes),
            mean_backward_packet_size: mean(&acc.backward_sizes),
            mean_inter_arrival_time: mean(&ia),
            std_inter_arrival_time: std_dev(&ia),
            min_inter_arrival_time: min_or_zero(&ia),
            max_inter_arrival_time: max_or_zero(&ia),
            forward_iat_mean: mean(&forward_ia),
            forward_iat_std: std_dev(&forward_ia),
            backward_iat_mean: mean(&backward_ia),
            backward_iat_std: std_dev(&backward_ia),
            syn_count: acc.syn_count,
            ack_count: acc.ack_count,
            fin_count: acc.fin_count,
            rst_count: acc.rst_count,
            psh_count: acc.psh_count,
            mean_tcp_window: acc.mean_tcp_window(),
            mean_ttl: acc.mean_ttl(),
            mean_tos: acc.mean_tos(),
        }
    }
}

#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("Unable to read snapshot file: {0}")]
    SnapshotRead(PathBuf),
    #[error("Snapshot file is not a packet array: {0}")]
    SnapshotDecode(PathBuf),
    #[error("Unable to write feature CSV: {0}")]
    CsvWrite(String),
}

/// Load snapshot files in timestamp order (the embedded stamp in the
/// filename, falling back to name order) and aggregate their packets
/// into one feature row per bidirectional flow.
pub fn extract_features(paths: &[PathBuf]) -> Result<Vec<FeatureRow>, FeatureError> {
    let mut ordered: Vec<PathBuf> = paths.to_vec();
    ordered.sort_by_key(|p| (snapshot_stamp(p), p.clone()));

    // BTreeMap keeps flow iteration deterministic.
    let mut flows: BTreeMap<FlowKey, FlowAccumulator> = BTreeMap::new();
    let mut discarded = 0usize;
    let mut total = 0usize;

    for path in &ordered {
        let raw = std::fs::read_to_string(path)
            .map_err(|_| FeatureError::SnapshotRead(path.clone()))?;
        let packets: Vec<CapturedPacket> =
            serde_json::from_str(&raw).map_err(|_| FeatureError::SnapshotDecode(path.clone()))?;
        total += packets.len();
        for packet in &packets {
            match FlowKey::from_packet(packet) {
                Some(key) => flows.entry(key).or_default().update(packet),
                None => discarded += 1,
            }
        }
    }

    if discarded > 0 {
        warn!("{discarded} of {total} packets had no flow key and were discarded");
    }
    info!("Aggregated {total} packets into {} bidirectional flows", flows.len());

    Ok(flows
        .iter()
        .map(|(key, acc)| {
            let mut row = FeatureRow::from_accumulator(acc);
            row.protocol = key.protocol.clone();
            row
        })
        .collect())
}

/// Write feature rows as CSV.
pub fn write_feature_csv(rows: &[FeatureRow], path: &Path) -> Result<(), FeatureError> {
    let mut writer = csv::WriterBuilder::new()
        .from_path(path)
        .map_err(|e| FeatureError::CsvWrite(e.to_string()))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| FeatureError::CsvWrite(e.to_string()))?;
    }
    writer
        .flush()
        .map_err(|e| FeatureError::CsvWrite(e.to_string()))?;
    Ok(())
}

/// Read feature rows back from CSV.
pub fn read_feature_csv(path: &Path) -> Result<Vec<FeatureRow>, FeatureError> {
    let mut reader = csv::ReaderBuilder::new()
        .from_path(path)
        .map_err(|_| FeatureError::SnapshotRead(path.to_path_buf()))?;
    let mut rows = Vec::new();
    for row in reader.deserialize::<FeatureRow>() {
        match row {
            Ok(row) => rows.push(row),
            Err(e) => warn!("Skipping malformed feature row: {e}"),
        }
    }
    Ok(rows)
}

fn min_or_zero(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))))
        .unwrap_or(0.0)
}

fn max_or_zero(values: &[f64]) -> f64 {
    values.iter().copied().fold(0.0, f64::max)
}

fn snapshot_stamp(path: &Path) -> u64 {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("captured_packets_"))
        .and_then(|n| n.strip_suffix(".json"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn packet(
        src: &str,
        sport: u16,
        dst: &str,
        dport: u16,
        ts: f64,
        len: u32,
        proto: &str,
    ) -> CapturedPacket {
        CapturedPacket {
            timestamp: ts,
            dpid: 1,
            in_port: 1,
            eth_src: "00:00:00:00:00:01".to_string(),
            eth_dst: "00:00:00:00:00:02".to_string(),
            protocol: proto.to_string(),
            src_ip: Some(src.to_string()),
            dst_ip: Some(dst.to_string()),
            src_port: sport,
            dst_port: dport,
            length: len,
            tcp_flags: if proto == "TCP" { 0x18 } else { 0 },
            ttl: 64,
            tos: 0,
            window: 4096,
        }
    }

    fn snapshot(dir: &Path, stamp: u64, packets: &[CapturedPacket]) -> PathBuf {
        let path = dir.join(format!("captured_packets_{stamp}.json"));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(serde_json::to_string(packets).unwrap().as_bytes())
            .unwrap();
        path
    }

    #[test]
    fn aggregates_one_conversation_into_one_flow() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot(
            dir.path(),
            1,
            &[
                packet("10.0.0.1", 50000, "10.0.0.3", 80, 1.0, 100, "TCP"),
                packet("10.0.0.3", 80, "10.0.0.1", 50000, 1.5, 1400, "TCP"),
                packet("10.0.0.1", 50000, "10.0.0.3", 80, 2.0, 110, "TCP"),
            ],
        );
        let rows = extract_features(&[path]).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.total_packets, 3);
        assert_eq!(row.forward_packets, 2);
        assert_eq!(row.backward_packets, 1);
        assert_eq!(row.total_bytes, 1610);
        assert_eq!(row.forward_bytes, 210);
        assert_eq!(row.backward_bytes, 1400);
        assert!((row.flow_duration - 1.0).abs() < 1e-9);
        assert!((row.packets_per_second - 3.0).abs() < 1e-9);
        assert_eq!(row.src_ip, "10.0.0.1");
        assert_eq!(row.dst_port, 80);
        assert_eq!(row.min_packet_size, 100.0);
        assert_eq!(row.max_packet_size, 1400.0);
        assert!((row.mean_inter_arrival_time - 0.5).abs() < 1e-9);
    }

    #[test]
    fn single_packet_flow_has_zero_spread() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot(
            dir.path(),
            1,
            &[packet("10.0.0.2", 44000, "10.0.0.4", 5004, 1.0, 1200, "UDP")],
        );
        let rows = extract_features(&[path]).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.total_packets, 1);
        assert_eq!(row.flow_duration, 0.0);
        assert_eq!(row.std_packet_size, 0.0);
        assert_eq!(row.mean_inter_arrival_time, 0.0);
        assert_eq!(row.min_inter_arrival_time, 0.0);
        assert_eq!(row.max_inter_arrival_time, 0.0);
        assert_eq!(row.packets_per_second, 0.0);
        assert_eq!(row.protocol, "UDP");
    }

    #[test]
    fn extraction_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            snapshot(
                dir.path(),
                2,
                &[
                    packet("10.0.0.1", 50000, "10.0.0.3", 80, 5.0, 200, "TCP"),
                    packet("10.0.0.2", 44000, "10.0.0.4", 5004, 5.5, 1200, "UDP"),
                ],
            ),
            snapshot(
                dir.path(),
                1,
                &[packet("10.0.0.1", 50000, "10.0.0.3", 80, 1.0, 100, "TCP")],
            ),
        ];

        let out_a = dir.path().join("a.csv");
        let out_b = dir.path().join("b.csv");
        write_feature_csv(&extract_features(&paths).unwrap(), &out_a).unwrap();
        // Input order must not matter: files sort by their stamp.
        let reversed: Vec<PathBuf> = paths.iter().rev().cloned().collect();
        write_feature_csv(&extract_features(&reversed).unwrap(), &out_b).unwrap();

        assert_eq!(
            std::fs::read_to_string(out_a).unwrap(),
            std::fs::read_to_string(out_b).unwrap()
        );
    }

    #[test]
    fn snapshots_merge_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            snapshot(
                dir.path(),
                1,
                &[packet("10.0.0.1", 50000, "10.0.0.3", 80, 1.0, 100, "TCP")],
            ),
            snapshot(
                dir.path(),
                2,
                &[packet("10.0.0.3", 80, "10.0.0.1", 50000, 2.0, 1400, "TCP")],
            ),
        ];
        let rows = extract_features(&paths).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_packets, 2);
        // The first packet in stamp order fixes the direction.
        assert_eq!(rows[0].src_ip, "10.0.0.1");
    }

    #[test]
    fn csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot(
            dir.path(),
            1,
            &[
                packet("10.0.0.1", 50000, "10.0.0.3", 80, 1.0, 100, "TCP"),
                packet("10.0.0.3", 80, "10.0.0.1", 50000, 1.5, 1400, "TCP"),
            ],
        );
        let rows = extract_features(&[path]).unwrap();
        let csv_path = dir.path().join("features.csv");
        write_feature_csv(&rows, &csv_path).unwrap();
        let back = read_feature_csv(&csv_path).unwrap();
        assert_eq!(back, rows);
    }
}
