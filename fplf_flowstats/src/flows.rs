//! Bidirectional flow aggregation. Packets group under a canonical
//! unordered 5-tuple; the "forward" direction is whichever direction
//! the first observed packet travelled.

use fplf_proto::CapturedPacket;

/// Canonical unordered bidirectional flow key. The (ip, port)
/// endpoint pairs are stored in lexicographic order so both
/// directions of a conversation land on the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    pub ip_a: String,
    pub port_a: u16,
    pub ip_b: String,
    pub port_b: u16,
    pub protocol: String,
}

impl FlowKey {
    /// Build the canonical key for a packet. Returns `None` for
    /// packets without L3 addressing.
    pub fn from_packet(packet: &CapturedPacket) -> Option<FlowKey> {
        let src_ip = packet.src_ip.as_deref()?;
        let dst_ip = packet.dst_ip.as_deref()?;
        let src = (src_ip, packet.src_port);
        let dst = (dst_ip, packet.dst_port);
        let (a, b) = if src <= dst { (src, dst) } else { (dst, src) };
        Some(FlowKey {
            ip_a: a.0.to_string(),
            port_a: a.1,
            ip_b: b.0.to_string(),
            port_b: b.1,
            protocol: packet.protocol.clone(),
        })
    }
}

/// Running statistics for one bidirectional flow.
#[derive(Debug, Default, Clone)]
pub struct FlowAccumulator {
    /// Endpoint that sent the first observed packet.
    first_src: Option<(String, u16)>,
    first_dst: Option<(String, u16)>,

    pub timestamps: Vec<f64>,
    pub forward_timestamps: Vec<f64>,
    pub backward_timestamps: Vec<f64>,
    pub sizes: Vec<f64>,
    pub forward_sizes: Vec<f64>,
    pub backward_sizes: Vec<f64>,

    pub syn_count: u32,
    pub ack_count: u32,
    pub fin_count: u32,
    pub rst_count: u32,
    pub psh_count: u32,
    tcp_window_sum: f64,
    tcp_window_samples: u32,
    ttl_sum: f64,
    tos_sum: f64,
}

impl FlowAccumulator {
    /// Fold one packet in. The first packet fixes the forward
    /// direction and the identity columns.
    pub fn update(&mut self, packet: &CapturedPacket) {
        let src = (
            packet.src_ip.clone().unwrap_or_default(),
            packet.src_port,
        );
        if self.first_src.is_none() {
            self.first_src = Some(src.clone());
            self.first_dst = Some((
                packet.dst_ip.clone().unwrap_or_default(),
                packet.dst_port,
            ));
        }
        let forward = self.first_src.as_ref() == Some(&src);

        let size = packet.length as f64;
        self.timestamps.push(packet.timestamp);
        self.sizes.push(size);
        if forward {
            self.forward_timestamps.push(packet.timestamp);
            self.forward_sizes.push(size);
        } else {
            self.backward_timestamps.push(packet.timestamp);
            self.backward_sizes.push(size);
        }

        if packet.protocol == "TCP" {
            let flags = packet.tcp_flags;
            self.fin_count += (flags & 0x01 != 0) as u32;
            self.syn_count += (flags & 0x02 != 0) as u32;
            self.rst_count += (flags & 0x04 != 0) as u32;
            self.psh_count += (flags & 0x08 != 0) as u32;
            self.ack_count += (flags & 0x10 != 0) as u32;
            self.tcp_window_sum += packet.window as f64;
            self.tcp_window_samples += 1;
        }
        self.ttl_sum += packet.ttl as f64;
        self.tos_sum += packet.tos as f64;
    }

    /// Identity of the forward direction: (src_ip, src_port,
    /// dst_ip, dst_port).
    pub fn endpoints(&self) -> (String, u16, String, u16) {
        let (src_ip, src_port) = self.first_src.clone().unwrap_or_default();
        let (dst_ip, dst_port) = self.first_dst.clone().unwrap_or_default();
        (src_ip, src_port, dst_ip, dst_port)
    }

    pub fn total_packets(&self) -> usize {
        self.timestamps.len()
    }

    pub fn mean_tcp_window(&self) -> f64 {
        if self.tcp_window_samples == 0 {
            0.0
        } else {
            self.tcp_window_sum / self.tcp_window_samples as f64
        }
    }

    pub fn mean_ttl(&self) -> f64 {
        if self.timestamps.is_empty() {
            0.0
        } else {
            self.ttl_sum / self.timestamps.len() as f64
        }
    }

    pub fn mean_tos(&self) -> f64 {
        if self.timestamps.is_empty() {
            0.0
        } else {
            self.tos_sum / self.timestamps.len() as f64
        }
    }
}

/// Mean of a sample, zero for an empty one.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation, zero below two samples.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Consecutive differences of a (sorted) timestamp series.
pub fn inter_arrival_times(timestamps: &[f64]) -> Vec<f64> {
    timestamps.windows(2).map(|w| w[1] - w[0]).collect()
}
