//! The capture snapshot record. This is the on-disk interface between
//! the controller's capture flusher and the offline pipeline: snapshot
//! files are JSON arrays of these records.

use crate::packet::ParsedPacket;
use serde::{Deserialize, Serialize};

/// One captured packet as written to `captured_packets_<unix_ts>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapturedPacket {
    pub timestamp: f64,
    pub dpid: u64,
    pub in_port: u32,
    pub eth_src: String,
    pub eth_dst: String,
    pub protocol: String,
    pub src_ip: Option<String>,
    pub dst_ip: Option<String>,
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u32,
    pub tcp_flags: u8,
    pub ttl: u8,
    pub tos: u8,
    pub window: u16,
}

impl CapturedPacket {
    /// Build a record from a parsed PACKET_IN payload.
    pub fn from_parsed(timestamp: f64, dpid: u64, in_port: u32, packet: &ParsedPacket) -> Self {
        let (src_ip, dst_ip, ttl, tos) = match packet.ipv4 {
            Some(ip) => (
                Some(ip.src.to_string()),
                Some(ip.dst.to_string()),
                ip.ttl,
                ip.tos,
            ),
            None => (None, None, 0, 0),
        };
        Self {
            timestamp,
            dpid,
            in_port,
            eth_src: packet.eth_src.to_string(),
            eth_dst: packet.eth_dst.to_string(),
            protocol: packet.protocol_label().to_string(),
            src_ip,
            dst_ip,
            src_port: packet.l4.src_port,
            dst_port: packet.l4.dst_port,
            length: packet.length as u32,
            tcp_flags: packet.l4.tcp_flags,
            ttl,
            tos,
            window: packet.l4.tcp_window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{build_test_frame, IPPROTO_TCP};

    #[test]
    fn record_serialises_with_expected_fields() {
        let frame = build_test_frame(
            "00:00:00:00:00:01".parse().unwrap(),
            "00:00:00:00:00:03".parse().unwrap(),
            "10.0.0.1".parse().unwrap(),
            "10.0.0.3".parse().unwrap(),
            IPPROTO_TCP,
            51000,
            80,
        );
        let parsed = ParsedPacket::parse(&frame).unwrap();
        let record = CapturedPacket::from_parsed(1700000000.5, 1, 2, &parsed);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["dpid"], 1);
        assert_eq!(json["in_port"], 2);
        assert_eq!(json["protocol"], "TCP");
        assert_eq!(json["src_ip"], "10.0.0.1");
        assert_eq!(json["dst_port"], 80);

        let back: CapturedPacket = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
