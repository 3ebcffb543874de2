//! Parsing of the L2/L3/L4 headers carried in PACKET_IN payloads. Only
//! the fields the controller and the capture pipeline consume are
//! pulled out; anything else is skipped.

use fplf_utils::MacAddr;
use std::net::Ipv4Addr;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV6: u16 = 0x86dd;
pub const ETHERTYPE_LLDP: u16 = 0x88cc;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// ARP operation and addresses, for the flood-or-forward decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpInfo {
    pub opcode: u16,
    pub sender_ip: Ipv4Addr,
    pub target_ip: Ipv4Addr,
}

impl ArpInfo {
    pub fn is_request(&self) -> bool {
        self.opcode == 1
    }

    pub fn is_reply(&self) -> bool {
        self.opcode == 2
    }
}

/// IPv4 header fields the capture record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Info {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub proto: u8,
    pub tos: u8,
    pub ttl: u8,
    pub total_length: u16,
}

/// L4 fields. Ports are zero for ICMP and unknown protocols.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct L4Info {
    pub src_port: u16,
    pub dst_port: u16,
    pub tcp_flags: u8,
    pub tcp_window: u16,
}

/// A parsed PACKET_IN payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPacket {
    pub eth_src: MacAddr,
    pub eth_dst: MacAddr,
    pub ethertype: u16,
    pub length: usize,
    pub arp: Option<ArpInfo>,
    pub ipv4: Option<Ipv4Info>,
    pub l4: L4Info,
}

impl ParsedPacket {
    /// Parse an Ethernet frame. Returns `None` when the frame is too
    /// short to carry an Ethernet header.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 14 {
            return None;
        }
        let eth_dst = MacAddr::new([data[0], data[1], data[2], data[3], data[4], data[5]]);
        let eth_src = MacAddr::new([data[6], data[7], data[8], data[9], data[10], data[11]]);
        let ethertype = u16::from_be_bytes([data[12], data[13]]);

        let mut packet = Self {
            eth_src,
            eth_dst,
            ethertype,
            length: data.len(),
            arp: None,
            ipv4: None,
            l4: L4Info::default(),
        };

        let payload = &data[14..];
        match ethertype {
            ETHERTYPE_ARP => packet.arp = parse_arp(payload),
            ETHERTYPE_IPV4 => {
                if let Some((ipv4, l4)) = parse_ipv4(payload) {
                    packet.ipv4 = Some(ipv4);
                    packet.l4 = l4;
                }
            }
            _ => {}
        }
        Some(packet)
    }

    pub fn is_lldp(&self) -> bool {
        self.ethertype == ETHERTYPE_LLDP
    }

    /// The protocol label used in capture records and the feature
    /// pipeline.
    pub fn protocol_label(&self) -> &'static str {
        match self.ipv4 {
            Some(ip) => match ip.proto {
                IPPROTO_TCP => "TCP",
                IPPROTO_UDP => "UDP",
                IPPROTO_ICMP => "ICMP",
                _ => "OTHER",
            },
            None => "OTHER",
        }
    }
}

fn parse_arp(payload: &[u8]) -> Option<ArpInfo> {
    // Fixed-size Ethernet/IPv4 ARP body.
    if payload.len() < 28 {
        return None;
    }
    let opcode = u16::from_be_bytes([payload[6], payload[7]]);
    let sender_ip = Ipv4Addr::new(payload[14], payload[15], payload[16], payload[17]);
    let target_ip = Ipv4Addr::new(payload[24], payload[25], payload[26], payload[27]);
    Some(ArpInfo { opcode, sender_ip, target_ip })
}

fn parse_ipv4(payload: &[u8]) -> Option<(Ipv4Info, L4Info)> {
    if payload.len() < 20 {
        return None;
    }
    let version = payload[0] >> 4;
    if version != 4 {
        return None;
    }
    let ihl = (payload[0] & 0x0f) as usize * 4;
    if ihl < 20 || payload.len() < ihl {
        return None;
    }
    let info = Ipv4Info {
        src: Ipv4Addr::new(payload[12], payload[13], payload[14], payload[15]),
        dst: Ipv4Addr::new(payload[16], payload[17], payload[18], payload[19]),
        proto: payload[9],
        tos: payload[1],
        ttl: payload[8],
        total_length: u16::from_be_bytes([payload[2], payload[3]]),
    };

    let l4_bytes = &payload[ihl..];
    let l4 = match info.proto {
        IPPROTO_TCP if l4_bytes.len() >= 16 => L4Info {
            src_port: u16::from_be_bytes([l4_bytes[0], l4_bytes[1]]),
            dst_port: u16::from_be_bytes([l4_bytes[2], l4_bytes[3]]),
            tcp_flags: l4_bytes[13] & 0x3f,
            tcp_window: u16::from_be_bytes([l4_bytes[14], l4_bytes[15]]),
        },
        IPPROTO_UDP if l4_bytes.len() >= 8 => L4Info {
            src_port: u16::from_be_bytes([l4_bytes[0], l4_bytes[1]]),
            dst_port: u16::from_be_bytes([l4_bytes[2], l4_bytes[3]]),
            ..Default::default()
        },
        _ => L4Info::default(),
    };

    Some((info, l4))
}

/// Test helper: build a minimal TCP or UDP frame with the given
/// addressing. Used across the controller and pipeline tests.
pub fn build_test_frame(
    eth_src: MacAddr,
    eth_dst: MacAddr,
    ip_src: Ipv4Addr,
    ip_dst: Ipv4Addr,
    proto: u8,
    src_port: u16,
    dst_port: u16,
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(64);
    frame.extend_from_slice(&eth_dst.octets());
    frame.extend_from_slice(&eth_src.octets());
    frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

    // IPv4 header, no options.
    frame.push(0x45);
    frame.push(0); // tos
    let total_len: u16 = if proto == IPPROTO_TCP { 40 } else { 28 };
    frame.extend_from_slice(&total_len.to_be_bytes());
    frame.extend_from_slice(&[0u8; 4]); // id + flags/fragment
    frame.push(64); // ttl
    frame.push(proto);
    frame.extend_from_slice(&[0u8; 2]); // checksum
    frame.extend_from_slice(&ip_src.octets());
    frame.extend_from_slice(&ip_dst.octets());

    match proto {
        IPPROTO_TCP => {
            frame.extend_from_slice(&src_port.to_be_bytes());
            frame.extend_from_slice(&dst_port.to_be_bytes());
            frame.extend_from_slice(&[0u8; 8]); // seq + ack
            frame.push(0x50); // data offset
            frame.push(0x18); // PSH|ACK
            frame.extend_from_slice(&8192u16.to_be_bytes()); // window
            frame.extend_from_slice(&[0u8; 4]); // checksum + urgent
        }
        IPPROTO_UDP => {
            frame.extend_from_slice(&src_port.to_be_bytes());
            frame.extend_from_slice(&dst_port.to_be_bytes());
            frame.extend_from_slice(&8u16.to_be_bytes());
            frame.extend_from_slice(&[0u8; 2]);
        }
        _ => {}
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tcp_frame() {
        let frame = build_test_frame(
            "00:00:00:00:00:01".parse().unwrap(),
            "00:00:00:00:00:03".parse().unwrap(),
            "10.0.0.1".parse().unwrap(),
            "10.0.0.3".parse().unwrap(),
            IPPROTO_TCP,
            51000,
            22,
        );
        let packet = ParsedPacket::parse(&frame).unwrap();
        assert_eq!(packet.ethertype, ETHERTYPE_IPV4);
        assert_eq!(packet.protocol_label(), "TCP");
        let ip = packet.ipv4.unwrap();
        assert_eq!(ip.src, "10.0.0.1".parse::<Ipv4Addr>().unwrap());
        assert_eq!(ip.ttl, 64);
        assert_eq!(packet.l4.src_port, 51000);
        assert_eq!(packet.l4.dst_port, 22);
        assert_eq!(packet.l4.tcp_flags, 0x18);
        assert_eq!(packet.l4.tcp_window, 8192);
    }

    #[test]
    fn parse_udp_frame() {
        let frame = build_test_frame(
            "00:00:00:00:00:02".parse().unwrap(),
            "00:00:00:00:00:04".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
            "10.0.0.4".parse().unwrap(),
            IPPROTO_UDP,
            44000,
            5004,
        );
        let packet = ParsedPacket::parse(&frame).unwrap();
        assert_eq!(packet.protocol_label(), "UDP");
        assert_eq!(packet.l4.dst_port, 5004);
        assert_eq!(packet.l4.tcp_flags, 0);
    }

    #[test]
    fn parse_arp_request() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0xff; 6]); // broadcast dst
        frame.extend_from_slice(&[0, 0, 0, 0, 0, 1]);
        frame.extend_from_slice(&ETHERTYPE_ARP.to_be_bytes());
        frame.extend_from_slice(&[0, 1, 0x08, 0, 6, 4, 0, 1]); // htype..oper
        frame.extend_from_slice(&[0, 0, 0, 0, 0, 1]); // sha
        frame.extend_from_slice(&[10, 0, 0, 1]); // spa
        frame.extend_from_slice(&[0; 6]); // tha
        frame.extend_from_slice(&[10, 0, 0, 3]); // tpa

        let packet = ParsedPacket::parse(&frame).unwrap();
        let arp = packet.arp.unwrap();
        assert!(arp.is_request());
        assert_eq!(arp.sender_ip, "10.0.0.1".parse::<Ipv4Addr>().unwrap());
        assert_eq!(arp.target_ip, "10.0.0.3".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn runt_frame_rejected() {
        assert!(ParsedPacket::parse(&[0u8; 10]).is_none());
    }

    #[test]
    fn lldp_detected() {
        let mut frame = vec![0u8; 14];
        frame[12..14].copy_from_slice(&ETHERTYPE_LLDP.to_be_bytes());
        let packet = ParsedPacket::parse(&frame).unwrap();
        assert!(packet.is_lldp());
    }
}
