//! Binary encoding and decoding of the OpenFlow 1.3 message subset.
//! Everything on the wire is big-endian. Both directions are
//! implemented so tests can speak for the switch side.

use crate::messages::*;
use fplf_utils::MacAddr;
use std::net::Ipv4Addr;
use thiserror::Error;

// Message type codes (ofp_type).
const OFPT_HELLO: u8 = 0;
const OFPT_ERROR: u8 = 1;
const OFPT_ECHO_REQUEST: u8 = 2;
const OFPT_ECHO_REPLY: u8 = 3;
const OFPT_FEATURES_REQUEST: u8 = 5;
const OFPT_FEATURES_REPLY: u8 = 6;
const OFPT_PACKET_IN: u8 = 10;
const OFPT_PORT_STATUS: u8 = 12;
const OFPT_PACKET_OUT: u8 = 13;
const OFPT_FLOW_MOD: u8 = 14;
const OFPT_MULTIPART_REQUEST: u8 = 18;
const OFPT_MULTIPART_REPLY: u8 = 19;

// Multipart types (ofp_multipart_type).
const OFPMP_PORT_STATS: u16 = 4;
const OFPMP_PORT_DESC: u16 = 13;

// OXM basic class and field codes.
const OXM_CLASS_BASIC: u16 = 0x8000;
const OXM_IN_PORT: u8 = 0;
const OXM_ETH_DST: u8 = 3;
const OXM_ETH_SRC: u8 = 4;
const OXM_ETH_TYPE: u8 = 5;
const OXM_IP_PROTO: u8 = 10;
const OXM_IPV4_SRC: u8 = 11;
const OXM_IPV4_DST: u8 = 12;
const OXM_TCP_SRC: u8 = 13;
const OXM_TCP_DST: u8 = 14;
const OXM_UDP_SRC: u8 = 15;
const OXM_UDP_DST: u8 = 16;

const OFPIT_APPLY_ACTIONS: u16 = 4;
const OFPAT_OUTPUT: u16 = 0;

const ETHERTYPE_IPV4: u16 = 0x0800;
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

/// OpenFlow header length.
pub const OFP_HEADER_LEN: usize = 8;

/// Upper bound on one OpenFlow message. A 1.3 message length field is
/// 16 bits, so anything larger is corrupt framing.
pub const MAX_MESSAGE_BYTES: usize = 65_535;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Message truncated")]
    Truncated,
    #[error("Unsupported OpenFlow version: {0:#04x}")]
    BadVersion(u8),
    #[error("Invalid length field: {0}")]
    BadLength(usize),
    #[error("Malformed {0} body")]
    MalformedBody(&'static str),
    #[error("Unable to read from switch socket")]
    StreamReadError,
    #[error("Unable to write to switch socket")]
    StreamWriteError,
}

// ---------------------------------------------------------------------
// Byte cursor helpers
// ---------------------------------------------------------------------

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ProtocolError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, ProtocolError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn skip(&mut self, n: usize) -> Result<(), ProtocolError> {
        self.take(n).map(|_| ())
    }

    fn mac(&mut self) -> Result<MacAddr, ProtocolError> {
        let b = self.take(6)?;
        Ok(MacAddr::new([b[0], b[1], b[2], b[3], b[4], b[5]]))
    }

    fn ipv4(&mut self) -> Result<Ipv4Addr, ProtocolError> {
        let b = self.take(4)?;
        Ok(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
    }
}

fn push_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn push_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn pad_to(buf: &mut Vec<u8>, align: usize) {
    while buf.len() % align != 0 {
        buf.push(0);
    }
}

// ---------------------------------------------------------------------
// OXM match encoding
// ---------------------------------------------------------------------

fn push_oxm(buf: &mut Vec<u8>, field: u8, payload: &[u8]) {
    push_u16(buf, OXM_CLASS_BASIC);
    buf.push(field << 1); // no mask bit
    buf.push(payload.len() as u8);
    buf.extend_from_slice(payload);
}

fn encode_match(flow_match: &FlowMatch) -> Vec<u8> {
    let mut oxms = Vec::new();
    match flow_match {
        FlowMatch::All => {}
        FlowMatch::EthType(eth_type) => {
            push_oxm(&mut oxms, OXM_ETH_TYPE, &eth_type.to_be_bytes());
        }
        FlowMatch::L2 { eth_src, eth_dst } => {
            push_oxm(&mut oxms, OXM_ETH_SRC, &eth_src.octets());
            push_oxm(&mut oxms, OXM_ETH_DST, &eth_dst.octets());
        }
        FlowMatch::FiveTuple {
            ip_src,
            ip_dst,
            ip_proto,
            src_port,
            dst_port,
        } => {
            push_oxm(&mut oxms, OXM_ETH_TYPE, &ETHERTYPE_IPV4.to_be_bytes());
            push_oxm(&mut oxms, OXM_IPV4_SRC, &ip_src.octets());
            push_oxm(&mut oxms, OXM_IPV4_DST, &ip_dst.octets());
            push_oxm(&mut oxms, OXM_IP_PROTO, &[*ip_proto]);
            match *ip_proto {
                IPPROTO_TCP => {
                    push_oxm(&mut oxms, OXM_TCP_SRC, &src_port.to_be_bytes());
                    push_oxm(&mut oxms, OXM_TCP_DST, &dst_port.to_be_bytes());
                }
                IPPROTO_UDP => {
                    push_oxm(&mut oxms, OXM_UDP_SRC, &src_port.to_be_bytes());
                    push_oxm(&mut oxms, OXM_UDP_DST, &dst_port.to_be_bytes());
                }
                _ => {}
            }
        }
    }

    let mut out = Vec::with_capacity(oxms.len() + 8);
    push_u16(&mut out, 1); // OFPMT_OXM
    push_u16(&mut out, (oxms.len() + 4) as u16);
    out.extend_from_slice(&oxms);
    pad_to(&mut out, 8);
    out
}

/// The OXM fields this controller cares about when reading a match.
#[derive(Debug, Default, Clone, Copy)]
struct MatchFields {
    in_port: Option<u32>,
    eth_src: Option<MacAddr>,
    eth_dst: Option<MacAddr>,
    eth_type: Option<u16>,
    ip_proto: Option<u8>,
    ipv4_src: Option<Ipv4Addr>,
    ipv4_dst: Option<Ipv4Addr>,
    tp_src: Option<u16>,
    tp_dst: Option<u16>,
}

fn decode_match(cursor: &mut Cursor) -> Result<MatchFields, ProtocolError> {
    let match_type = cursor.u16()?;
    let match_len = cursor.u16()? as usize;
    if match_type != 1 || match_len < 4 {
        return Err(ProtocolError::MalformedBody("match"));
    }
    let oxm_bytes = cursor.take(match_len - 4)?;
    // The match structure is padded to 8 bytes overall.
    let padding = (8 - (match_len % 8)) % 8;
    cursor.skip(padding)?;

    let mut fields = MatchFields::default();
    let mut oxm = Cursor::new(oxm_bytes);
    while oxm.remaining() >= 4 {
        let class = oxm.u16()?;
        let field = oxm.u8()? >> 1;
        let len = oxm.u8()? as usize;
        let payload = oxm.take(len)?;
        if class != OXM_CLASS_BASIC {
            continue;
        }
        let mut p = Cursor::new(payload);
        match field {
            OXM_IN_PORT if len == 4 => fields.in_port = Some(p.u32()?),
            OXM_ETH_SRC if len == 6 => fields.eth_src = Some(p.mac()?),
            OXM_ETH_DST if len == 6 => fields.eth_dst = Some(p.mac()?),
            OXM_ETH_TYPE if len == 2 => fields.eth_type = Some(p.u16()?),
            OXM_IP_PROTO if len == 1 => fields.ip_proto = Some(p.u8()?),
            OXM_IPV4_SRC if len == 4 => fields.ipv4_src = Some(p.ipv4()?),
            OXM_IPV4_DST if len == 4 => fields.ipv4_dst = Some(p.ipv4()?),
            OXM_TCP_SRC | OXM_UDP_SRC if len == 2 => fields.tp_src = Some(p.u16()?),
            OXM_TCP_DST | OXM_UDP_DST if len == 2 => fields.tp_dst = Some(p.u16()?),
            _ => {}
        }
    }
    Ok(fields)
}

fn match_fields_to_flow_match(fields: &MatchFields) -> FlowMatch {
    if let (Some(ip_src), Some(ip_dst), Some(ip_proto)) =
        (fields.ipv4_src, fields.ipv4_dst, fields.ip_proto)
    {
        return FlowMatch::FiveTuple {
            ip_src,
            ip_dst,
            ip_proto,
            src_port: fields.tp_src.unwrap_or(0),
            dst_port: fields.tp_dst.unwrap_or(0),
        };
    }
    if let (Some(eth_src), Some(eth_dst)) = (fields.eth_src, fields.eth_dst) {
        return FlowMatch::L2 { eth_src, eth_dst };
    }
    if let Some(eth_type) = fields.eth_type {
        return FlowMatch::EthType(eth_type);
    }
    FlowMatch::All
}

// ---------------------------------------------------------------------
// Action encoding
// ---------------------------------------------------------------------

fn encode_actions(actions: &[Action]) -> Vec<u8> {
    let mut out = Vec::with_capacity(actions.len() * 16);
    for action in actions {
        match action {
            Action::Output { port, max_len } => {
                push_u16(&mut out, OFPAT_OUTPUT);
                push_u16(&mut out, 16);
                push_u32(&mut out, *port);
                push_u16(&mut out, *max_len);
                out.extend_from_slice(&[0u8; 6]);
            }
        }
    }
    out
}

fn decode_actions(bytes: &[u8]) -> Result<Vec<Action>, ProtocolError> {
    let mut actions = Vec::new();
    let mut cursor = Cursor::new(bytes);
    while cursor.remaining() >= 4 {
        let action_type = cursor.u16()?;
        let len = cursor.u16()? as usize;
        if len < 4 {
            return Err(ProtocolError::MalformedBody("action"));
        }
        let body = cursor.take(len - 4)?;
        if action_type == OFPAT_OUTPUT {
            let mut b = Cursor::new(body);
            let port = b.u32()?;
            let max_len = b.u16()?;
            actions.push(Action::Output { port, max_len });
        }
    }
    Ok(actions)
}

// ---------------------------------------------------------------------
// ofp_port and ofp_port_stats
// ---------------------------------------------------------------------

fn encode_port_desc(buf: &mut Vec<u8>, desc: &PortDesc) {
    push_u32(buf, desc.port_no);
    buf.extend_from_slice(&[0u8; 4]);
    buf.extend_from_slice(&desc.hw_addr.octets());
    buf.extend_from_slice(&[0u8; 2]);
    let mut name = [0u8; 16];
    let name_bytes = desc.name.as_bytes();
    let n = name_bytes.len().min(15);
    name[..n].copy_from_slice(&name_bytes[..n]);
    buf.extend_from_slice(&name);
    push_u32(buf, desc.config);
    push_u32(buf, desc.state);
    push_u32(buf, 0); // curr
    push_u32(buf, 0); // advertised
    push_u32(buf, 0); // supported
    push_u32(buf, 0); // peer
    push_u32(buf, desc.curr_speed);
    push_u32(buf, desc.max_speed);
}

fn decode_port_desc(cursor: &mut Cursor) -> Result<PortDesc, ProtocolError> {
    let port_no = cursor.u32()?;
    cursor.skip(4)?;
    let hw_addr = cursor.mac()?;
    cursor.skip(2)?;
    let name_bytes = cursor.take(16)?;
    let name_end = name_bytes.iter().position(|b| *b == 0).unwrap_or(16);
    let name = String::from_utf8_lossy(&name_bytes[..name_end]).to_string();
    let config = cursor.u32()?;
    let state = cursor.u32()?;
    cursor.skip(16)?; // curr, advertised, supported, peer
    let curr_speed = cursor.u32()?;
    let max_speed = cursor.u32()?;
    Ok(PortDesc { port_no, hw_addr, name, config, state, curr_speed, max_speed })
}

fn encode_port_stats(buf: &mut Vec<u8>, stats: &PortStats) {
    push_u32(buf, stats.port_no);
    buf.extend_from_slice(&[0u8; 4]);
    push_u64(buf, stats.rx_packets);
    push_u64(buf, stats.tx_packets);
    push_u64(buf, stats.rx_bytes);
    push_u64(buf, stats.tx_bytes);
    push_u64(buf, stats.rx_dropped);
    push_u64(buf, stats.tx_dropped);
    push_u64(buf, stats.rx_errors);
    push_u64(buf, stats.tx_errors);
    push_u64(buf, 0); // rx_frame_err
    push_u64(buf, 0); // rx_over_err
    push_u64(buf, 0); // rx_crc_err
    push_u64(buf, 0); // collisions
    push_u32(buf, stats.duration_sec);
    push_u32(buf, stats.duration_nsec);
}

fn decode_port_stats(cursor: &mut Cursor) -> Result<PortStats, ProtocolError> {
    let port_no = cursor.u32()?;
    cursor.skip(4)?;
    let rx_packets = cursor.u64()?;
    let tx_packets = cursor.u64()?;
    let rx_bytes = cursor.u64()?;
    let tx_bytes = cursor.u64()?;
    let rx_dropped = cursor.u64()?;
    let tx_dropped = cursor.u64()?;
    let rx_errors = cursor.u64()?;
    let tx_errors = cursor.u64()?;
    cursor.skip(32)?; // frame/over/crc errors, collisions
    let duration_sec = cursor.u32()?;
    let duration_nsec = cursor.u32()?;
    Ok(PortStats {
        port_no,
        rx_packets,
        tx_packets,
        rx_bytes,
        tx_bytes,
        rx_dropped,
        tx_dropped,
        rx_errors,
        tx_errors,
        duration_sec,
        duration_nsec,
    })
}

// ---------------------------------------------------------------------
// Top-level encode
// ---------------------------------------------------------------------

/// Encode a message with the given transaction id, including the
/// OpenFlow header.
pub fn encode_message(xid: u32, msg: &OfMessage) -> Result<Vec<u8>, ProtocolError> {
    let (msg_type, body) = encode_body(msg)?;
    let total = OFP_HEADER_LEN + body.len();
    if total > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::BadLength(total));
    }
    let mut out = Vec::with_capacity(total);
    out.push(OFP_VERSION);
    out.push(msg_type);
    push_u16(&mut out, total as u16);
    push_u32(&mut out, xid);
    out.extend_from_slice(&body);
    Ok(out)
}

fn encode_body(msg: &OfMessage) -> Result<(u8, Vec<u8>), ProtocolError> {
    let mut body = Vec::new();
    let msg_type = match msg {
        OfMessage::Hello => OFPT_HELLO,
        OfMessage::Error { err_type, code, data } => {
            push_u16(&mut body, *err_type);
            push_u16(&mut body, *code);
            body.extend_from_slice(data);
            OFPT_ERROR
        }
        OfMessage::EchoRequest(data) => {
            body.extend_from_slice(data);
            OFPT_ECHO_REQUEST
        }
        OfMessage::EchoReply(data) => {
            body.extend_from_slice(data);
            OFPT_ECHO_REPLY
        }
        OfMessage::FeaturesRequest => OFPT_FEATURES_REQUEST,
        OfMessage::FeaturesReply(features) => {
            push_u64(&mut body, features.datapath_id);
            push_u32(&mut body, features.n_buffers);
            body.push(features.n_tables);
            body.push(features.auxiliary_id);
            body.extend_from_slice(&[0u8; 2]);
            push_u32(&mut body, features.capabilities);
            push_u32(&mut body, 0); // reserved
            OFPT_FEATURES_REPLY
        }
        OfMessage::PacketIn(pi) => {
            push_u32(&mut body, pi.buffer_id);
            push_u16(&mut body, pi.total_len);
            body.push(pi.reason as u8);
            body.push(pi.table_id);
            push_u64(&mut body, pi.cookie);
            let mut oxms = Vec::new();
            push_oxm(&mut oxms, OXM_IN_PORT, &pi.in_port.to_be_bytes());
            push_u16(&mut body, 1); // OFPMT_OXM
            push_u16(&mut body, (oxms.len() + 4) as u16);
            body.extend_from_slice(&oxms);
            pad_to(&mut body, 8);
            body.extend_from_slice(&[0u8; 2]);
            body.extend_from_slice(&pi.data);
            OFPT_PACKET_IN
        }
        OfMessage::PacketOut(po) => {
            let actions = encode_actions(&po.actions);
            push_u32(&mut body, po.buffer_id);
            push_u32(&mut body, po.in_port);
            push_u16(&mut body, actions.len() as u16);
            body.extend_from_slice(&[0u8; 6]);
            body.extend_from_slice(&actions);
            body.extend_from_slice(&po.data);
            OFPT_PACKET_OUT
        }
        OfMessage::FlowMod(fm) => {
            push_u64(&mut body, fm.cookie);
            push_u64(&mut body, 0); // cookie_mask
            body.push(fm.table_id);
            body.push(fm.command as u8);
            push_u16(&mut body, fm.idle_timeout);
            push_u16(&mut body, fm.hard_timeout);
            push_u16(&mut body, fm.priority);
            push_u32(&mut body, fm.buffer_id);
            push_u32(&mut body, fm.out_port);
            push_u32(&mut body, fm.out_group);
            push_u16(&mut body, 0); // flags
            body.extend_from_slice(&[0u8; 2]);
            body.extend_from_slice(&encode_match(&fm.flow_match));
            if !fm.actions.is_empty() {
                let actions = encode_actions(&fm.actions);
                push_u16(&mut body, OFPIT_APPLY_ACTIONS);
                push_u16(&mut body, (actions.len() + 8) as u16);
                body.extend_from_slice(&[0u8; 4]);
                body.extend_from_slice(&actions);
            }
            OFPT_FLOW_MOD
        }
        OfMessage::PortStatus(status) => {
            body.push(status.reason as u8);
            body.extend_from_slice(&[0u8; 7]);
            encode_port_desc(&mut body, &status.desc);
            OFPT_PORT_STATUS
        }
        OfMessage::PortDescRequest => {
            push_u16(&mut body, OFPMP_PORT_DESC);
            push_u16(&mut body, 0);
            body.extend_from_slice(&[0u8; 4]);
            OFPT_MULTIPART_REQUEST
        }
        OfMessage::PortDescReply(ports) => {
            push_u16(&mut body, OFPMP_PORT_DESC);
            push_u16(&mut body, 0);
            body.extend_from_slice(&[0u8; 4]);
            for port in ports {
                encode_port_desc(&mut body, port);
            }
            OFPT_MULTIPART_REPLY
        }
        OfMessage::PortStatsRequest { port_no } => {
            push_u16(&mut body, OFPMP_PORT_STATS);
            push_u16(&mut body, 0);
            body.extend_from_slice(&[0u8; 4]);
            push_u32(&mut body, *port_no);
            body.extend_from_slice(&[0u8; 4]);
            OFPT_MULTIPART_REQUEST
        }
        OfMessage::PortStatsReply(stats) => {
            push_u16(&mut body, OFPMP_PORT_STATS);
            push_u16(&mut body, 0);
            body.extend_from_slice(&[0u8; 4]);
            for entry in stats {
                encode_port_stats(&mut body, entry);
            }
            OFPT_MULTIPART_REPLY
        }
        OfMessage::Other { .. } => {
            return Err(ProtocolError::MalformedBody("cannot encode Other"));
        }
    };
    Ok((msg_type, body))
}

// ---------------------------------------------------------------------
// Top-level decode
// ---------------------------------------------------------------------

/// Decode one complete message (header included). Returns the
/// transaction id and the decoded message.
pub fn decode_message(bytes: &[u8]) -> Result<(u32, OfMessage), ProtocolError> {
    if bytes.len() < OFP_HEADER_LEN {
        return Err(ProtocolError::Truncated);
    }
    let version = bytes[0];
    if version != OFP_VERSION {
        return Err(ProtocolError::BadVersion(version));
    }
    let msg_type = bytes[1];
    let length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    if length < OFP_HEADER_LEN || length > bytes.len() {
        return Err(ProtocolError::BadLength(length));
    }
    let xid = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let mut cursor = Cursor::new(&bytes[OFP_HEADER_LEN..length]);

    let msg = match msg_type {
        OFPT_HELLO => OfMessage::Hello,
        OFPT_ERROR => {
            let err_type = cursor.u16()?;
            let code = cursor.u16()?;
            let data = cursor.take(cursor.remaining())?.to_vec();
            OfMessage::Error { err_type, code, data }
        }
        OFPT_ECHO_REQUEST => OfMessage::EchoRequest(cursor.take(cursor.remaining())?.to_vec()),
        OFPT_ECHO_REPLY => OfMessage::EchoReply(cursor.take(cursor.remaining())?.to_vec()),
        OFPT_FEATURES_REQUEST => OfMessage::FeaturesRequest,
        OFPT_FEATURES_REPLY => {
            let datapath_id = cursor.u64()?;
            let n_buffers = cursor.u32()?;
            let n_tables = cursor.u8()?;
            let auxiliary_id = cursor.u8()?;
            cursor.skip(2)?;
            let capabilities = cursor.u32()?;
            cursor.skip(4)?;
            OfMessage::FeaturesReply(SwitchFeatures {
                datapath_id,
                n_buffers,
                n_tables,
                auxiliary_id,
                capabilities,
            })
        }
        OFPT_PACKET_IN => {
            let buffer_id = cursor.u32()?;
            let total_len = cursor.u16()?;
            let reason = match cursor.u8()? {
                0 => PacketInReason::NoMatch,
                1 => PacketInReason::Action,
                2 => PacketInReason::InvalidTtl,
                _ => return Err(ProtocolError::MalformedBody("packet_in")),
            };
            let table_id = cursor.u8()?;
            let cookie = cursor.u64()?;
            let fields = decode_match(&mut cursor)?;
            cursor.skip(2)?;
            let data = cursor.take(cursor.remaining())?.to_vec();
            OfMessage::PacketIn(PacketIn {
                buffer_id,
                total_len,
                reason,
                table_id,
                cookie,
                in_port: fields.in_port.unwrap_or(0),
                data,
            })
        }
        OFPT_PACKET_OUT => {
            let buffer_id = cursor.u32()?;
            let in_port = cursor.u32()?;
            let actions_len = cursor.u16()? as usize;
            cursor.skip(6)?;
            let actions = decode_actions(cursor.take(actions_len)?)?;
            let data = cursor.take(cursor.remaining())?.to_vec();
            OfMessage::PacketOut(PacketOut { buffer_id, in_port, actions, data })
        }
        OFPT_FLOW_MOD => {
            let cookie = cursor.u64()?;
            cursor.skip(8)?; // cookie_mask
            let table_id = cursor.u8()?;
            let command = match cursor.u8()? {
                0 => FlowModCommand::Add,
                1 => FlowModCommand::Modify,
                2 => FlowModCommand::ModifyStrict,
                3 => FlowModCommand::Delete,
                4 => FlowModCommand::DeleteStrict,
                _ => return Err(ProtocolError::MalformedBody("flow_mod")),
            };
            let idle_timeout = cursor.u16()?;
            let hard_timeout = cursor.u16()?;
            let priority = cursor.u16()?;
            let buffer_id = cursor.u32()?;
            let out_port = cursor.u32()?;
            let out_group = cursor.u32()?;
            cursor.skip(4)?; // flags + pad
            let fields = decode_match(&mut cursor)?;
            let mut actions = Vec::new();
            while cursor.remaining() >= 8 {
                let inst_type = cursor.u16()?;
                let inst_len = cursor.u16()? as usize;
                if inst_len < 8 {
                    return Err(ProtocolError::MalformedBody("instruction"));
                }
                cursor.skip(4)?;
                let inst_body = cursor.take(inst_len - 8)?;
                if inst_type == OFPIT_APPLY_ACTIONS {
                    actions = decode_actions(inst_body)?;
                }
            }
            OfMessage::FlowMod(FlowMod {
                command,
                table_id,
                priority,
                idle_timeout,
                hard_timeout,
                cookie,
                buffer_id,
                out_port,
                out_group,
                flow_match: match_fields_to_flow_match(&fields),
                actions,
            })
        }
        OFPT_PORT_STATUS => {
            let reason = match cursor.u8()? {
                0 => PortReason::Add,
                1 => PortReason::Delete,
                2 => PortReason::Modify,
                _ => return Err(ProtocolError::MalformedBody("port_status")),
            };
            cursor.skip(7)?;
            let desc = decode_port_desc(&mut cursor)?;
            OfMessage::PortStatus(PortStatus { reason, desc })
        }
        OFPT_MULTIPART_REQUEST => {
            let mp_type = cursor.u16()?;
            cursor.skip(6)?; // flags + pad
            match mp_type {
                OFPMP_PORT_DESC => OfMessage::PortDescRequest,
                OFPMP_PORT_STATS => {
                    let port_no = cursor.u32()?;
                    OfMessage::PortStatsRequest { port_no }
                }
                _ => OfMessage::Other { msg_type },
            }
        }
        OFPT_MULTIPART_REPLY => {
            let mp_type = cursor.u16()?;
            cursor.skip(6)?; // flags + pad
            match mp_type {
                OFPMP_PORT_DESC => {
                    let mut ports = Vec::new();
                    while cursor.remaining() >= 64 {
                        ports.push(decode_port_desc(&mut cursor)?);
                    }
                    OfMessage::PortDescReply(ports)
                }
                OFPMP_PORT_STATS => {
                    let mut stats = Vec::new();
                    while cursor.remaining() >= 112 {
                        stats.push(decode_port_stats(&mut cursor)?);
                    }
                    OfMessage::PortStatsReply(stats)
                }
                _ => OfMessage::Other { msg_type },
            }
        }
        other => OfMessage::Other { msg_type: other },
    };

    Ok((xid, msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: OfMessage) -> OfMessage {
        let bytes = encode_message(42, &msg).expect("encode");
        let (xid, decoded) = decode_message(&bytes).expect("decode");
        assert_eq!(xid, 42);
        decoded
    }

    #[test]
    fn hello_round_trip() {
        assert_eq!(round_trip(OfMessage::Hello), OfMessage::Hello);
    }

    #[test]
    fn echo_round_trip() {
        let msg = OfMessage::EchoRequest(vec![1, 2, 3]);
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn features_reply_round_trip() {
        let msg = OfMessage::FeaturesReply(SwitchFeatures {
            datapath_id: 0xdead_beef,
            n_buffers: 256,
            n_tables: 254,
            auxiliary_id: 0,
            capabilities: 0x47,
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn table_miss_flow_mod_round_trip() {
        let msg = OfMessage::FlowMod(FlowMod::add(
            FlowMatch::All,
            vec![Action::output(OFPP_CONTROLLER)],
            0,
        ));
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn l2_flow_mod_round_trip() {
        let mut fm = FlowMod::add(
            FlowMatch::L2 {
                eth_src: "00:00:00:00:00:01".parse().unwrap(),
                eth_dst: "00:00:00:00:00:03".parse().unwrap(),
            },
            vec![Action::output(3)],
            14,
        );
        fm.idle_timeout = 30;
        fm.hard_timeout = 300;
        fm.command = FlowModCommand::ModifyStrict;
        let msg = OfMessage::FlowMod(fm);
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn five_tuple_flow_mod_round_trip() {
        let msg = OfMessage::FlowMod(FlowMod::add(
            FlowMatch::FiveTuple {
                ip_src: "10.0.0.1".parse().unwrap(),
                ip_dst: "10.0.0.3".parse().unwrap(),
                ip_proto: 6,
                src_port: 51000,
                dst_port: 22,
            },
            vec![Action::output(2)],
            13,
        ));
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn udp_five_tuple_round_trip() {
        let msg = OfMessage::FlowMod(FlowMod::add(
            FlowMatch::FiveTuple {
                ip_src: "10.0.0.2".parse().unwrap(),
                ip_dst: "10.0.0.4".parse().unwrap(),
                ip_proto: 17,
                src_port: 44000,
                dst_port: 5004,
            },
            vec![Action::output(4)],
            14,
        ));
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn packet_in_round_trip() {
        let msg = OfMessage::PacketIn(PacketIn {
            buffer_id: OFP_NO_BUFFER,
            total_len: 64,
            reason: PacketInReason::NoMatch,
            table_id: 0,
            cookie: 0,
            in_port: 7,
            data: vec![0xab; 64],
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn packet_out_round_trip() {
        let msg = OfMessage::PacketOut(PacketOut {
            buffer_id: OFP_NO_BUFFER,
            in_port: 1,
            actions: vec![Action::output(OFPP_FLOOD)],
            data: vec![1, 2, 3, 4],
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn port_stats_round_trip() {
        let msg = OfMessage::PortStatsReply(vec![
            PortStats {
                port_no: 1,
                rx_packets: 10,
                tx_packets: 20,
                rx_bytes: 1000,
                tx_bytes: 2000,
                duration_sec: 5,
                ..Default::default()
            },
            PortStats { port_no: 2, tx_bytes: 125_000, ..Default::default() },
        ]);
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn port_desc_round_trip() {
        let msg = OfMessage::PortDescReply(vec![PortDesc {
            port_no: 1,
            hw_addr: "aa:bb:cc:dd:ee:01".parse().unwrap(),
            name: "s1-eth1".to_string(),
            config: 0,
            state: 0,
            curr_speed: 100_000,
            max_speed: 100_000,
        }]);
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn port_stats_request_round_trip() {
        let msg = OfMessage::PortStatsRequest { port_no: OFPP_ANY };
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn reversed_five_tuple_mirrors_ports() {
        let m = FlowMatch::FiveTuple {
            ip_src: "10.0.0.1".parse().unwrap(),
            ip_dst: "10.0.0.3".parse().unwrap(),
            ip_proto: 6,
            src_port: 51000,
            dst_port: 22,
        };
        match m.reversed() {
            FlowMatch::FiveTuple { ip_src, ip_dst, src_port, dst_port, .. } => {
                assert_eq!(ip_src, "10.0.0.3".parse::<std::net::Ipv4Addr>().unwrap());
                assert_eq!(ip_dst, "10.0.0.1".parse::<std::net::Ipv4Addr>().unwrap());
                assert_eq!(src_port, 22);
                assert_eq!(dst_port, 51000);
            }
            other => panic!("unexpected reverse match {other:?}"),
        }
    }

    #[test]
    fn bad_version_rejected() {
        let mut bytes = encode_message(1, &OfMessage::Hello).unwrap();
        bytes[0] = 0x01;
        assert!(matches!(
            decode_message(&bytes),
            Err(ProtocolError::BadVersion(0x01))
        ));
    }

    #[test]
    fn truncated_header_rejected() {
        assert!(matches!(
            decode_message(&[0x04, 0x00, 0x00]),
            Err(ProtocolError::Truncated)
        ));
    }

    #[test]
    fn short_length_field_rejected() {
        let mut bytes = encode_message(1, &OfMessage::Hello).unwrap();
        bytes[2] = 0;
        bytes[3] = 4; // below the header size
        assert!(matches!(
            decode_message(&bytes),
            Err(ProtocolError::BadLength(4))
        ));
    }
}
