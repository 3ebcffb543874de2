//! The OpenFlow 1.3 message subset used by the controller. Both
//! directions are modelled so that tests can script a switch against
//! the same codec the controller uses.

use fplf_utils::MacAddr;
use std::net::Ipv4Addr;

/// Negotiated protocol version. This controller speaks OF 1.3 only.
pub const OFP_VERSION: u8 = 0x04;

/// Reserved port: send to controller.
pub const OFPP_CONTROLLER: u32 = 0xffff_fffd;
/// Reserved port: flood to all ports except ingress.
pub const OFPP_FLOOD: u32 = 0xffff_fffb;
/// Reserved port: the switch-local port, never flooded to.
pub const OFPP_LOCAL: u32 = 0xffff_fffe;
/// Wildcard port for stats requests and deletes.
pub const OFPP_ANY: u32 = 0xffff_ffff;
/// Wildcard group for deletes.
pub const OFPG_ANY: u32 = 0xffff_ffff;
/// "Send the full packet" miss length.
pub const OFPCML_NO_BUFFER: u16 = 0xffff;
/// Packet-out with unbuffered payload.
pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;

/// FLOW_MOD commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlowModCommand {
    Add = 0,
    Modify = 1,
    ModifyStrict = 2,
    Delete = 3,
    DeleteStrict = 4,
}

/// Match clauses the controller installs or interprets. A closed set:
/// table-miss (match all), an ethertype match for the ARP punt rule,
/// the L2 pair match used for normal paths, and the IPv4 5-tuple for
/// fine-grained installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowMatch {
    All,
    EthType(u16),
    L2 {
        eth_src: MacAddr,
        eth_dst: MacAddr,
    },
    FiveTuple {
        ip_src: Ipv4Addr,
        ip_dst: Ipv4Addr,
        ip_proto: u8,
        src_port: u16,
        dst_port: u16,
    },
}

impl FlowMatch {
    /// The mirrored match for the reverse direction of a conversation.
    pub fn reversed(&self) -> FlowMatch {
        match *self {
            FlowMatch::All => FlowMatch::All,
            FlowMatch::EthType(t) => FlowMatch::EthType(t),
            FlowMatch::L2 { eth_src, eth_dst } => FlowMatch::L2 {
                eth_src: eth_dst,
                eth_dst: eth_src,
            },
            FlowMatch::FiveTuple {
                ip_src,
                ip_dst,
                ip_proto,
                src_port,
                dst_port,
            } => FlowMatch::FiveTuple {
                ip_src: ip_dst,
                ip_dst: ip_src,
                ip_proto,
                src_port: dst_port,
                dst_port: src_port,
            },
        }
    }
}

/// Output actions. OUTPUT is the only action this controller uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Output { port: u32, max_len: u16 },
}

impl Action {
    pub fn output(port: u32) -> Self {
        Action::Output { port, max_len: OFPCML_NO_BUFFER }
    }
}

/// A FLOW_MOD as built by the flow installer.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowMod {
    pub command: FlowModCommand,
    pub table_id: u8,
    pub priority: u16,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub cookie: u64,
    pub buffer_id: u32,
    pub out_port: u32,
    pub out_group: u32,
    pub flow_match: FlowMatch,
    pub actions: Vec<Action>,
}

impl FlowMod {
    /// An ADD with the defaults the installer uses everywhere.
    pub fn add(flow_match: FlowMatch, actions: Vec<Action>, priority: u16) -> Self {
        Self {
            command: FlowModCommand::Add,
            table_id: 0,
            priority,
            idle_timeout: 0,
            hard_timeout: 0,
            cookie: 0,
            buffer_id: OFP_NO_BUFFER,
            out_port: OFPP_ANY,
            out_group: OFPG_ANY,
            flow_match,
            actions,
        }
    }

    /// DELETE every flow in the table. Used when a switch (re)connects
    /// so stale rules from a previous run cannot linger.
    pub fn delete_all() -> Self {
        Self {
            command: FlowModCommand::Delete,
            table_id: 0,
            priority: 0,
            idle_timeout: 0,
            hard_timeout: 0,
            cookie: 0,
            buffer_id: OFP_NO_BUFFER,
            out_port: OFPP_ANY,
            out_group: OFPG_ANY,
            flow_match: FlowMatch::All,
            actions: Vec::new(),
        }
    }
}

/// Why a packet was punted to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketInReason {
    NoMatch = 0,
    Action = 1,
    InvalidTtl = 2,
}

/// A PACKET_IN event.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketIn {
    pub buffer_id: u32,
    pub total_len: u16,
    pub reason: PacketInReason,
    pub table_id: u8,
    pub cookie: u64,
    pub in_port: u32,
    pub data: Vec<u8>,
}

/// A PACKET_OUT sent by the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketOut {
    pub buffer_id: u32,
    pub in_port: u32,
    pub actions: Vec<Action>,
    pub data: Vec<u8>,
}

/// Port description from the PORT_DESC multipart reply.
#[derive(Debug, Clone, PartialEq)]
pub struct PortDesc {
    pub port_no: u32,
    pub hw_addr: MacAddr,
    pub name: String,
    pub config: u32,
    pub state: u32,
    pub curr_speed: u32,
    pub max_speed: u32,
}

/// One entry of a PORT_STATS multipart reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    pub port_no: u32,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub duration_sec: u32,
    pub duration_nsec: u32,
}

/// FEATURES_REPLY payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub n_buffers: u32,
    pub n_tables: u8,
    pub auxiliary_id: u8,
    pub capabilities: u32,
}

/// What changed about a physical port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PortReason {
    Add = 0,
    Delete = 1,
    Modify = 2,
}

/// PORT_STATUS: a physical port changed on the datapath.
#[derive(Debug, Clone, PartialEq)]
pub struct PortStatus {
    pub reason: PortReason,
    pub desc: PortDesc,
}

/// The message subset this controller sends and receives.
#[derive(Debug, Clone, PartialEq)]
pub enum OfMessage {
    Hello,
    Error {
        err_type: u16,
        code: u16,
        data: Vec<u8>,
    },
    EchoRequest(Vec<u8>),
    EchoReply(Vec<u8>),
    FeaturesRequest,
    FeaturesReply(SwitchFeatures),
    PacketIn(PacketIn),
    PacketOut(PacketOut),
    FlowMod(FlowMod),
    PortStatus(PortStatus),
    PortDescRequest,
    PortDescReply(Vec<PortDesc>),
    PortStatsRequest {
        port_no: u32,
    },
    PortStatsReply(Vec<PortStats>),
    /// A message type the controller does not interpret. Carried so
    /// the session loop can skip it without tearing the session down.
    Other {
        msg_type: u8,
    },
}
