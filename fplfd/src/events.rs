//! Events flowing into the compute worker, and the per-switch session
//! handles the worker sends through. All cross-component traffic goes
//! over bounded queues; nothing here blocks an IO task.

use fplf_proto::{OfMessage, PacketIn, PortDesc, PortStats};
use tokio::sync::mpsc;

/// Depth of the outgoing per-session message queue.
pub const SESSION_QUEUE_DEPTH: usize = 256;

/// Everything the compute worker reacts to. Events from one switch
/// arrive in order because each session feeds the single worker
/// queue sequentially.
#[derive(Debug)]
pub enum ComputeEvent {
    SwitchUp {
        dpid: u64,
        ports: Vec<PortDesc>,
    },
    SwitchDown {
        dpid: u64,
    },
    PacketIn {
        dpid: u64,
        packet_in: PacketIn,
    },
    PortStats {
        dpid: u64,
        stats: Vec<PortStats>,
    },
    PortDown {
        dpid: u64,
        port_no: u32,
    },
    /// Link discovery notification (external source, or the static
    /// topology at switch-up).
    LinkAdd {
        a_dpid: u64,
        a_port: u32,
        b_dpid: u64,
        b_port: u32,
        capacity_mbps: Option<u32>,
    },
    LinkRemove {
        a_dpid: u64,
        b_dpid: u64,
    },
}

/// Write-side handle to a switch session. Cloned into the registry
/// so the compute worker and the stats poller can send messages.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<OfMessage>,
}

/// Sending failed: the session is gone or its queue is saturated.
/// Callers treat this as transient.
#[derive(Debug, PartialEq, Eq)]
pub struct SwitchGone;

impl SessionHandle {
    pub fn new(tx: mpsc::Sender<OfMessage>) -> Self {
        Self { tx }
    }

    /// Queue a message toward the switch without blocking.
    pub fn send(&self, msg: OfMessage) -> Result<(), SwitchGone> {
        self.tx.try_send(msg).map_err(|_| SwitchGone)
    }

    /// True when both handles feed the same session.
    pub fn same_channel(&self, other: &SessionHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }
}
