//! Flow installation along computed paths: forward and symmetric
//! reverse rules, packet-out before install, ingress-first rule
//! replacement on reroute, and retry-once failure handling.

use crate::events::SessionHandle;
use dashmap::DashMap;
use fplf_proto::{Action, FlowMatch, FlowMod, FlowModCommand, OfMessage, PacketOut, OFP_NO_BUFFER};
use fplf_utils::MacAddr;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Flow rules sit above the table-miss (0) and below the ARP punt
/// rule (100); the traffic priority is folded in so more important
/// classes also win in the flow table.
pub const FLOW_PRIORITY_BASE: u16 = 10;

pub type SessionRegistry = Arc<DashMap<u64, SessionHandle>>;

/// One hop of an installed path: the switch and its egress port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathHop {
    pub dpid: u64,
    pub out_port: u32,
}

#[derive(Debug, Clone, PartialEq)]
struct InstalledPath {
    forward: Vec<PathHop>,
    reverse: Vec<PathHop>,
    flow_match: FlowMatch,
    priority: u16,
}

/// What an install attempt amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallReport {
    /// Fresh rules went in along the whole path.
    Installed,
    /// The same path was already installed; only the packet-out went
    /// out.
    Unchanged,
    /// An existing path was replaced.
    Rerouted,
    /// One or more FLOW_MODs failed after a retry; the next
    /// PACKET_IN recomputes and reinstalls.
    PartialFailure,
    /// The operation ran over its budget and outstanding mods were
    /// cancelled.
    BudgetExceeded,
}

/// The packet that triggered the computation, replayed through the
/// first hop so nothing is lost between decision and install.
pub struct TriggerPacket {
    pub in_port: u32,
    pub data: Vec<u8>,
}

pub struct FlowInstaller {
    installed: HashMap<(MacAddr, MacAddr), InstalledPath>,
    idle_timeout: u16,
    hard_timeout: u16,
    budget: Duration,
}

impl FlowInstaller {
    pub fn new(idle_timeout: u16, hard_timeout: u16, budget: Duration) -> Self {
        Self {
            installed: HashMap::new(),
            idle_timeout,
            hard_timeout,
            budget,
        }
    }

    /// Install (or re-install) the path for one (src, dst) MAC pair.
    /// Installs for a single pair are strictly serialised by virtue
    /// of running on the compute worker.
    #[allow(clippy::too_many_arguments)]
    pub fn install(
        &mut self,
        registry: &SessionRegistry,
        src_mac: MacAddr,
        dst_mac: MacAddr,
        forward: Vec<PathHop>,
        reverse: Vec<PathHop>,
        flow_match: FlowMatch,
        traffic_priority: u8,
        trigger: TriggerPacket,
        started: Instant,
    ) -> InstallReport {
        let priority = FLOW_PRIORITY_BASE + traffic_priority as u16;
        let key = (src_mac, dst_mac);

        // Replay the triggering packet through the first hop before
        // any rule changes.
        if let Some(first) = forward.first() {
            self.packet_out(registry, first.dpid, trigger.in_port, first.out_port, trigger.data);
        }

        let new_path = InstalledPath { forward, reverse, flow_match, priority };

        let existing = self.installed.get(&key).cloned();
        match existing {
            Some(existing) if existing == new_path => {
                // Identical path. The switch only punts a packet when
                // its rule is missing (fresh connect or idle-timeout
                // expiry), so re-ADD the same rules: a no-op for a
                // populated table, a repair for an expired one.
                let report = self.add_path(registry, &new_path, started);
                if report == InstallReport::Installed {
                    InstallReport::Unchanged
                } else {
                    self.installed.remove(&key);
                    report
                }
            }
            Some(existing) => {
                let report = self.replace_path(registry, &key, &existing, &new_path, started);
                if report == InstallReport::Rerouted {
                    self.installed.insert(key, new_path);
                } else {
                    self.installed.remove(&key);
                }
                report
            }
            None => {
                let report = self.add_path(registry, &new_path, started);
                if report == InstallReport::Installed {
                    self.installed.insert(key, new_path);
                } else {
                    self.installed.remove(&key);
                }
                report
            }
        }
    }

    /// Drop install state that references a switch. Used when a
    /// switch arrives (stale rules are wiped on the switch itself)
    /// or leaves.
    pub fn forget_switch(&mut self, dpid: u64) {
        self.installed
            .retain(|_, path| !path.forward.iter().any(|hop| hop.dpid == dpid));
    }

    /// Number of currently tracked paths.
    pub fn tracked_paths(&self) -> usize {
        self.installed.len()
    }

    fn add_path(
        &self,
        registry: &SessionRegistry,
        path: &InstalledPath,
        started: Instant,
    ) -> InstallReport {
        let mut failed = false;
        for hop in &path.forward {
            if self.over_budget(started) {
                return InstallReport::BudgetExceeded;
            }
            failed |= !self.send_flow_mod(
                registry,
                hop.dpid,
                self.flow_mod(FlowModCommand::Add, path.flow_match, path.priority, hop.out_port),
            );
        }
        // The reverse direction follows the same path, installed from
        // the far end back.
        for hop in &path.reverse {
            if self.over_budget(started) {
                return InstallReport::BudgetExceeded;
            }
            failed |= !self.send_flow_mod(
                registry,
                hop.dpid,
                self.flow_mod(
                    FlowModCommand::Add,
                    path.flow_match.reversed(),
                    path.priority,
                    hop.out_port,
                ),
            );
        }
        if failed {
            warn!("Partial install: at least one FLOW_MOD was not accepted; will retry on next PACKET_IN");
            InstallReport::PartialFailure
        } else {
            InstallReport::Installed
        }
    }

    /// Replace an installed path with a new one. Rules are rewritten
    /// ingress-first so no switch ever forwards "the new way" toward
    /// a next hop still holding the old rule; rules on switches that
    /// left the path are deleted last.
    fn replace_path(
        &self,
        registry: &SessionRegistry,
        key: &(MacAddr, MacAddr),
        old: &InstalledPath,
        new: &InstalledPath,
        started: Instant,
    ) -> InstallReport {
        let mut failed = false;

        let old_forward: Vec<u64> = old.forward.iter().map(|h| h.dpid).collect();
        let old_reverse: Vec<u64> = old.reverse.iter().map(|h| h.dpid).collect();

        for hop in &new.forward {
            if self.over_budget(started) {
                return InstallReport::BudgetExceeded;
            }
            let command = if old_forward.contains(&hop.dpid) {
                FlowModCommand::ModifyStrict
            } else {
                FlowModCommand::Add
            };
            failed |= !self.send_flow_mod(
                registry,
                hop.dpid,
                self.flow_mod(command, new.flow_match, new.priority, hop.out_port),
            );
        }
        for hop in &new.reverse {
            if self.over_budget(started) {
                return InstallReport::BudgetExceeded;
            }
            let command = if old_reverse.contains(&hop.dpid) {
                FlowModCommand::ModifyStrict
            } else {
                FlowModCommand::Add
            };
            failed |= !self.send_flow_mod(
                registry,
                hop.dpid,
                self.flow_mod(command, new.flow_match.reversed(), new.priority, hop.out_port),
            );
        }

        // Switches that are no longer on the path lose their rules
        // last, after the new path is forwarding end to end.
        let new_switches: Vec<u64> = new.forward.iter().map(|h| h.dpid).collect();
        for hop in old.forward.iter().filter(|h| !new_switches.contains(&h.dpid)) {
            if self.over_budget(started) {
                return InstallReport::BudgetExceeded;
            }
            failed |= !self.send_flow_mod(
                registry,
                hop.dpid,
                self.delete_mod(old.flow_match, old.priority),
            );
            failed |= !self.send_flow_mod(
                registry,
                hop.dpid,
                self.delete_mod(old.flow_match.reversed(), old.priority),
            );
        }

        if failed {
            warn!(
                "Partial reroute for {} -> {}; traffic continues on whichever rules are in effect",
                key.0, key.1
            );
            InstallReport::PartialFailure
        } else {
            info!("Rerouted {} -> {}", key.0, key.1);
            InstallReport::Rerouted
        }
    }

    fn flow_mod(
        &self,
        command: FlowModCommand,
        flow_match: FlowMatch,
        priority: u16,
        out_port: u32,
    ) -> FlowMod {
        let mut fm = FlowMod::add(flow_match, vec![Action::output(out_port)], priority);
        fm.command = command;
        fm.idle_timeout = self.idle_timeout;
        fm.hard_timeout = self.hard_timeout;
        fm
    }

    fn delete_mod(&self, flow_match: FlowMatch, priority: u16) -> FlowMod {
        let mut fm = FlowMod::add(flow_match, Vec::new(), priority);
        fm.command = FlowModCommand::DeleteStrict;
        fm
    }

    /// Send with a single retry. Returns false when the mod was
    /// dropped for good; the caller logs and moves on, the next
    /// PACKET_IN re-triggers computation.
    fn send_flow_mod(&self, registry: &SessionRegistry, dpid: u64, fm: FlowMod) -> bool {
        let Some(handle) = registry.get(&dpid) else {
            debug!("No session for dpid {dpid}; switch gone");
            return false;
        };
        let msg = OfMessage::FlowMod(fm);
        if handle.send(msg.clone()).is_ok() {
            return true;
        }
        if handle.send(msg).is_ok() {
            return true;
        }
        warn!("FLOW_MOD to {dpid:#018x} failed twice; dropping");
        false
    }

    fn packet_out(
        &self,
        registry: &SessionRegistry,
        dpid: u64,
        in_port: u32,
        out_port: u32,
        data: Vec<u8>,
    ) {
        let Some(handle) = registry.get(&dpid) else {
            return;
        };
        let _ = handle.send(OfMessage::PacketOut(PacketOut {
            buffer_id: OFP_NO_BUFFER,
            in_port,
            actions: vec![Action::output(out_port)],
            data,
        }));
    }

    fn over_budget(&self, started: Instant) -> bool {
        if started.elapsed() > self.budget {
            warn!(
                "Slow path: route+install exceeded its {}ms budget; cancelling outstanding FLOW_MODs",
                self.budget.as_millis()
            );
            true
        } else {
            false
        }
    }
}
