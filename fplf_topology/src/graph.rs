//! The undirected switch graph. Nodes are datapath ids; edges carry
//! the endpoint ports, configured capacity and the last sampled
//! utilisation of each side. Owned by the compute worker; all
//! mutation and reads are serialised there.

use petgraph::stable_graph::{NodeIndex, StableUnGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Per-link state. `a` is always the endpoint with the numerically
/// smaller dpid so the two directions of an undirected link land on
/// one deterministic representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkState {
    pub port_a: u32,
    pub port_b: u32,
    pub capacity_mbps: u32,
    utilisation_a: f64,
    utilisation_b: f64,
}

impl LinkState {
    /// Link utilisation is the maximum of its two endpoint ports.
    pub fn utilisation(&self) -> f64 {
        self.utilisation_a.max(self.utilisation_b)
    }
}

/// Read-only view of one link, as returned to the router.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkView {
    pub a_dpid: u64,
    pub b_dpid: u64,
    pub utilisation: f64,
    pub capacity_mbps: u32,
}

#[derive(Debug, Default)]
pub struct TopologyGraph {
    graph: StableUnGraph<u64, LinkState>,
    nodes: HashMap<u64, NodeIndex>,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a switch. Idempotent.
    pub fn add_switch(&mut self, dpid: u64) {
        self.nodes
            .entry(dpid)
            .or_insert_with(|| self.graph.add_node(dpid));
    }

    /// Remove a switch and every link that touches it.
    pub fn remove_switch(&mut self, dpid: u64) {
        if let Some(index) = self.nodes.remove(&dpid) {
            self.graph.remove_node(index);
        }
    }

    pub fn contains_switch(&self, dpid: u64) -> bool {
        self.nodes.contains_key(&dpid)
    }

    /// Add an undirected link. Both switches are registered if they
    /// were not already. Re-adding an existing link refreshes its
    /// ports and capacity but keeps the sampled utilisation.
    pub fn add_link(&mut self, a_dpid: u64, a_port: u32, b_dpid: u64, b_port: u32, capacity_mbps: u32) {
        if a_dpid == b_dpid {
            warn!("Ignoring self-link on dpid {a_dpid}");
            return;
        }
        self.add_switch(a_dpid);
        self.add_switch(b_dpid);
        // Canonical orientation: endpoint a is the smaller dpid.
        let (lo, lo_port, hi, hi_port) = if a_dpid < b_dpid {
            (a_dpid, a_port, b_dpid, b_port)
        } else {
            (b_dpid, b_port, a_dpid, a_port)
        };
        let lo_idx = self.nodes[&lo];
        let hi_idx = self.nodes[&hi];
        if let Some(edge) = self.graph.find_edge(lo_idx, hi_idx) {
            let state = &mut self.graph[edge];
            state.port_a = lo_port;
            state.port_b = hi_port;
            state.capacity_mbps = capacity_mbps;
        } else {
            self.graph.add_edge(
                lo_idx,
                hi_idx,
                LinkState {
                    port_a: lo_port,
                    port_b: hi_port,
                    capacity_mbps,
                    utilisation_a: 0.0,
                    utilisation_b: 0.0,
                },
            );
            debug!("Link added: s{lo}:{lo_port} <-> s{hi}:{hi_port} ({capacity_mbps} Mbit/s)");
        }
    }

    /// Remove the link between two switches, if present. Paths that
    /// traversed it are stale; callers re-resolve on the next
    /// PACKET_IN.
    pub fn remove_link(&mut self, a_dpid: u64, b_dpid: u64) {
        let (Some(&a), Some(&b)) = (self.nodes.get(&a_dpid), self.nodes.get(&b_dpid)) else {
            return;
        };
        if let Some(edge) = self.graph.find_edge(a, b) {
            self.graph.remove_edge(edge);
            debug!("Link removed: s{a_dpid} <-> s{b_dpid}");
        }
    }

    /// Remove every link attached to (dpid, port). Used when a
    /// PORT_STATUS reports the port down.
    pub fn remove_links_on_port(&mut self, dpid: u64, port: u32) {
        let peers: Vec<u64> = self
            .links()
            .filter(|(view, state)| {
                (view.a_dpid == dpid && state.port_a == port)
                    || (view.b_dpid == dpid && state.port_b == port)
            })
            .map(|(view, _)| if view.a_dpid == dpid { view.b_dpid } else { view.a_dpid })
            .collect();
        for peer in peers {
            self.remove_link(dpid, peer);
        }
    }

    /// The egress port on `from` that reaches its neighbour `to`.
    pub fn egress_port(&self, from: u64, to: u64) -> Option<u32> {
        let (Some(&a), Some(&b)) = (self.nodes.get(&from), self.nodes.get(&to)) else {
            return None;
        };
        let edge = self.graph.find_edge(a, b)?;
        let state = &self.graph[edge];
        if from < to {
            Some(state.port_a)
        } else {
            Some(state.port_b)
        }
    }

    /// True when (dpid, port) has a learned neighbour. Host MACs must
    /// not be learned from such ports.
    pub fn is_inter_switch_port(&self, dpid: u64, port: u32) -> bool {
        self.links().any(|(view, state)| {
            (view.a_dpid == dpid && state.port_a == port)
                || (view.b_dpid == dpid && state.port_b == port)
        })
    }

    /// Update the utilisation of the (dpid, port) side of its link.
    /// No-op for host-facing ports.
    pub fn set_port_utilisation(&mut self, dpid: u64, port: u32, utilisation: f64) {
        let utilisation = utilisation.clamp(0.0, 1.0);
        let Some(&node) = self.nodes.get(&dpid) else {
            return;
        };
        let edges: Vec<_> = self.graph.edges(node).map(|e| e.id()).collect();
        for edge in edges {
            let (a_idx, b_idx) = self.graph.edge_endpoints(edge).expect("edge endpoints");
            let a_dpid = self.graph[a_idx];
            let b_dpid = self.graph[b_idx];
            // Endpoint a of the state is always the smaller dpid.
            let (lo, _hi) = if a_dpid < b_dpid { (a_dpid, b_dpid) } else { (b_dpid, a_dpid) };
            let state = &mut self.graph[edge];
            if lo == dpid {
                if state.port_a == port {
                    state.utilisation_a = utilisation;
                }
            } else if state.port_b == port {
                state.utilisation_b = utilisation;
            }
        }
    }

    /// The capacity of the link incident to (dpid, port), if any.
    pub fn link_capacity_on_port(&self, dpid: u64, port: u32) -> Option<u32> {
        self.links()
            .find(|(view, state)| {
                (view.a_dpid == dpid && state.port_a == port)
                    || (view.b_dpid == dpid && state.port_b == port)
            })
            .map(|(view, _)| view.capacity_mbps)
    }

    /// The link between two switches, if present.
    pub fn link_between(&self, a_dpid: u64, b_dpid: u64) -> Option<LinkView> {
        let (Some(&a), Some(&b)) = (self.nodes.get(&a_dpid), self.nodes.get(&b_dpid)) else {
            return None;
        };
        let edge = self.graph.find_edge(a, b)?;
        let state = &self.graph[edge];
        let (lo, hi) = if a_dpid < b_dpid { (a_dpid, b_dpid) } else { (b_dpid, a_dpid) };
        Some(LinkView {
            a_dpid: lo,
            b_dpid: hi,
            utilisation: state.utilisation(),
            capacity_mbps: state.capacity_mbps,
        })
    }

    /// Neighbours of a switch, sorted for deterministic iteration.
    pub fn neighbours(&self, dpid: u64) -> Vec<u64> {
        let Some(&node) = self.nodes.get(&dpid) else {
            return Vec::new();
        };
        let mut out: Vec<u64> = self.graph.neighbors(node).map(|n| self.graph[n]).collect();
        out.sort_unstable();
        out
    }

    pub fn switch_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn links(&self) -> impl Iterator<Item = (LinkView, &LinkState)> + '_ {
        self.graph.edge_references().map(|edge| {
            let a_dpid = self.graph[edge.source()];
            let b_dpid = self.graph[edge.target()];
            let (lo, hi) = if a_dpid < b_dpid { (a_dpid, b_dpid) } else { (b_dpid, a_dpid) };
            (
                LinkView {
                    a_dpid: lo,
                    b_dpid: hi,
                    utilisation: edge.weight().utilisation(),
                    capacity_mbps: edge.weight().capacity_mbps,
                },
                edge.weight(),
            )
        })
    }
}
