//! Path computation: the baseline hop-count path and the FPLF path
//! over priority-adjusted weights, with route-change detection.

use crate::graph::TopologyGraph;
use crate::weights::{adjusted_weight, base_weight};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use thiserror::Error;

/// The per-edge weights of a computed path, kept for route logging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeWeights {
    pub a_dpid: u64,
    pub b_dpid: u64,
    pub w_base: f64,
    pub w_adj: f64,
}

/// A computed route: the FPLF path, the baseline it is compared
/// against, and the edge weight vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteOutcome {
    pub path: Vec<u64>,
    pub baseline: Vec<u64>,
    pub route_changed: bool,
    pub edges: Vec<EdgeWeights>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RouteError {
    #[error("No path between the requested switches")]
    NoRoute,
}

/// Compute a route between two switches.
///
/// `priority` is the traffic priority (0..=4, 0 meaning
/// unclassified); `threshold` is the congestion cut-off the weight
/// function runs with.
pub fn route(
    graph: &TopologyGraph,
    src_dpid: u64,
    dst_dpid: u64,
    priority: u8,
    threshold: f64,
) -> Result<RouteOutcome, RouteError> {
    // Same-switch traffic never consults the topology.
    if src_dpid == dst_dpid {
        return Ok(RouteOutcome {
            path: vec![src_dpid],
            baseline: vec![src_dpid],
            route_changed: false,
            edges: Vec::new(),
        });
    }
    if !graph.contains_switch(src_dpid) || !graph.contains_switch(dst_dpid) {
        return Err(RouteError::NoRoute);
    }

    let fplf = dijkstra(graph, src_dpid, dst_dpid, |u| {
        adjusted_weight(base_weight(u, threshold), priority)
    })
    .ok_or(RouteError::NoRoute)?;
    let baseline =
        dijkstra(graph, src_dpid, dst_dpid, |_| 1.0).ok_or(RouteError::NoRoute)?;

    let edges = fplf
        .windows(2)
        .map(|pair| {
            let link = graph
                .link_between(pair[0], pair[1])
                .expect("path edges exist in the graph snapshot");
            let w_base = base_weight(link.utilisation, threshold);
            EdgeWeights {
                a_dpid: pair[0],
                b_dpid: pair[1],
                w_base,
                w_adj: adjusted_weight(w_base, priority),
            }
        })
        .collect();

    Ok(RouteOutcome {
        route_changed: fplf != baseline,
        baseline,
        edges,
        path: fplf,
    })
}

/// Total cost wrapper so f64 path costs can live in the heap. Weights
/// are finite by construction, so `total_cmp` is a sound ordering.
#[derive(PartialEq)]
struct Cost(f64);

impl Eq for Cost {}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cost {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Dijkstra with deterministic tie-breaks: the heap orders by
/// (cost, dpid) and an equal-cost relaxation keeps the predecessor
/// with the smaller dpid, so identical graph state always yields the
/// identical path.
fn dijkstra(
    graph: &TopologyGraph,
    src: u64,
    dst: u64,
    weight_of: impl Fn(f64) -> f64,
) -> Option<Vec<u64>> {
    let mut dist: HashMap<u64, f64> = HashMap::new();
    let mut pred: HashMap<u64, u64> = HashMap::new();
    let mut heap: BinaryHeap<Reverse<(Cost, u64)>> = BinaryHeap::new();

    dist.insert(src, 0.0);
    heap.push(Reverse((Cost(0.0), src)));

    while let Some(Reverse((Cost(cost), node))) = heap.pop() {
        if cost > *dist.get(&node).unwrap_or(&f64::INFINITY) {
            continue;
        }
        for neighbour in graph.neighbours(node) {
            let link = graph
                .link_between(node, neighbour)
                .expect("neighbour implies link");
            let next_cost = cost + weight_of(link.utilisation);
            match dist.get(&neighbour) {
                Some(&existing) if next_cost > existing => {}
                Some(&existing) if next_cost == existing => {
                    if let Some(previous) = pred.get_mut(&neighbour) {
                        if node < *previous {
                            *previous = node;
                        }
                    }
                }
                _ => {
                    dist.insert(neighbour, next_cost);
                    pred.insert(neighbour, node);
                    heap.push(Reverse((Cost(next_cost), neighbour)));
                }
            }
        }
    }

    if !dist.contains_key(&dst) {
        return None;
    }
    let mut path = vec![dst];
    let mut current = dst;
    while current != src {
        current = *pred.get(&current)?;
        path.push(current);
    }
    path.reverse();
    Some(path)
}
