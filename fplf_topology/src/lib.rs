//! The link-state topology: an undirected switch graph fed by link
//! events and port counters, the FPLF weight function, and the
//! priority-aware Dijkstra router.

mod graph;
mod monitor;
mod router;
pub mod weights;

pub use graph::{LinkView, TopologyGraph};
pub use monitor::{port_utilisation, PortSampler};
pub use router::{route, EdgeWeights, RouteError, RouteOutcome};
