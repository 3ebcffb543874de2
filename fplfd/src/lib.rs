//! The FPLF controller daemon: OpenFlow 1.3 sessions, a single
//! compute worker owning topology and routing state, a port-stats
//! poller, the packet capture pipeline and the classification
//! reloader.

pub mod capture;
pub mod compute;
pub mod events;
pub mod installer;
pub mod reload;
pub mod session;
pub mod stats;
