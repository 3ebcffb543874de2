//! The port statistics poller: one scheduled task that asks every
//! connected switch for its port counters once per sampling interval.
//! Replies come back through the sessions as compute events.

use crate::installer::SessionRegistry;
use fplf_proto::{OfMessage, OFPP_ANY};
use std::time::Duration;
use tracing::debug;

pub async fn run_stats_poller(registry: SessionRegistry, interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        for entry in registry.iter() {
            if entry
                .value()
                .send(OfMessage::PortStatsRequest { port_no: OFPP_ANY })
                .is_err()
            {
                debug!("Stats request to {:#018x} not queued; session busy or gone", entry.key());
            }
        }
    }
}
