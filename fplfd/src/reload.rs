//! Periodic classification table reload. The offline pipeline
//! atomically replaces the CSV; this task re-reads it on a fixed tick
//! and swaps the in-memory snapshot in one pointer store, so the
//! compute worker never sees a half-loaded table.

use arc_swap::ArcSwap;
use fplf_config::ClassificationTable;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Load the table, mapping failure to the empty table: a missing or
/// corrupt file means every flow is UNKNOWN until the pipeline
/// produces a fresh one.
pub fn load_or_empty(path: &std::path::Path) -> ClassificationTable {
    match ClassificationTable::load(path) {
        Ok(table) => {
            info!("Loaded {} classification records from {}", table.len(), path.display());
            table
        }
        Err(e) => {
            warn!("Classification table unavailable ({e}); treating all flows as UNKNOWN");
            ClassificationTable::default()
        }
    }
}

pub async fn run_reloader(
    table: Arc<ArcSwap<ClassificationTable>>,
    path: PathBuf,
    period_secs: u64,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(period_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; the startup load already
    // happened, skip it.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let fresh = load_or_empty(&path);
        table.store(Arc::new(fresh));
    }
}
