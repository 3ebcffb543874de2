//! Port counter sampling. Turns raw cumulative byte counters from
//! PORT_STATS replies into per-interval megabit rates.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct PrevSample {
    total_bytes: u64,
    at: f64,
}

/// Tracks the previous counter reading per (dpid, port) and derives
/// the rate over the elapsed interval.
#[derive(Debug, Default)]
pub struct PortSampler {
    prev: HashMap<(u64, u32), PrevSample>,
}

impl PortSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a counter reading (tx + rx bytes) taken at `now`
    /// (seconds). Returns the rate in Mbit/s over the elapsed
    /// interval, or `None` on the very first sample for this port.
    ///
    /// Counter resets (switch reboot) show up as a negative delta and
    /// are treated as zero.
    pub fn record(&mut self, dpid: u64, port: u32, total_bytes: u64, now: f64) -> Option<f64> {
        let key = (dpid, port);
        let prev = self.prev.insert(key, PrevSample { total_bytes, at: now });
        let prev = prev?;
        let interval = now - prev.at;
        if interval <= 0.0 {
            return None;
        }
        let delta = total_bytes.saturating_sub(prev.total_bytes);
        Some((delta as f64 * 8.0) / (interval * 1_000_000.0))
    }

    /// Forget a switch entirely, so a reconnect starts from a fresh
    /// baseline.
    pub fn forget_switch(&mut self, dpid: u64) {
        self.prev.retain(|(d, _), _| *d != dpid);
    }
}

/// Utilisation of a port given its rate and the link capacity,
/// clamped to [0, 1].
pub fn port_utilisation(mbps: f64, capacity_mbps: u32) -> f64 {
    if capacity_mbps == 0 {
        return 0.0;
    }
    (mbps / capacity_mbps as f64).clamp(0.0, 1.0)
}
