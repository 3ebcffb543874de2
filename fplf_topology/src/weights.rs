//! The FPLF weight function.
//!
//! Idle links deliberately weigh more than lightly used links, so
//! Dijkstra packs new flows onto paths already carrying a little
//! traffic instead of fragmenting capacity across many nearly-idle
//! links. Congested links get roughly twice the idle weight: any
//! non-congested alternative wins, but a congested link remains
//! usable when it is the only one.

/// Weight of a completely idle link.
pub const IDLE_WEIGHT: f64 = 500.0;

/// Weight of a link at or above the congestion threshold.
pub const CONGESTED_WEIGHT: f64 = 1000.0;

/// Base weight of a link from its utilisation and the configured
/// congestion threshold.
pub fn base_weight(utilisation: f64, threshold: f64) -> f64 {
    if utilisation <= 0.0 {
        IDLE_WEIGHT
    } else if utilisation < threshold {
        499.0 - (threshold - utilisation)
    } else {
        CONGESTED_WEIGHT
    }
}

/// Priority scaling: p in {1..4} scales by (5 - p) / 4, so VIDEO
/// (p=4) sees a quarter of the base weight and FTP (p=1) the full
/// weight. Priority 0 (unclassified) behaves like priority 1.
pub fn priority_scale(priority: u8) -> f64 {
    let p = priority.clamp(1, 4);
    (5 - p) as f64 / 4.0
}

/// The adjusted edge weight the FPLF Dijkstra pass runs on.
pub fn adjusted_weight(base: f64, priority: u8) -> f64 {
    base * priority_scale(priority)
}

#[cfg(test)]
mod test {
    use super::*;

    const T: f64 = 0.9;

    #[test]
    fn idle_link_weight() {
        assert_eq!(base_weight(0.0, T), 500.0);
    }

    #[test]
    fn lightly_used_below_idle() {
        let w = base_weight(0.1, T);
        assert!((w - 498.2).abs() < 1e-9);
        assert!(w < IDLE_WEIGHT);
    }

    #[test]
    fn congested_link_weight() {
        assert_eq!(base_weight(0.9, T), 1000.0);
        assert_eq!(base_weight(0.95, T), 1000.0);
        assert_eq!(base_weight(1.0, T), 1000.0);
    }

    #[test]
    fn weight_stays_in_contract_range() {
        for u in [0.0, 0.001, 0.1, 0.5, 0.889, 0.9, 1.0] {
            let w = base_weight(u, T);
            let in_band = w == IDLE_WEIGHT
                || w == CONGESTED_WEIGHT
                || ((499.0 - T)..499.0).contains(&w);
            assert!(in_band, "u={u} produced out-of-band weight {w}");
        }
    }

    #[test]
    fn priority_scales() {
        assert_eq!(priority_scale(1), 1.0);
        assert_eq!(priority_scale(2), 0.75);
        assert_eq!(priority_scale(3), 0.5);
        assert_eq!(priority_scale(4), 0.25);
        // Unclassified behaves like priority 1.
        assert_eq!(priority_scale(0), 1.0);
    }

    #[test]
    fn adjusted_weight_for_video() {
        assert_eq!(adjusted_weight(1000.0, 4), 250.0);
    }
}
