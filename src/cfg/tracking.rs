use crate::prelude::Duration;

#[cfg(feature = "serde")]
use serde::Deserialize;

fn default_gf_slip_threshold_m() -> f64 {
    0.05
}

fn default_mw_slip_threshold_cycles() -> f64 {
    3.0
}

fn default_max_outage() -> Duration {
    Duration::from_seconds(60.0)
}

fn default_majority_reset_fraction() -> f64 {
    0.5
}

/// Cycle slip detection customization.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct TrackingConfig {
    /// Geometry free combination jump beyond which a slip is declared,
    /// in meters.
    #[cfg_attr(feature = "serde", serde(default = "default_gf_slip_threshold_m"))]
    pub gf_slip_threshold_m: f64,

    /// Melbourne-Wübbena combination jump beyond which a slip is
    /// declared, in wide lane cycles.
    #[cfg_attr(
        feature = "serde",
        serde(default = "default_mw_slip_threshold_cycles")
    )]
    pub mw_slip_threshold_cycles: f64,

    /// Unsolved interval beyond which a carried ambiguity is considered
    /// stale and reset.
    #[cfg_attr(feature = "serde", serde(default = "default_max_outage"))]
    pub max_outage: Duration,

    /// When more than this fraction of common satellites reset on the
    /// same frequency in one epoch, the whole frequency (and the
    /// dynamic block) is treated as freshly initialized. Guards against
    /// receiver clock jumps being misread as simultaneous slips.
    #[cfg_attr(
        feature = "serde",
        serde(default = "default_majority_reset_fraction")
    )]
    pub majority_reset_fraction: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            gf_slip_threshold_m: default_gf_slip_threshold_m(),
            mw_slip_threshold_cycles: default_mw_slip_threshold_cycles(),
            max_outage: default_max_outage(),
            majority_reset_fraction: default_majority_reset_fraction(),
        }
    }
}
