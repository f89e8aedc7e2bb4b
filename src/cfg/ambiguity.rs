#[cfg(feature = "serde")]
use serde::Deserialize;

/// Integer ambiguity resolution policy.
#[derive(Default, Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub enum AmbiguityMode {
    /// No integer resolution: float solutions only.
    Off,
    /// Resolve every epoch from the carried float estimates.
    #[default]
    Continuous,
    /// Resolve from this epoch's information only, ignoring carried
    /// lock history (single epoch resolution).
    Instantaneous,
    /// Resolve, then feed accepted integers back into the filter so
    /// they hold across epochs.
    FixAndHold,
    /// Conservative two-step: fix the integer wide lane combination
    /// once stable, keep the narrow lane float.
    WideNarrowLane,
}

impl std::fmt::Display for AmbiguityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Continuous => write!(f, "continuous"),
            Self::Instantaneous => write!(f, "instantaneous"),
            Self::FixAndHold => write!(f, "fix-and-hold"),
            Self::WideNarrowLane => write!(f, "wide/narrow-lane"),
        }
    }
}

fn default_ratio_threshold() -> f64 {
    3.0
}

fn default_min_lock() -> u32 {
    5
}

/// Integer ambiguity resolution customization.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct AmbiguityConfig {
    /// [AmbiguityMode] policy.
    #[cfg_attr(feature = "serde", serde(default))]
    pub mode: AmbiguityMode,

    /// Second-best / best residual ratio below which an integer
    /// candidate set is rejected.
    #[cfg_attr(feature = "serde", serde(default = "default_ratio_threshold"))]
    pub ratio_threshold: f64,

    /// Minimal lock count (continuous slip-free epochs) before an
    /// ambiguity becomes eligible for fixing.
    #[cfg_attr(feature = "serde", serde(default = "default_min_lock"))]
    pub min_lock: u32,
}

impl Default for AmbiguityConfig {
    fn default() -> Self {
        Self {
            mode: AmbiguityMode::default(),
            ratio_threshold: default_ratio_threshold(),
            min_lock: default_min_lock(),
        }
    }
}
