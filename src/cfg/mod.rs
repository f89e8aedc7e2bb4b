//! Engine configuration. One immutable [Config] is built before the run
//! and passed by reference: no process-wide mutable state.
use crate::prelude::Duration;

#[cfg(feature = "serde")]
use serde::Deserialize;

mod ambiguity;
mod solver;
mod tracking;

pub use ambiguity::{AmbiguityConfig, AmbiguityMode};
pub use solver::{Discipline, InitialVariances, MeasurementErrorModel, ProcessNoise, SolverConfig};
pub use tracking::TrackingConfig;

/// Positioning technique, selected once per run.
#[derive(Default, Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub enum PositioningMode {
    /// Absolute single point positioning of the rover, code only.
    Single,
    /// Code-only differential positioning against the base.
    Dgps,
    /// Carrier phase RTK with a roaming rover.
    #[default]
    Kinematic,
    /// Carrier phase RTK with a static rover.
    Static,
    /// Carrier phase RTK where the base itself roams; the baseline
    /// length may be constrained, see [Config::baseline_constraint].
    MovingBase,
    /// Rover coordinates are known and held; only ambiguities and
    /// atmosphere parameters are estimated.
    Fixed,
}

impl PositioningMode {
    /// True if this mode forms carrier phase double differences.
    pub(crate) fn is_rtk(&self) -> bool {
        matches!(
            self,
            Self::Kinematic | Self::Static | Self::MovingBase | Self::Fixed
        )
    }

    /// True if the dynamic block carries velocity states.
    pub(crate) fn estimates_velocity(&self) -> bool {
        matches!(self, Self::Kinematic | Self::MovingBase)
    }
}

impl std::fmt::Display for PositioningMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Dgps => write!(f, "dgps"),
            Self::Kinematic => write!(f, "kinematic"),
            Self::Static => write!(f, "static"),
            Self::MovingBase => write!(f, "moving-base"),
            Self::Fixed => write!(f, "fixed"),
        }
    }
}

/// Baseline length constraint, used by [PositioningMode::MovingBase].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct BaselineConstraint {
    /// Constrained rover-base distance, in meters.
    pub length_m: f64,
    /// One sigma uncertainty on that distance, in meters.
    pub sigma_m: f64,
}

fn default_frequencies() -> usize {
    2
}

fn default_min_elevation_deg() -> f64 {
    15.0
}

fn default_max_time_skew() -> Duration {
    Duration::from_seconds(30.0)
}

fn default_history_depth() -> usize {
    100
}

/// Engine [Config]uration. Built once, never mutated during a run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct Config {
    /// [PositioningMode] in use for the entire run.
    #[cfg_attr(feature = "serde", serde(default))]
    pub mode: PositioningMode,

    /// Number of frequency slots to process (1 or 2).
    #[cfg_attr(feature = "serde", serde(default = "default_frequencies"))]
    pub frequencies: usize,

    /// Minimal elevation angle for an SV to contribute, in degrees.
    #[cfg_attr(feature = "serde", serde(default = "default_min_elevation_deg"))]
    pub min_elevation_deg: f64,

    /// Minimal SNR for a signal to contribute, in dB/Hz.
    #[cfg_attr(feature = "serde", serde(default))]
    pub min_snr_dbhz: Option<f64>,

    /// Maximal tolerated rover/base sampling skew. Pairs beyond this
    /// are rejected, never interpolated.
    #[cfg_attr(feature = "serde", serde(default = "default_max_time_skew"))]
    pub max_time_skew: Duration,

    /// Reference site coordinates, in ECEF meters. Mandatory for all
    /// differential modes except [PositioningMode::MovingBase].
    #[cfg_attr(feature = "serde", serde(default))]
    pub base_position_ecef_m: Option<(f64, f64, f64)>,

    /// Known rover coordinates for [PositioningMode::Fixed], ECEF meters.
    #[cfg_attr(feature = "serde", serde(default))]
    pub rover_position_ecef_m: Option<(f64, f64, f64)>,

    /// Optional [BaselineConstraint] for [PositioningMode::MovingBase].
    #[cfg_attr(feature = "serde", serde(default))]
    pub baseline_constraint: Option<BaselineConstraint>,

    /// Rover antenna reference point offset, ENU meters.
    #[cfg_attr(feature = "serde", serde(default))]
    pub rover_antenna_enu_m: Option<(f64, f64, f64)>,

    /// Base antenna reference point offset, ENU meters.
    #[cfg_attr(feature = "serde", serde(default))]
    pub base_antenna_enu_m: Option<(f64, f64, f64)>,

    /// Estimate slant ionosphere delays as parameters (one per common
    /// SV) instead of trusting the external model corrections.
    #[cfg_attr(feature = "serde", serde(default))]
    pub estimate_ionosphere: bool,

    /// Estimate residual zenith troposphere delays (rover and base).
    #[cfg_attr(feature = "serde", serde(default))]
    pub estimate_troposphere: bool,

    /// Depth of the solution history ring buffer.
    #[cfg_attr(feature = "serde", serde(default = "default_history_depth"))]
    pub history_depth: usize,

    /// Estimation process customization.
    #[cfg_attr(feature = "serde", serde(default))]
    pub solver: SolverConfig,

    /// Cycle slip detection customization.
    #[cfg_attr(feature = "serde", serde(default))]
    pub tracking: TrackingConfig,

    /// Integer ambiguity resolution customization.
    #[cfg_attr(feature = "serde", serde(default))]
    pub ambiguity: AmbiguityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: PositioningMode::default(),
            frequencies: default_frequencies(),
            min_elevation_deg: default_min_elevation_deg(),
            min_snr_dbhz: None,
            max_time_skew: default_max_time_skew(),
            base_position_ecef_m: None,
            rover_position_ecef_m: None,
            baseline_constraint: None,
            rover_antenna_enu_m: None,
            base_antenna_enu_m: None,
            estimate_ionosphere: false,
            estimate_troposphere: false,
            history_depth: default_history_depth(),
            solver: SolverConfig::default(),
            tracking: TrackingConfig::default(),
            ambiguity: AmbiguityConfig::default(),
        }
    }
}

impl Config {
    /// Returns [Config] for static RTK surveying against a reference
    /// site at these ECEF coordinates (meters). Customize as you will.
    pub fn static_rtk_preset(base_position_ecef_m: (f64, f64, f64)) -> Self {
        let mut s = Self::default();
        s.mode = PositioningMode::Static;
        s.base_position_ecef_m = Some(base_position_ecef_m);
        s
    }

    /// Returns [Config] for kinematic (roaming rover) RTK against a
    /// reference site at these ECEF coordinates (meters).
    pub fn kinematic_rtk_preset(base_position_ecef_m: (f64, f64, f64)) -> Self {
        let mut s = Self::default();
        s.mode = PositioningMode::Kinematic;
        s.base_position_ecef_m = Some(base_position_ecef_m);
        s
    }

    /// Returns [Config] for moving baseline processing (attitude or
    /// relative navigation between two roaming antennas), with the
    /// baseline length constrained to `length_m` at one `sigma_m`.
    pub fn moving_base_preset(length_m: f64, sigma_m: f64) -> Self {
        let mut s = Self::default();
        s.mode = PositioningMode::MovingBase;
        s.baseline_constraint = Some(BaselineConstraint { length_m, sigma_m });
        s
    }

    /// Returns [Config] for code-only differential (DGPS) positioning.
    pub fn dgps_preset(base_position_ecef_m: (f64, f64, f64)) -> Self {
        let mut s = Self::default();
        s.mode = PositioningMode::Dgps;
        s.base_position_ecef_m = Some(base_position_ecef_m);
        s.ambiguity.mode = AmbiguityMode::Off;
        s
    }

    /// Frequency slots in use, clamped to what the engine supports.
    pub(crate) fn frequency_slots(&self) -> usize {
        self.frequencies.clamp(1, 2)
    }
}
