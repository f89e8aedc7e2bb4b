//! External collaborators the engine consumes through narrow contracts.
use nalgebra::{DMatrix, DVector, Vector3};

use crate::prelude::{Epoch, SV};

/// Finished satellite state, in ECEF coordinates, as provided by an
/// external [EphemerisSource]. The engine never propagates orbits itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SatelliteState {
    /// Position at transmission time, ECEF meters.
    pub position_ecef_m: Vector3<f64>,
    /// Velocity at transmission time, ECEF m/s.
    pub velocity_ecef_m_s: Vector3<f64>,
    /// Onboard clock offset to constellation time, in seconds.
    pub clock_offset_s: f64,
    /// Onboard clock drift, in s/s.
    pub clock_drift_s_s: f64,
    /// Variance of the broadcast/precise state, in m².
    pub variance_m2: f64,
}

/// Any [EphemerisSource] provides satellite states on demand.
/// Implementations must be synchronous and must not perform blocking I/O
/// from within [EphemerisSource::satellite_state]: the engine calls it
/// from its hot loop, several times per epoch.
pub trait EphemerisSource {
    /// Provide the [SatelliteState] for this [SV] at this [Epoch]
    /// (signal transmission time). Returning None drops the vehicle
    /// for the ongoing epoch, it will simply not contribute.
    fn satellite_state(&self, t: Epoch, sv: SV) -> Option<SatelliteState>;
}

/// Which of the two stations a correction is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    Rover,
    Base,
}

impl std::fmt::Display for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Rover => write!(f, "rover"),
            Self::Base => write!(f, "base"),
        }
    }
}

/// Line of sight from a station to one vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineOfSight {
    /// Elevation above local horizon, in radians.
    pub elevation_rad: f64,
    /// Azimuth from north, in radians.
    pub azimuth_rad: f64,
    /// Geodetic latitude of the station, in radians.
    pub latitude_rad: f64,
    /// Geodetic longitude of the station, in radians.
    pub longitude_rad: f64,
    /// Station height above the ellipsoid, in meters.
    pub height_m: f64,
}

/// Atmospheric delays an external [AtmosphereModel] attributes to one
/// line of sight. Both components come back from a single call because
/// the observation equations need them with opposite signs on phase.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AtmosphereCorrections {
    /// Slant troposphere delay, meters.
    pub tropo_delay_m: f64,
    /// Troposphere model variance, m².
    pub tropo_variance_m2: f64,
    /// Slant ionosphere delay scaled to the L1 frequency, meters.
    pub iono_delay_m: f64,
    /// Ionosphere model variance, m².
    pub iono_variance_m2: f64,
}

/// Any [AtmosphereModel] provides slant delay corrections.
/// Must be synchronous and free of blocking I/O, like [EphemerisSource].
pub trait AtmosphereModel {
    /// Provide [AtmosphereCorrections] for this [Site] and [LineOfSight]
    /// at this [Epoch].
    fn corrections(&self, site: Site, t: Epoch, los: LineOfSight) -> AtmosphereCorrections;
}

/// Ranked output of an external integer least squares search.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegerSolution {
    /// Candidate integer vectors, best first. At least one when the
    /// search converged.
    pub candidates: Vec<DVector<f64>>,
    /// Residual quadratic forms, one per candidate, same ordering.
    pub residuals: Vec<f64>,
}

/// Any [AmbiguityResolver] maps a float ambiguity vector and its
/// covariance to ranked integer candidates (LAMBDA and derivatives).
/// The search itself is outside this crate.
pub trait AmbiguityResolver {
    /// Resolve `n_candidates` best integer vectors for this float
    /// estimate. Returning None (or fewer than 2 candidates) makes the
    /// ongoing epoch fall back to a float solution.
    fn resolve(
        &self,
        float: &DVector<f64>,
        covariance: &DMatrix<f64>,
        n_candidates: usize,
    ) -> Option<IntegerSolution>;
}
