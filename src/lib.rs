#![doc = include_str!("../README.md")]
#![cfg_attr(docrs, feature(doc_cfg))]

extern crate gnss_rs as gnss;

// private modules
mod ambiguity;
mod carrier;
mod cfg;
mod constants;
mod dd;
mod engine;
mod epoch;
mod error;
mod estimator;
mod geo;
mod matcher;
mod providers;
mod sd;
mod solutions;
mod spp;
mod tracker;

#[cfg(test)]
mod tests;

// prelude
pub mod prelude {
    pub use crate::carrier::Carrier;
    pub use crate::cfg::{
        AmbiguityConfig, AmbiguityMode, BaselineConstraint, Config, Discipline, InitialVariances,
        MeasurementErrorModel, PositioningMode, ProcessNoise, SolverConfig, TrackingConfig,
    };
    pub use crate::engine::RtkEngine;
    pub use crate::epoch::{ObservationEpoch, SatelliteObservation, SignalObservation};
    pub use crate::error::{Error, GeometryError, InputError, NumericError, ResolutionError};
    pub use crate::providers::{
        AmbiguityResolver, AtmosphereCorrections, AtmosphereModel, EphemerisSource,
        IntegerSolution, LineOfSight, SatelliteState, Site,
    };
    pub use crate::solutions::{
        AmbiguitySnapshot, FixStatus, SatelliteDiagnostic, SolutionRecord,
    };
    pub use crate::spp::{SkyView, SppSolution};
    pub use crate::tracker::TrackState;
    // re-export
    pub use gnss::prelude::{Constellation, SV};
    pub use hifitime::{Duration, Epoch, TimeScale, Unit};
    pub use nalgebra::{DMatrix, DVector, Vector3};
}

// pub export
pub use error::Error;
