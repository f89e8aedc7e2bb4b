use thiserror::Error;

use crate::prelude::Duration;

/// Malformed or desynchronized input. The engine rejects the epoch pair
/// and retains its prior state.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum InputError {
    /// One of the two stations proposed an empty epoch.
    #[error("empty observation epoch")]
    EmptyEpoch,

    /// Epochs must be proposed in non decreasing time order, per station.
    #[error("observation epochs went back in time")]
    EpochOrder,

    /// Rover and base sampling instants differ beyond the configured tolerance.
    /// We skip such pairs, we never interpolate over them.
    #[error("rover/base desynchronized by {0}")]
    TimeSkew(Duration),

    /// Differential navigation requires the reference site coordinates.
    #[error("missing base station position")]
    MissingBasePosition,
}

/// Not enough (or too poor) geometry to attempt an adjustment.
/// Reported per epoch, prior state retained.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum GeometryError {
    /// Fewer usable observations than solved-for parameters.
    #[error("not enough satellites ({got} for {needed} parameters)")]
    NotEnoughSatellites { needed: usize, got: usize },

    /// The rover/base intersection left no workable double difference.
    #[error("not enough common satellites")]
    NotEnoughCommonSatellites,

    /// Bad signal data or degenerate geometry made the normal equations singular.
    #[error("singular design matrix")]
    SingularDesign,
}

/// Integer ambiguity resolution did not succeed. Never run-terminating:
/// the epoch downgrades to a float solution.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ResolutionError {
    /// No ambiguity currently satisfies the eligibility criteria (age, no reset).
    #[error("no eligible double difference ambiguity")]
    NoEligibleAmbiguities,

    /// The external integer search failed to produce candidates.
    #[error("integer resolver failure")]
    ResolverFailure,

    /// The second-best/best residual ratio fell below the acceptance threshold.
    #[error("ratio test failed ({ratio:.2} < {threshold:.2})")]
    RatioTest { ratio: f64, threshold: f64 },
}

/// Numerical corruption detected during an update. The affected block is
/// defensively reset rather than letting invalid values propagate.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum NumericError {
    /// Covariance lost positive semi-definiteness.
    #[error("covariance is not positive semi-definite")]
    CovarianceNotPositive,

    /// A matrix inversion failed.
    #[error("failed to invert matrix")]
    MatrixInversion,
}

/// Epoch-scoped engine error. Every variant downgrades the fix status of
/// the running epoch; none of them terminates a processing session.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Error {
    #[error("input: {0}")]
    Input(#[from] InputError),

    #[error("geometry: {0}")]
    Geometry(#[from] GeometryError),

    #[error("resolution: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("numeric: {0}")]
    Numeric(#[from] NumericError),
}
