//! Per-epoch authoritative output and bounded history.
use std::collections::{BTreeMap, VecDeque};

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::prelude::{Epoch, Error, SV};

/// Authority level of a published solution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FixStatus {
    /// Epoch could not be solved.
    #[default]
    None,
    /// Absolute single point fix.
    Single,
    /// Code differential fix.
    Dgps,
    /// Carrier phase fix with float ambiguities.
    Float,
    /// Carrier phase fix with validated integer ambiguities.
    Fixed,
}

impl std::fmt::Display for FixStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Single => write!(f, "single"),
            Self::Dgps => write!(f, "dgps"),
            Self::Float => write!(f, "float"),
            Self::Fixed => write!(f, "fixed"),
        }
    }
}

/// Per-vehicle diagnostics of one processed epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SatelliteDiagnostic {
    /// Elevation at rover, degrees.
    pub elevation_deg: f64,
    /// Azimuth at rover, degrees.
    pub azimuth_deg: f64,
    /// Lock count on the primary frequency.
    pub lock: u32,
    /// Carried float ambiguity on the primary frequency, cycles.
    pub ambiguity_cycles: f64,
    /// True if this vehicle is the constellation reference.
    pub reference: bool,
    /// True if an integer fix currently holds on this vehicle.
    pub fixed: bool,
    /// True if a slip was declared this epoch.
    pub slip: bool,
}

/// Float (and possibly fixed) ambiguity snapshot.
#[derive(Debug, Clone)]
pub struct AmbiguitySnapshot {
    /// Channels in vector order.
    pub channels: Vec<(SV, usize)>,
    /// Float estimate, cycles.
    pub float: DVector<f64>,
    /// Float covariance.
    pub float_covariance: DMatrix<f64>,
    /// Fixed double difference integers, when an integer solution
    /// passed validation.
    pub fixed: Option<DVector<f64>>,
}

impl Default for AmbiguitySnapshot {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            float: DVector::zeros(0),
            float_covariance: DMatrix::zeros(0, 0),
            fixed: None,
        }
    }
}

/// Immutable per-epoch output record.
#[derive(Debug, Clone, Default)]
pub struct SolutionRecord {
    /// Sampling [Epoch] (rover).
    pub epoch: Epoch,
    /// [FixStatus] of the authoritative state.
    pub status: FixStatus,
    /// Rover position, ECEF meters.
    pub position_ecef_m: Vector3<f64>,
    /// Rover velocity, ECEF m/s, when the motion model carries one.
    pub velocity_ecef_m_s: Option<Vector3<f64>>,
    /// Position covariance block, m².
    pub position_covariance_m2: Matrix3<f64>,
    /// Ambiguity state, when carrier phase was processed.
    pub ambiguities: AmbiguitySnapshot,
    /// Integer validation ratio (second-best / best). Zero when no
    /// resolution was attempted.
    pub ratio: f64,
    /// Per-vehicle diagnostics.
    pub satellites: BTreeMap<SV, SatelliteDiagnostic>,
    /// Epoch-scoped error, when the epoch could not be (fully) solved.
    pub error: Option<Error>,
}

impl SolutionRecord {
    /// Unsolved record: prior state untouched, error surfaced.
    pub(crate) fn unsolved(epoch: Epoch, error: Error) -> Self {
        Self {
            epoch,
            status: FixStatus::None,
            error: Some(error),
            ..Default::default()
        }
    }
}

impl std::fmt::Display for SolutionRecord {
    /// Human readable per-epoch dump (side channel only).
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(
            f,
            "{} status={} ratio={:.1} pos=({:.4}, {:.4}, {:.4})",
            self.epoch,
            self.status,
            self.ratio,
            self.position_ecef_m[0],
            self.position_ecef_m[1],
            self.position_ecef_m[2],
        )?;

        for (sv, diag) in self.satellites.iter() {
            writeln!(
                f,
                "  {} az={:6.1} el={:5.1} lock={:4} amb={:14.3}{}{}{}",
                sv,
                diag.azimuth_deg,
                diag.elevation_deg,
                diag.lock,
                diag.ambiguity_cycles,
                if diag.reference { " REF" } else { "" },
                if diag.fixed { " FIX" } else { "" },
                if diag.slip { " SLIP" } else { "" },
            )?;
        }

        Ok(())
    }
}

/// Bounded solution history: the previous record feeds the next
/// epoch's propagation, the rest serves reporting.
#[derive(Debug, Clone, Default)]
pub(crate) struct SolutionHistory {
    depth: usize,
    inner: VecDeque<SolutionRecord>,
}

impl SolutionHistory {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            inner: VecDeque::with_capacity(depth.max(1)),
        }
    }

    /// Appends, evicting the oldest record once at depth.
    pub fn push(&mut self, record: SolutionRecord) {
        if self.inner.len() == self.depth {
            self.inner.pop_front();
        }
        self.inner.push_back(record);
    }

    /// Most recent record.
    pub fn latest(&self) -> Option<&SolutionRecord> {
        self.inner.back()
    }

    /// Most recent record that actually solved.
    pub fn latest_solved(&self) -> Option<&SolutionRecord> {
        self.inner
            .iter()
            .rev()
            .find(|rec| rec.status != FixStatus::None)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SolutionRecord> {
        self.inner.iter()
    }
}

#[cfg(test)]
mod test {
    use super::{FixStatus, SolutionHistory, SolutionRecord};
    use crate::prelude::Epoch;
    use hifitime::Unit;

    #[test]
    fn history_is_bounded() {
        let mut history = SolutionHistory::new(3);
        let t0 = Epoch::default();

        for k in 0..5 {
            let mut record = SolutionRecord::default();
            record.epoch = t0 + (k as f64) * Unit::Second;
            record.status = FixStatus::Float;
            history.push(record);
        }

        assert_eq!(history.len(), 3);
        assert_eq!(
            history.latest().unwrap().epoch,
            t0 + 4.0 * Unit::Second
        );
        // oldest two evicted
        assert_eq!(
            history.iter().next().unwrap().epoch,
            t0 + 2.0 * Unit::Second
        );
    }

    #[test]
    fn latest_solved_skips_unsolved() {
        let mut history = SolutionHistory::new(4);
        let t0 = Epoch::default();

        let mut solved = SolutionRecord::default();
        solved.epoch = t0;
        solved.status = FixStatus::Fixed;
        history.push(solved);

        let unsolved = SolutionRecord::unsolved(
            t0 + 1.0 * Unit::Second,
            crate::error::InputError::EmptyEpoch.into(),
        );
        history.push(unsolved);

        assert_eq!(history.latest().unwrap().status, FixStatus::None);
        assert_eq!(history.latest_solved().unwrap().status, FixStatus::Fixed);
    }
}
