//! Sequential estimation over the changing per-epoch parameter layout.
use log::{debug, error};
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::{
    dd::DoubleDifferenceBatch,
    error::{Error, GeometryError, NumericError},
    prelude::{Config, Epoch, PositioningMode},
    tracker::{ChannelTracker, TrackingSummary},
};

mod filter;
mod layout;

pub(crate) use filter::{measurement_update, symmetrized};
pub(crate) use layout::{ParameterKey, ParameterLayout};

/// Variance pinning known coordinates ([PositioningMode::Fixed]).
const PINNED_VARIANCE_M2: f64 = 1.0E-8;

fn component(t: (f64, f64, f64), k: usize) -> f64 {
    match k {
        0 => t.0,
        1 => t.1,
        _ => t.2,
    }
}

/// [SequentialEstimator] exclusively owns the parameter vector and its
/// covariance. Both are re-shaped every epoch because the active
/// satellite set changes; values and cross covariances survive the
/// re-shape for every parameter that carries over.
#[derive(Debug, Clone)]
pub(crate) struct SequentialEstimator {
    /// Parameter vector, ordered by [ParameterLayout].
    pub x: DVector<f64>,
    /// Covariance, same ordering.
    pub p: DMatrix<f64>,
    /// Active [ParameterLayout].
    pub layout: ParameterLayout,
    /// False until the first complete propagation.
    pub initialized: bool,
    /// Previous propagation instant.
    last_epoch: Option<Epoch>,
}

impl Default for SequentialEstimator {
    fn default() -> Self {
        Self {
            x: DVector::zeros(0),
            p: DMatrix::zeros(0, 0),
            layout: ParameterLayout::default(),
            initialized: false,
            last_epoch: None,
        }
    }
}

impl SequentialEstimator {
    /// Cold start: forget everything.
    pub fn reset(&mut self) {
        self.x = DVector::zeros(0);
        self.p = DMatrix::zeros(0, 0);
        self.layout = ParameterLayout::default();
        self.initialized = false;
        self.last_epoch = None;
    }

    /// Time update: re-shapes state and covariance onto `new_layout`,
    /// advances the dynamic block per the configured motion model and
    /// adds process noise. Reset ambiguities re-enter with their seed
    /// value, a large variance and zeroed cross covariances.
    pub fn propagate(
        &mut self,
        cfg: &Config,
        t: Epoch,
        new_layout: ParameterLayout,
        spp_position: Vector3<f64>,
        tracker: &ChannelTracker,
        summary: &TrackingSummary,
    ) {
        let dt_s = match self.last_epoch {
            Some(prev) => (t - prev).to_seconds(),
            None => 0.0,
        };

        let n = new_layout.len();
        let mut x = DVector::<f64>::zeros(n);
        let mut p = DMatrix::<f64>::zeros(n, n);

        let dynamic_reset = !self.initialized || !summary.majority_reset_slots.is_empty();

        let carried: Vec<Option<usize>> = new_layout
            .keys()
            .iter()
            .map(|key| {
                if !self.initialized {
                    return None;
                }
                match key {
                    ParameterKey::Position(_) | ParameterKey::Velocity(_) => {
                        if dynamic_reset {
                            None
                        } else {
                            self.layout.index_of(*key)
                        }
                    },
                    ParameterKey::Ambiguity(sv, slot) => {
                        if summary.is_reset(*sv, *slot) {
                            None
                        } else {
                            self.layout.index_of(*key)
                        }
                    },
                    _ => self.layout.index_of(*key),
                }
            })
            .collect();

        let init = cfg.solver.initial_variances;

        for (i, key) in new_layout.keys().iter().enumerate() {
            match carried[i] {
                Some(old) => {
                    x[i] = self.x[old];
                    p[(i, i)] = self.p[(old, old)];
                },
                None => {
                    let (value, variance) = match key {
                        ParameterKey::Position(k) => match cfg.mode {
                            PositioningMode::Fixed => {
                                let pinned = cfg.rover_position_ecef_m.unwrap_or_default();
                                (component(pinned, *k), PINNED_VARIANCE_M2)
                            },
                            _ => (spp_position[*k], init.position_m2),
                        },
                        ParameterKey::Velocity(_) => (0.0, init.velocity_m2_s2),
                        ParameterKey::TropoRover | ParameterKey::TropoBase => (0.0, init.tropo_m2),
                        ParameterKey::Ifb(_) => (0.0, init.ifb_m2),
                        ParameterKey::Iono(_) => (0.0, init.iono_m2),
                        ParameterKey::Ambiguity(sv, slot) => {
                            match tracker.channel(*sv, *slot) {
                                Some(channel) => {
                                    (channel.ambiguity_cycles, channel.variance_cycles2)
                                },
                                None => (0.0, init.ambiguity_cycles2),
                            }
                        },
                    };
                    x[i] = value;
                    p[(i, i)] = variance;
                },
            }
        }

        // cross covariances survive only between pairs that both carried
        for i in 0..n {
            let Some(oi) = carried[i] else { continue };
            for j in (i + 1)..n {
                let Some(oj) = carried[j] else { continue };
                p[(i, j)] = self.p[(oi, oj)];
                p[(j, i)] = self.p[(oj, oi)];
            }
        }

        // motion model over the dynamic block
        if cfg.mode.estimates_velocity() && dt_s > 0.0 {
            let mut f = DMatrix::<f64>::identity(n, n);
            for k in 0..3 {
                if let (Some(pos), Some(vel)) = (
                    new_layout.index_of(ParameterKey::Position(k)),
                    new_layout.index_of(ParameterKey::Velocity(k)),
                ) {
                    f[(pos, vel)] = dt_s;
                }
            }
            x = &f * x;
            p = &f * p * f.transpose();
        }

        // process noise
        let noise = cfg.solver.process_noise;
        for (i, key) in new_layout.keys().iter().enumerate() {
            match key {
                ParameterKey::Position(k) => {
                    if cfg.mode.estimates_velocity() {
                        p[(i, i)] += noise.accel_psd * dt_s.powi(3) / 3.0;
                        if let Some(vel) = new_layout.index_of(ParameterKey::Velocity(*k)) {
                            let q_pv = noise.accel_psd * dt_s.powi(2) / 2.0;
                            p[(i, vel)] += q_pv;
                            p[(vel, i)] += q_pv;
                        }
                    }
                },
                ParameterKey::Velocity(_) => {
                    p[(i, i)] += noise.accel_psd * dt_s;
                },
                ParameterKey::TropoRover | ParameterKey::TropoBase => {
                    p[(i, i)] += noise.tropo_psd * dt_s;
                },
                ParameterKey::Ifb(_) => {
                    p[(i, i)] += noise.ifb_psd * dt_s;
                },
                ParameterKey::Iono(_) => {
                    p[(i, i)] += noise.iono_psd * dt_s;
                },
                ParameterKey::Ambiguity(_, _) => {
                    p[(i, i)] += noise.ambiguity_psd * dt_s;
                },
            }
        }

        debug!(
            "{} - propagated {} parameters (dt={:.1}s, dynamic_reset={})",
            t,
            n,
            dt_s,
            dynamic_reset
        );

        self.x = x;
        self.p = p;
        self.layout = new_layout;
        self.initialized = true;
        self.last_epoch = Some(t);
    }

    /// Measurement update over one batch. On failure the pre-update
    /// state is retained so the next propagation starts clean.
    pub fn update(&mut self, cfg: &Config, batch: &DoubleDifferenceBatch) -> Result<(), Error> {
        if batch.rows() < 4 {
            return Err(GeometryError::NotEnoughCommonSatellites.into());
        }

        let outcome = measurement_update(cfg.solver.discipline, &self.x, &self.p, batch)
            .map_err(|e| {
                error!("adjustment error: {}", e);
                Error::Geometry(GeometryError::SingularDesign)
            })?;

        // positive semi-definite check before committing
        let mut corrupted = Vec::new();
        for i in 0..outcome.covariance.nrows() {
            let d = outcome.covariance[(i, i)];
            if !d.is_finite() || d < 0.0 {
                corrupted.push(i);
            }
        }

        if !corrupted.is_empty() {
            error!(
                "covariance lost positive semi-definiteness on {} parameter(s)",
                corrupted.len()
            );
            self.defensive_reset(cfg, &corrupted);
            return Err(NumericError::CovarianceNotPositive.into());
        }

        self.x = outcome.state;
        self.p = outcome.covariance;

        Ok(())
    }

    /// Constraint (pseudo observation) update: same algebra as a
    /// measurement update but without the batch size gate. Used by the
    /// wide lane hold policy. Failures are logged and swallowed: a
    /// constraint that cannot apply must not unsolve the epoch.
    pub fn constrain(&mut self, cfg: &Config, batch: &DoubleDifferenceBatch) {
        match measurement_update(cfg.solver.discipline, &self.x, &self.p, batch) {
            Ok(outcome) => {
                self.x = outcome.state;
                self.p = outcome.covariance;
            },
            Err(e) => {
                error!("constraint update failed: {}", e);
            },
        }
    }

    /// Defensive reset of corrupted blocks: large variance, zeroed
    /// cross terms, value retained. Invalid numbers never propagate.
    fn defensive_reset(&mut self, cfg: &Config, indices: &[usize]) {
        let init = cfg.solver.initial_variances;

        for &i in indices {
            for j in 0..self.p.ncols() {
                self.p[(i, j)] = 0.0;
                self.p[(j, i)] = 0.0;
            }

            self.p[(i, i)] = match self.layout.keys()[i] {
                ParameterKey::Position(_) => init.position_m2,
                ParameterKey::Velocity(_) => init.velocity_m2_s2,
                ParameterKey::TropoRover | ParameterKey::TropoBase => init.tropo_m2,
                ParameterKey::Ifb(_) => init.ifb_m2,
                ParameterKey::Iono(_) => init.iono_m2,
                ParameterKey::Ambiguity(_, _) => init.ambiguity_cycles2,
            };

            if !self.x[i].is_finite() {
                self.x[i] = 0.0;
            }
        }
    }

    /// Estimated rover position, ECEF meters.
    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(
            self.value(ParameterKey::Position(0)),
            self.value(ParameterKey::Position(1)),
            self.value(ParameterKey::Position(2)),
        )
    }

    /// Estimated rover velocity, ECEF m/s, when the motion model
    /// carries one.
    pub fn velocity(&self) -> Option<Vector3<f64>> {
        self.layout.index_of(ParameterKey::Velocity(0))?;
        Some(Vector3::new(
            self.value(ParameterKey::Velocity(0)),
            self.value(ParameterKey::Velocity(1)),
            self.value(ParameterKey::Velocity(2)),
        ))
    }

    /// 3x3 position covariance block.
    pub fn position_covariance(&self) -> Matrix3<f64> {
        let mut cov = Matrix3::zeros();
        for i in 0..3 {
            for j in 0..3 {
                if let (Some(ci), Some(cj)) = (
                    self.layout.index_of(ParameterKey::Position(i)),
                    self.layout.index_of(ParameterKey::Position(j)),
                ) {
                    cov[(i, j)] = self.p[(ci, cj)];
                }
            }
        }
        cov
    }

    fn value(&self, key: ParameterKey) -> f64 {
        self.layout.index_of(key).map(|i| self.x[i]).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod test {
    use super::{ParameterKey, ParameterLayout, SequentialEstimator};
    use crate::{
        matcher::{CommonSatellite, CommonSet},
        prelude::{Config, Constellation, Epoch, PositioningMode, SV},
        tracker::{ChannelTracker, TrackingSummary},
    };
    use hifitime::Unit;
    use nalgebra::Vector3;

    fn common_of(svs: &[SV]) -> CommonSet {
        CommonSet {
            satellites: svs
                .iter()
                .map(|sv| CommonSatellite {
                    sv: *sv,
                    rover_idx: 0,
                    base_idx: 0,
                    elevation_rad: 0.8,
                    phase_slots: 0b01,
                    code_slots: 0b01,
                })
                .collect(),
            references: Default::default(),
        }
    }

    #[test]
    fn carry_over_and_reset() {
        let mut cfg = Config::default();
        cfg.mode = PositioningMode::Static;
        cfg.frequencies = 1;

        let svs: Vec<SV> = (1..=3).map(|prn| SV::new(Constellation::GPS, prn)).collect();
        let common = common_of(&svs);
        let tracker = ChannelTracker::default();
        let summary = TrackingSummary::default();

        let mut estimator = SequentialEstimator::default();
        let t0 = Epoch::default();
        let position = Vector3::new(6378137.0, 0.0, 0.0);

        let layout = ParameterLayout::build(&cfg, &common);
        estimator.propagate(&cfg, t0, layout, position, &tracker, &summary);

        assert!(estimator.initialized);
        assert_eq!(estimator.x.len(), 3 + 3);
        assert_eq!(estimator.position(), position);

        // inject a value and make sure it carries across re-shape
        let idx = estimator
            .layout
            .index_of(ParameterKey::Ambiguity(svs[1], 0))
            .unwrap();
        estimator.x[idx] = 12.5;
        estimator.p[(idx, idx)] = 0.04;

        let layout = ParameterLayout::build(&cfg, &common);
        estimator.propagate(
            &cfg,
            t0 + 1.0 * Unit::Second,
            layout,
            position,
            &tracker,
            &summary,
        );

        let idx = estimator
            .layout
            .index_of(ParameterKey::Ambiguity(svs[1], 0))
            .unwrap();
        assert_eq!(estimator.x[idx], 12.5);
        assert_eq!(estimator.p[(idx, idx)], 0.04);

        // flagged reset: variance jumps back to the seed value
        let mut summary = TrackingSummary::default();
        summary.resets.push((svs[1], 0));

        let layout = ParameterLayout::build(&cfg, &common);
        estimator.propagate(
            &cfg,
            t0 + 2.0 * Unit::Second,
            layout,
            position,
            &tracker,
            &summary,
        );

        let idx = estimator
            .layout
            .index_of(ParameterKey::Ambiguity(svs[1], 0))
            .unwrap();
        assert_eq!(
            estimator.p[(idx, idx)],
            cfg.solver.initial_variances.ambiguity_cycles2
        );
    }

    #[test]
    fn kinematic_motion_model() {
        let mut cfg = Config::default();
        cfg.mode = PositioningMode::Kinematic;
        cfg.frequencies = 1;

        let svs: Vec<SV> = (1..=2).map(|prn| SV::new(Constellation::GPS, prn)).collect();
        let common = common_of(&svs);
        let tracker = ChannelTracker::default();
        let summary = TrackingSummary::default();

        let mut estimator = SequentialEstimator::default();
        let t0 = Epoch::default();
        let position = Vector3::new(6378137.0, 0.0, 0.0);

        let layout = ParameterLayout::build(&cfg, &common);
        estimator.propagate(&cfg, t0, layout, position, &tracker, &summary);

        // give the rover 1 m/s along x
        let vx = estimator.layout.index_of(ParameterKey::Velocity(0)).unwrap();
        estimator.x[vx] = 1.0;

        let layout = ParameterLayout::build(&cfg, &common);
        estimator.propagate(
            &cfg,
            t0 + 2.0 * Unit::Second,
            layout,
            position,
            &tracker,
            &summary,
        );

        assert!((estimator.position()[0] - (6378137.0 + 2.0)).abs() < 1.0E-9);
        assert_eq!(estimator.velocity().unwrap()[0], 1.0);
    }
}
