//! Epoch pair processing: the RTK engine itself.
use log::{debug, error, info, warn};
use nalgebra::Vector3;

use crate::{
    ambiguity::{AmbiguityFixer, FixOutcome},
    dd::DoubleDifferenceBuilder,
    error::{Error, InputError, ResolutionError},
    estimator::{ParameterLayout, SequentialEstimator},
    matcher::CommonSet,
    prelude::{
        AmbiguityMode, Config, Epoch, ObservationEpoch, PositioningMode, SolutionRecord,
    },
    providers::{AmbiguityResolver, AtmosphereModel, EphemerisSource, Site},
    solutions::{AmbiguitySnapshot, FixStatus, SatelliteDiagnostic, SolutionHistory},
    spp::{SinglePointSolver, SppSolution},
    tracker::{ChannelTracker, TrackingSummary},
};

/// Processing pipeline, resolved once from the configured mode so the
/// per-epoch hot path dispatches on a stable tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pipeline {
    /// Absolute rover positioning, no differencing.
    Single,
    /// Code-only double differences.
    Dgps,
    /// Carrier phase double differences.
    Rtk,
}

/// [RtkEngine] computes relative position fixes from synchronized
/// rover/base observation pairs: one call per pair, in time order.
/// All persistent state (tracking, estimation, history) is exclusively
/// owned here; independent baselines run in fully isolated instances.
pub struct RtkEngine<E: EphemerisSource, A: AtmosphereModel, R: AmbiguityResolver> {
    /// [Config] preset, immutable for the whole run.
    pub cfg: Config,

    pipeline: Pipeline,

    ephemeris: E,
    atmosphere: A,
    resolver: R,

    tracker: ChannelTracker,
    estimator: SequentialEstimator,
    history: SolutionHistory,

    last_rover_epoch: Option<Epoch>,
    last_base_epoch: Option<Epoch>,

    rover_apriori: Option<Vector3<f64>>,
    base_apriori: Option<Vector3<f64>>,
}

impl<E: EphemerisSource, A: AtmosphereModel, R: AmbiguityResolver> RtkEngine<E, A, R> {
    /// Builds a new [RtkEngine].
    /// ## Input
    /// - cfg: [Config] preset
    /// - ephemeris: external [EphemerisSource]
    /// - atmosphere: external [AtmosphereModel]
    /// - resolver: external integer [AmbiguityResolver]
    pub fn new(cfg: Config, ephemeris: E, atmosphere: A, resolver: R) -> Self {
        let pipeline = match cfg.mode {
            PositioningMode::Single => Pipeline::Single,
            PositioningMode::Dgps => Pipeline::Dgps,
            _ => Pipeline::Rtk,
        };

        info!("rtk engine: {} mode ({:?} pipeline)", cfg.mode, pipeline);

        let history = SolutionHistory::new(cfg.history_depth);
        let base_apriori = cfg.base_position_ecef_m.map(|(x, y, z)| Vector3::new(x, y, z));

        Self {
            cfg,
            pipeline,
            ephemeris,
            atmosphere,
            resolver,
            tracker: ChannelTracker::default(),
            estimator: SequentialEstimator::default(),
            history,
            last_rover_epoch: None,
            last_base_epoch: None,
            rover_apriori: None,
            base_apriori,
        }
    }

    /// Processes one synchronized rover/base pair and publishes the
    /// authoritative [SolutionRecord]. The engine never aborts a run:
    /// unsolvable epochs surface as [FixStatus::None] records carrying
    /// the typed error, with persistent state retained.
    pub fn process(
        &mut self,
        rover: &ObservationEpoch,
        base: &ObservationEpoch,
    ) -> SolutionRecord {
        let t = rover.epoch;

        if let Err(e) = self.gate(rover, base) {
            warn!("{} - rejected: {}", t, e);
            let record = SolutionRecord::unsolved(t, e);
            self.history.push(record.clone());
            return record;
        }

        self.last_rover_epoch = Some(rover.epoch);
        if !base.is_empty() {
            self.last_base_epoch = Some(base.epoch);
        }

        let record = match self.run(rover, base) {
            Ok(record) => record,
            Err(e) => {
                error!("{} - unsolved: {}", t, e);
                SolutionRecord::unsolved(t, e)
            },
        };

        self.history.push(record.clone());
        record
    }

    /// Bounded history of published records.
    pub fn history(&self) -> impl Iterator<Item = &SolutionRecord> {
        self.history.iter()
    }

    /// Most recent record, solved or not.
    pub fn latest(&self) -> Option<&SolutionRecord> {
        self.history.latest()
    }

    /// Cold restart: forgets all carried state, keeps the preset.
    pub fn reset(&mut self) {
        self.tracker = ChannelTracker::default();
        self.estimator.reset();
        self.history = SolutionHistory::new(self.cfg.history_depth);
        self.last_rover_epoch = None;
        self.last_base_epoch = None;
        self.rover_apriori = None;
        self.base_apriori = self
            .cfg
            .base_position_ecef_m
            .map(|(x, y, z)| Vector3::new(x, y, z));
    }

    /// Input gating: emptiness, time order, rover/base skew, base
    /// position availability. Rejected pairs leave every piece of
    /// persistent state untouched.
    fn gate(&self, rover: &ObservationEpoch, base: &ObservationEpoch) -> Result<(), Error> {
        if rover.is_empty() {
            return Err(InputError::EmptyEpoch.into());
        }

        if self.pipeline != Pipeline::Single {
            if base.is_empty() {
                return Err(InputError::EmptyEpoch.into());
            }

            let skew = rover.epoch - base.epoch;
            if skew.abs() > self.cfg.max_time_skew {
                return Err(InputError::TimeSkew(skew).into());
            }

            if self.cfg.base_position_ecef_m.is_none()
                && self.cfg.mode != PositioningMode::MovingBase
            {
                return Err(InputError::MissingBasePosition.into());
            }

            if let Some(prev) = self.last_base_epoch {
                if base.epoch < prev {
                    return Err(InputError::EpochOrder.into());
                }
            }
        }

        if let Some(prev) = self.last_rover_epoch {
            if rover.epoch < prev {
                return Err(InputError::EpochOrder.into());
            }
        }

        Ok(())
    }

    /// Full pipeline over one accepted pair.
    fn run(
        &mut self,
        rover: &ObservationEpoch,
        base: &ObservationEpoch,
    ) -> Result<SolutionRecord, Error> {
        let t = rover.epoch;

        // absolute fixes first: usability foundation for both stations
        let rover_solver = SinglePointSolver::new(&self.cfg, Site::Rover);
        let rover_spp =
            rover_solver.solve(rover, &self.ephemeris, &self.atmosphere, self.rover_apriori)?;

        self.rover_apriori = Some(rover_spp.position_ecef_m);

        if self.pipeline == Pipeline::Single {
            return Ok(self.publish_single(t, &rover_spp));
        }

        let base_solver = SinglePointSolver::new(&self.cfg, Site::Base);
        let base_spp =
            base_solver.solve(base, &self.ephemeris, &self.atmosphere, self.base_apriori)?;

        // authoritative base coordinates: configured, except when the
        // base itself roams
        let base_position = match self.cfg.mode {
            PositioningMode::MovingBase => base_spp.position_ecef_m,
            _ => match self.cfg.base_position_ecef_m {
                Some((x, y, z)) => Vector3::new(x, y, z),
                None => return Err(InputError::MissingBasePosition.into()),
            },
        };
        self.base_apriori = Some(base_position);

        let need_phase = self.pipeline == Pipeline::Rtk;
        let common = CommonSet::match_epochs(
            &self.cfg, rover, base, &rover_spp, &base_spp, need_phase,
        );

        if common.is_empty() {
            return Err(crate::error::GeometryError::NotEnoughCommonSatellites.into());
        }

        // slip detection and lock accounting
        let summary = if need_phase {
            self.tracker.run(&self.cfg, &common, rover, base)
        } else {
            TrackingSummary::default()
        };

        // time update onto this epoch's layout
        let layout = ParameterLayout::build(&self.cfg, &common);
        self.estimator.propagate(
            &self.cfg,
            t,
            layout,
            rover_spp.position_ecef_m,
            &self.tracker,
            &summary,
        );

        // measurement update, relinearized
        let skew_s = (rover.epoch - base.epoch).to_seconds();
        self.measurement_passes(rover, base, base_position, skew_s, &common)?;

        // carried float ambiguities flow back into the channels
        for (sv, slot, idx) in self.estimator.layout.ambiguities() {
            self.tracker
                .feedback(sv, slot, self.estimator.x[idx], self.estimator.p[(idx, idx)]);
        }

        // integer resolution
        let mut ratio = 0.0;
        let mut fix: Option<FixOutcome> = None;
        let mut resolution_error: Option<ResolutionError> = None;

        if need_phase && self.cfg.ambiguity.mode != AmbiguityMode::Off {
            let fixer = AmbiguityFixer::new(&self.cfg, &self.resolver);

            if self.cfg.ambiguity.mode == AmbiguityMode::WideNarrowLane {
                if let Some(constraints) =
                    fixer.wide_lane_constraints(&self.estimator, &common, &self.tracker)
                {
                    self.estimator.constrain(&self.cfg, &constraints);
                }
            } else {
                match fixer.fix(&self.estimator, &common, &self.tracker) {
                    Ok(outcome) => {
                        ratio = outcome.ratio;

                        for (sv, slot) in outcome.fixed_channels.iter() {
                            self.tracker.mark_fixed(*sv, *slot, true);
                        }

                        if self.cfg.ambiguity.mode == AmbiguityMode::FixAndHold {
                            // hold: accepted integers survive in the filter
                            self.estimator.x = outcome.state.clone();
                            self.estimator.p = outcome.covariance.clone();
                        }

                        fix = Some(outcome);
                    },
                    Err(e) => {
                        if let ResolutionError::RatioTest { ratio: r, .. } = e {
                            ratio = r;
                        }
                        debug!("{} - float retained: {}", t, e);
                        resolution_error = Some(e);
                    },
                }
            }
        }

        Ok(self.publish(t, &rover_spp, &common, fix, ratio, resolution_error))
    }

    /// Builds and applies the double difference batch, rebuilding the
    /// linearization up to the configured pass count. Every pass
    /// updates from the propagated prior, with residuals re-expressed
    /// around it.
    fn measurement_passes(
        &mut self,
        rover: &ObservationEpoch,
        base: &ObservationEpoch,
        base_position: Vector3<f64>,
        skew_s: f64,
        common: &CommonSet,
    ) -> Result<(), Error> {
        let prior_x = self.estimator.x.clone();
        let prior_p = self.estimator.p.clone();

        let passes = self.cfg.solver.relinearizations.max(1);

        for pass in 0..passes {
            let builder = DoubleDifferenceBuilder::new(&self.cfg, &self.estimator.layout, common);

            let mut batch = builder.build(
                &self.estimator.x,
                self.estimator.position(),
                base_position,
                rover,
                base,
                &self.ephemeris,
                &self.atmosphere,
                skew_s,
            );

            // residuals are linearized at the current estimate:
            // re-express them around the propagated prior
            let shift = &self.estimator.x - &prior_x;
            if shift.amax() > 0.0 {
                batch.residuals += &batch.design * shift;
            }

            self.estimator.x = prior_x.clone();
            self.estimator.p = prior_p.clone();

            debug!("measurement pass {} ({} rows)", pass, batch.rows());

            self.estimator.update(&self.cfg, &batch)?;
        }

        Ok(())
    }

    /// Publishes the absolute (single) record.
    fn publish_single(&mut self, t: Epoch, spp: &SppSolution) -> SolutionRecord {
        let mut record = SolutionRecord {
            epoch: t,
            status: FixStatus::Single,
            position_ecef_m: spp.position_ecef_m,
            ..Default::default()
        };

        for (sv, view) in spp.sky.iter() {
            record.satellites.insert(
                *sv,
                SatelliteDiagnostic {
                    elevation_deg: view.elevation_rad.to_degrees(),
                    azimuth_deg: view.azimuth_rad.to_degrees(),
                    ..Default::default()
                },
            );
        }

        record
    }

    /// Selects the authoritative state, writes per-vehicle diagnostics
    /// and shapes the final record.
    fn publish(
        &mut self,
        t: Epoch,
        spp: &SppSolution,
        common: &CommonSet,
        fix: Option<FixOutcome>,
        ratio: f64,
        resolution_error: Option<ResolutionError>,
    ) -> SolutionRecord {
        let status = match self.pipeline {
            Pipeline::Dgps => FixStatus::Dgps,
            Pipeline::Rtk => {
                if fix.is_some() {
                    FixStatus::Fixed
                } else {
                    FixStatus::Float
                }
            },
            Pipeline::Single => FixStatus::Single,
        };

        // authoritative state: conditioned (fixed) when accepted
        let (position, covariance) = match &fix {
            Some(outcome) => {
                let mut position = Vector3::zeros();
                let mut covariance = nalgebra::Matrix3::zeros();
                for i in 0..3 {
                    if let Some(ci) = self
                        .estimator
                        .layout
                        .index_of(crate::estimator::ParameterKey::Position(i))
                    {
                        position[i] = outcome.state[ci];
                        for j in 0..3 {
                            if let Some(cj) = self
                                .estimator
                                .layout
                                .index_of(crate::estimator::ParameterKey::Position(j))
                            {
                                covariance[(i, j)] = outcome.covariance[(ci, cj)];
                            }
                        }
                    }
                }
                (position, covariance)
            },
            None => (self.estimator.position(), self.estimator.position_covariance()),
        };

        // float ambiguity snapshot, layout ordering
        let channels: Vec<_> = self
            .estimator
            .layout
            .ambiguities()
            .map(|(sv, slot, _)| (sv, slot))
            .collect();
        let indices: Vec<_> = self
            .estimator
            .layout
            .ambiguities()
            .map(|(_, _, idx)| idx)
            .collect();

        let mut float = nalgebra::DVector::zeros(indices.len());
        let mut float_covariance = nalgebra::DMatrix::zeros(indices.len(), indices.len());
        for (i, &ix) in indices.iter().enumerate() {
            float[i] = self.estimator.x[ix];
            for (j, &jx) in indices.iter().enumerate() {
                float_covariance[(i, j)] = self.estimator.p[(ix, jx)];
            }
        }

        let ambiguities = AmbiguitySnapshot {
            channels,
            float,
            float_covariance,
            fixed: fix.as_ref().map(|outcome| outcome.fixed_dd.clone()),
        };

        let mut record = SolutionRecord {
            epoch: t,
            status,
            position_ecef_m: position,
            velocity_ecef_m_s: self.estimator.velocity(),
            position_covariance_m2: covariance,
            ambiguities,
            ratio,
            satellites: Default::default(),
            error: resolution_error.map(Error::Resolution),
        };

        for cd in common.satellites.iter() {
            let view = spp.sky.get(&cd.sv).copied().unwrap_or_default();
            let channel = self.tracker.channel(cd.sv, 0);

            record.satellites.insert(
                cd.sv,
                SatelliteDiagnostic {
                    elevation_deg: view.elevation_rad.to_degrees(),
                    azimuth_deg: view.azimuth_rad.to_degrees(),
                    lock: channel.map(|c| c.lock).unwrap_or(0),
                    ambiguity_cycles: channel.map(|c| c.ambiguity_cycles).unwrap_or(0.0),
                    reference: common.is_reference(cd.sv),
                    fixed: channel.map(|c| c.fixed).unwrap_or(false),
                    slip: channel.map(|c| c.slip).unwrap_or(false),
                },
            );
        }

        debug!("{} - published {} solution", t, record.status);

        record
    }
}
