//! Integer ambiguity resolution: double difference combinations,
//! external integer search, validation, back substitution.
use log::{debug, error};
use nalgebra::{DMatrix, DVector};

use crate::{
    dd::{DoubleDifferenceBatch, RowTag},
    estimator::{ParameterKey, SequentialEstimator},
    matcher::CommonSet,
    prelude::{AmbiguityMode, Config, SV},
    providers::AmbiguityResolver,
    error::ResolutionError,
    tracker::ChannelTracker,
};

/// Accepted integer resolution, ready for publication.
pub(crate) struct FixOutcome {
    /// Conditioned full state (fixed solution).
    pub state: DVector<f64>,
    /// Shrunk covariance.
    pub covariance: DMatrix<f64>,
    /// Passed ratio test value.
    pub ratio: f64,
    /// Fixed double difference integers, transform ordering.
    pub fixed_dd: DVector<f64>,
    /// Channels whose ambiguity participates in the fix.
    pub fixed_channels: Vec<(SV, usize)>,
}

/// One row of the SD → DD transform.
struct DdCombination {
    reference: SV,
    other: SV,
    slot: usize,
    reference_col: usize,
    other_col: usize,
}

/// [AmbiguityFixer] turns carried per-satellite single difference
/// ambiguities into explicit double difference combinations, resolves
/// them to integers through the external search, and back substitutes
/// accepted fixes into the full state.
pub(crate) struct AmbiguityFixer<'a, R: AmbiguityResolver> {
    cfg: &'a Config,
    resolver: &'a R,
}

impl<'a, R: AmbiguityResolver> AmbiguityFixer<'a, R> {
    pub fn new(cfg: &'a Config, resolver: &'a R) -> Self {
        Self { cfg, resolver }
    }

    /// Integer resolution attempt over the current float state.
    /// Any failure leaves the float solution authoritative.
    pub fn fix(
        &self,
        estimator: &SequentialEstimator,
        common: &CommonSet,
        tracker: &ChannelTracker,
    ) -> Result<FixOutcome, ResolutionError> {
        let combinations = self.combinations(estimator, common, tracker);

        if combinations.is_empty() {
            return Err(ResolutionError::NoEligibleAmbiguities);
        }

        let n = estimator.layout.len();
        let m = combinations.len();

        // D: DD combinations out of carried SD ambiguities
        let mut d = DMatrix::<f64>::zeros(m, n);
        for (i, comb) in combinations.iter().enumerate() {
            d[(i, comb.reference_col)] = 1.0;
            d[(i, comb.other_col)] = -1.0;
        }

        let float_dd = &d * &estimator.x;
        let q_dd = &d * &estimator.p * d.transpose();
        let q_cross = &estimator.p * d.transpose();

        let solution = self
            .resolver
            .resolve(&float_dd, &q_dd, 2)
            .ok_or(ResolutionError::ResolverFailure)?;

        if solution.candidates.len() < 2 || solution.residuals.len() < 2 {
            return Err(ResolutionError::ResolverFailure);
        }

        let best = &solution.candidates[0];
        let (s1, s2) = (solution.residuals[0], solution.residuals[1]);

        // degenerate best residual: unambiguously separated
        let ratio = if s1 < 1.0E-12 {
            f64::INFINITY
        } else {
            s2 / s1
        };

        let threshold = self.cfg.ambiguity.ratio_threshold;
        if ratio < threshold {
            return Err(ResolutionError::RatioTest { ratio, threshold });
        }

        debug!("ambiguity fix accepted: {} DD, ratio {:.2}", m, ratio);

        // conditional mean update of the whole state on the fixed DD
        let q_dd_inv = match q_dd.clone().try_inverse() {
            Some(inv) => inv,
            None => {
                error!("DD covariance inversion failed, keeping float");
                return Err(ResolutionError::ResolverFailure);
            },
        };

        let innovation = &float_dd - best;
        let gain = &q_cross * q_dd_inv;

        let state = &estimator.x - &gain * innovation;
        let covariance = &estimator.p - &gain * q_cross.transpose();
        let covariance = crate::estimator::symmetrized(covariance);

        let mut fixed_channels: Vec<(SV, usize)> = Vec::with_capacity(2 * m);
        for comb in combinations.iter() {
            if !fixed_channels.contains(&(comb.reference, comb.slot)) {
                fixed_channels.push((comb.reference, comb.slot));
            }
            fixed_channels.push((comb.other, comb.slot));
        }

        Ok(FixOutcome {
            state,
            covariance,
            ratio,
            fixed_dd: best.clone(),
            fixed_channels,
        })
    }

    /// Eligible (reference − other) combinations: both channels carried,
    /// not reset, and sufficiently aged (lock count), unless the policy
    /// is single-epoch.
    fn combinations(
        &self,
        estimator: &SequentialEstimator,
        common: &CommonSet,
        tracker: &ChannelTracker,
    ) -> Vec<DdCombination> {
        let min_lock = match self.cfg.ambiguity.mode {
            AmbiguityMode::Instantaneous => 0,
            _ => self.cfg.ambiguity.min_lock,
        };

        let eligible = |sv: SV, slot: usize| -> bool {
            match tracker.channel(sv, slot) {
                Some(channel) => !channel.slip && channel.lock >= min_lock,
                None => false,
            }
        };

        let mut combinations = Vec::new();

        for (sv, slot, other_col) in estimator.layout.ambiguities() {
            if common.is_reference(sv) {
                continue;
            }

            let Some(reference) = common.reference(sv.constellation) else {
                continue;
            };

            let Some(reference_col) = estimator
                .layout
                .index_of(ParameterKey::Ambiguity(reference, slot))
            else {
                continue;
            };

            if !eligible(reference, slot) || !eligible(sv, slot) {
                continue;
            }

            combinations.push(DdCombination {
                reference,
                other: sv,
                slot,
                reference_col,
                other_col,
            });
        }

        combinations
    }

    /// Conservative wide lane policy: constrain the integer wide lane
    /// combination once its Melbourne-Wübbena average is stable, and
    /// keep the narrow lane float. Returns pseudo observation rows to
    /// feed the filter, or None when nothing qualifies yet.
    pub fn wide_lane_constraints(
        &self,
        estimator: &SequentialEstimator,
        common: &CommonSet,
        tracker: &ChannelTracker,
    ) -> Option<DoubleDifferenceBatch> {
        const WL_SIGMA_CYCLES: f64 = 0.01;

        if self.cfg.frequency_slots() < 2 {
            return None;
        }

        let min_lock = self.cfg.ambiguity.min_lock;
        let n = estimator.layout.len();
        let mut rows: Vec<(DVector<f64>, f64, RowTag)> = Vec::new();

        for cd in common.satellites.iter() {
            if common.is_reference(cd.sv) {
                continue;
            }
            let Some(reference) = common.reference(cd.sv.constellation) else {
                continue;
            };

            let cols = [
                estimator
                    .layout
                    .index_of(ParameterKey::Ambiguity(reference, 0)),
                estimator
                    .layout
                    .index_of(ParameterKey::Ambiguity(reference, 1)),
                estimator.layout.index_of(ParameterKey::Ambiguity(cd.sv, 0)),
                estimator.layout.index_of(ParameterKey::Ambiguity(cd.sv, 1)),
            ];

            let [Some(ref_0), Some(ref_1), Some(other_0), Some(other_1)] = cols else {
                continue;
            };

            let stable = |sv: SV| -> Option<f64> {
                let l1 = tracker.channel(sv, 0)?;
                let l2 = tracker.channel(sv, 1)?;
                if l1.slip || l2.slip || l1.lock < min_lock || l2.lock < min_lock {
                    return None;
                }
                l1.wide_lane_cycles()
            };

            let (Some(mw_ref), Some(mw_other)) = (stable(reference), stable(cd.sv)) else {
                continue;
            };

            // integer wide lane out of the averaged MW double difference
            let wl_dd = (mw_ref - mw_other).round();

            // current (N1_ref − N1_other) − (N2_ref − N2_other)
            let current = estimator.x[ref_0] - estimator.x[other_0]
                - (estimator.x[ref_1] - estimator.x[other_1]);

            let mut h = DVector::<f64>::zeros(n);
            h[ref_0] = 1.0;
            h[other_0] = -1.0;
            h[ref_1] = -1.0;
            h[other_1] = 1.0;

            rows.push((
                h,
                wl_dd - current,
                RowTag::WideLaneConstraint {
                    reference,
                    other: cd.sv,
                },
            ));
        }

        if rows.is_empty() {
            return None;
        }

        let nrows = rows.len();
        let mut batch = DoubleDifferenceBatch {
            residuals: DVector::zeros(nrows),
            design: DMatrix::zeros(nrows, n),
            variances: DVector::from_element(nrows, WL_SIGMA_CYCLES.powi(2)),
            tags: Vec::with_capacity(nrows),
        };

        for (i, (h, residual, tag)) in rows.into_iter().enumerate() {
            batch.design.set_row(i, &h.transpose());
            batch.residuals[i] = residual;
            batch.tags.push(tag);
        }

        debug!("wide lane hold: {} constraint(s)", nrows);

        Some(batch)
    }
}
