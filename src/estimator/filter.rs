//! Measurement update disciplines over one double difference batch.
use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::{
    dd::{DoubleDifferenceBatch, RowTag},
    error::NumericError,
    prelude::{Constellation, Discipline},
};

/// Outcome of one measurement update.
pub(crate) struct UpdateOutcome {
    pub state: DVector<f64>,
    pub covariance: DMatrix<f64>,
}

/// Dispatches the configured [Discipline] on this batch.
/// `state`/`covariance` is the propagated (a priori) estimate; the
/// batch residuals are linearized around `state`.
pub(crate) fn measurement_update(
    discipline: Discipline,
    state: &DVector<f64>,
    covariance: &DMatrix<f64>,
    batch: &DoubleDifferenceBatch,
) -> Result<UpdateOutcome, NumericError> {
    match discipline {
        Discipline::Lsq => information_update(state, covariance, batch, None),
        Discipline::Kalman => kalman_update(state, covariance, batch, None),
        Discipline::Helmert => helmert_update(state, covariance, batch),
    }
}

/// Information form: (HᵀWH + P⁻¹)⁻¹ both corrects the state and becomes
/// the posterior covariance. The prior acts as pseudo observations.
fn information_update(
    state: &DVector<f64>,
    covariance: &DMatrix<f64>,
    batch: &DoubleDifferenceBatch,
    scales: Option<&[f64]>,
) -> Result<UpdateOutcome, NumericError> {
    let h = &batch.design;
    let w = weight_matrix(batch, scales);

    let p_inv = covariance
        .clone()
        .try_inverse()
        .ok_or(NumericError::MatrixInversion)?;

    let ht_w = h.transpose() * w;
    let information = &ht_w * h + p_inv;

    let posterior = information
        .try_inverse()
        .ok_or(NumericError::MatrixInversion)?;

    let dx = &posterior * (ht_w * &batch.residuals);

    Ok(UpdateOutcome {
        state: state + dx,
        covariance: symmetrized(posterior),
    })
}

/// Classic gain form: K = PHᵀ(HPHᵀ + R)⁻¹.
fn kalman_update(
    state: &DVector<f64>,
    covariance: &DMatrix<f64>,
    batch: &DoubleDifferenceBatch,
    scales: Option<&[f64]>,
) -> Result<UpdateOutcome, NumericError> {
    let h = &batch.design;
    let nrows = batch.rows();

    let mut r = DMatrix::<f64>::zeros(nrows, nrows);
    for i in 0..nrows {
        r[(i, i)] = batch.variances[i] * scale_of(batch, scales, i);
    }

    let p_ht = covariance * h.transpose();
    let s = h * &p_ht + r;

    let s_inv = s.try_inverse().ok_or(NumericError::MatrixInversion)?;

    let gain = &p_ht * s_inv;

    let identity = DMatrix::<f64>::identity(state.len(), state.len());
    let posterior = (identity - &gain * h) * covariance;

    Ok(UpdateOutcome {
        state: state + gain * &batch.residuals,
        covariance: symmetrized(posterior),
    })
}

/// Helmert variance component estimation: constellation weight groups
/// are re-scaled from their post-fit residuals, then the final gain
/// update runs with the balanced weights.
fn helmert_update(
    state: &DVector<f64>,
    covariance: &DMatrix<f64>,
    batch: &DoubleDifferenceBatch,
) -> Result<UpdateOutcome, NumericError> {
    const VCE_PASSES: usize = 2;

    let groups = weight_groups(batch);
    let mut scales = vec![1.0; batch.rows()];

    if groups.len() < 2 {
        // one weight group: nothing to balance
        return kalman_update(state, covariance, batch, None);
    }

    for _ in 0..VCE_PASSES {
        let outcome = information_update(state, covariance, batch, Some(&scales))?;

        // post-fit residuals at the balanced estimate
        let post = &batch.residuals - &batch.design * (&outcome.state - state);

        for group in groups.iter() {
            let mut vtwv = 0.0;
            let mut redundancy: f64 = 0.0;

            for &i in group.rows.iter() {
                let weight = 1.0 / (batch.variances[i] * scales[i]);
                vtwv += post[i] * post[i] * weight;
                redundancy += 1.0;
            }

            // guard degenerate groups
            let redundancy = (redundancy - 1.0).max(1.0);
            let component = (vtwv / redundancy).max(1.0E-4);

            for &i in group.rows.iter() {
                scales[i] *= component;
            }

            debug!(
                "helmert: {} component {:.3} over {} rows",
                group.constellation,
                component,
                group.rows.len()
            );
        }
    }

    kalman_update(state, covariance, batch, Some(&scales))
}

struct WeightGroup {
    constellation: Constellation,
    rows: Vec<usize>,
}

/// Rows grouped by constellation; the baseline pseudo row keeps its
/// configured sigma and joins no group.
fn weight_groups(batch: &DoubleDifferenceBatch) -> Vec<WeightGroup> {
    let mut groups: Vec<WeightGroup> = Vec::new();

    for (i, tag) in batch.tags.iter().enumerate() {
        let RowTag::DoubleDifference { reference, .. } = tag else {
            continue;
        };

        match groups
            .iter_mut()
            .find(|g| g.constellation == reference.constellation)
        {
            Some(group) => group.rows.push(i),
            None => groups.push(WeightGroup {
                constellation: reference.constellation,
                rows: vec![i],
            }),
        }
    }

    groups
}

fn weight_matrix(batch: &DoubleDifferenceBatch, scales: Option<&[f64]>) -> DMatrix<f64> {
    let nrows = batch.rows();
    let mut w = DMatrix::<f64>::zeros(nrows, nrows);
    for i in 0..nrows {
        w[(i, i)] = 1.0 / (batch.variances[i] * scale_of(batch, scales, i));
    }
    w
}

fn scale_of(_batch: &DoubleDifferenceBatch, scales: Option<&[f64]>, i: usize) -> f64 {
    scales.map(|s| s[i]).unwrap_or(1.0)
}

/// Covariances drift off symmetry through repeated products; force it.
pub(crate) fn symmetrized(p: DMatrix<f64>) -> DMatrix<f64> {
    let pt = p.transpose();
    (p + pt) * 0.5
}
