//! Double difference batch assembly: residuals, design and weights.
use hifitime::Unit;
use log::debug;
use nalgebra::{DMatrix, DVector, Vector3};

use crate::{
    constants::SPEED_OF_LIGHT_M_S,
    estimator::{ParameterKey, ParameterLayout},
    geo,
    matcher::{CommonSatellite, CommonSet},
    prelude::{Carrier, Config, Epoch, ObservationEpoch, SV},
    providers::{AtmosphereModel, EphemerisSource, Site},
    sd::SingleDifference,
};

/// Observable family a batch row was formed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservableKind {
    Phase,
    Code,
}

/// What one batch row measures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowTag {
    /// Double difference: (reference − other) on this [Carrier].
    DoubleDifference {
        reference: SV,
        other: SV,
        carrier: Carrier,
        slot: usize,
        kind: ObservableKind,
    },
    /// Moving baseline length pseudo observation.
    BaselineConstraint,
    /// Wide lane integer hold pseudo observation.
    WideLaneConstraint { reference: SV, other: SV },
}

/// Ephemeral per-epoch batch: consumed by one measurement update,
/// then discarded.
#[derive(Debug, Clone)]
pub(crate) struct DoubleDifferenceBatch {
    /// Measured minus modeled, meters.
    pub residuals: DVector<f64>,
    /// Design matrix, rows × layout parameters.
    pub design: DMatrix<f64>,
    /// Row variances, m².
    pub variances: DVector<f64>,
    /// One [RowTag] per row.
    pub tags: Vec<RowTag>,
}

impl DoubleDifferenceBatch {
    pub fn rows(&self) -> usize {
        self.tags.len()
    }
}

/// Everything the single difference model attributes to one vehicle.
struct ModeledSatellite {
    cd: CommonSatellite,
    /// Rover → satellite unit vector
    unit_rover: Vector3<f64>,
    /// Geometric single difference (rover − base), Sagnac corrected, m
    geometry_sd_m: f64,
    /// Troposphere model single difference, m
    tropo_sd_m: f64,
    /// Ionosphere model single difference (L1), m
    iono_sd_m: f64,
    /// Troposphere mapping at rover and base
    tropo_map: (f64, f64),
    /// Measured single differences, per slot
    measured: Vec<Option<SingleDifference>>,
    /// Elevation at rover, radians
    elevation_rad: f64,
}

/// [DoubleDifferenceBuilder] evaluates the single difference
/// observation model for every common satellite, then assembles the
/// reference-minus-other batch.
pub(crate) struct DoubleDifferenceBuilder<'a> {
    cfg: &'a Config,
    layout: &'a ParameterLayout,
    common: &'a CommonSet,
}

impl<'a> DoubleDifferenceBuilder<'a> {
    pub fn new(cfg: &'a Config, layout: &'a ParameterLayout, common: &'a CommonSet) -> Self {
        Self {
            cfg,
            layout,
            common,
        }
    }

    /// Assembles the batch at the current state estimate.
    /// ## Input
    /// - state: current parameter vector (linearization point)
    /// - rover_position: rover antenna position drawn from `state`
    /// - base_position: authoritative base antenna position
    /// - rover, base: raw observations
    /// - skew_s: rover/base sampling offset, seconds
    #[allow(clippy::too_many_arguments)]
    pub fn build<E: EphemerisSource, A: AtmosphereModel>(
        &self,
        state: &DVector<f64>,
        rover_position: Vector3<f64>,
        base_position: Vector3<f64>,
        rover: &ObservationEpoch,
        base: &ObservationEpoch,
        ephemeris: &E,
        atmosphere: &A,
        skew_s: f64,
    ) -> DoubleDifferenceBatch {
        let t = rover.epoch;

        let rover_apc = self.antenna_position(rover_position, self.cfg.rover_antenna_enu_m);
        let base_apc = self.antenna_position(base_position, self.cfg.base_antenna_enu_m);

        let baseline_km = (rover_apc - base_apc).norm() / 1.0E3;

        let modeled: Vec<ModeledSatellite> = self
            .common
            .satellites
            .iter()
            .filter_map(|cd| {
                self.model_satellite(t, cd, rover_apc, base_apc, rover, base, ephemeris, atmosphere)
            })
            .collect();

        let ncols = self.layout.len();
        let mut rows: Vec<(DVector<f64>, f64, f64, RowTag)> = Vec::with_capacity(2 * modeled.len());

        for reference in modeled.iter().filter(|m| self.common.is_reference(m.cd.sv)) {
            for other in modeled
                .iter()
                .filter(|m| m.cd.sv.constellation == reference.cd.sv.constellation)
                .filter(|m| m.cd.sv != reference.cd.sv)
            {
                for slot in 0..self.cfg.frequency_slots() {
                    for kind in [ObservableKind::Phase, ObservableKind::Code] {
                        if let Some(row) =
                            self.form_row(state, reference, other, slot, kind, baseline_km, skew_s)
                        {
                            rows.push(row);
                        }
                    }
                }
            }
        }

        if let Some(constraint) = self.cfg.baseline_constraint {
            let dr = rover_apc - base_apc;
            let length_m = dr.norm();

            let mut h = DVector::<f64>::zeros(ncols);
            if length_m > 1.0E-3 {
                let unit = dr / length_m;
                for i in 0..3 {
                    if let Some(col) = self.layout.index_of(ParameterKey::Position(i)) {
                        h[col] = unit[i];
                    }
                }
            }

            rows.push((
                h,
                constraint.length_m - length_m,
                constraint.sigma_m.powi(2),
                RowTag::BaselineConstraint,
            ));
        }

        let nrows = rows.len();
        let mut batch = DoubleDifferenceBatch {
            residuals: DVector::zeros(nrows),
            design: DMatrix::zeros(nrows, ncols),
            variances: DVector::zeros(nrows),
            tags: Vec::with_capacity(nrows),
        };

        for (i, (h, residual, variance, tag)) in rows.into_iter().enumerate() {
            batch.design.set_row(i, &h.transpose());
            batch.residuals[i] = residual;
            batch.variances[i] = variance;
            batch.tags.push(tag);
        }

        debug!("{} - batch: {} rows, {} parameters", t, nrows, ncols);

        batch
    }

    fn antenna_position(
        &self,
        position: Vector3<f64>,
        enu: Option<(f64, f64, f64)>,
    ) -> Vector3<f64> {
        match enu {
            Some(enu) => position + geo::enu_to_ecef_offset(position, enu),
            None => position,
        }
    }

    /// Evaluates the single difference model for one vehicle.
    #[allow(clippy::too_many_arguments)]
    fn model_satellite<E: EphemerisSource, A: AtmosphereModel>(
        &self,
        t: Epoch,
        cd: &CommonSatellite,
        rover_apc: Vector3<f64>,
        base_apc: Vector3<f64>,
        rover: &ObservationEpoch,
        base: &ObservationEpoch,
        ephemeris: &E,
        atmosphere: &A,
    ) -> Option<ModeledSatellite> {
        let rv = &rover.satellites[cd.rover_idx];
        let bs = &base.satellites[cd.base_idx];

        // transmission time from any available pseudo range
        let pseudo_range_m = rv
            .signals
            .iter()
            .find_map(|sig| sig.pseudo_range_m)?;

        let t_tx = t - pseudo_range_m / SPEED_OF_LIGHT_M_S * Unit::Second;
        let sat = ephemeris.satellite_state(t_tx, cd.sv)?;

        let (rho_rover, unit_rover) = geo::sagnac_range(sat.position_ecef_m, rover_apc);
        let (rho_base, _) = geo::sagnac_range(sat.position_ecef_m, base_apc);

        let (el_rover, az_rover) = geo::elevation_azimuth(rover_apc, sat.position_ecef_m);
        let (el_base, az_base) = geo::elevation_azimuth(base_apc, sat.position_ecef_m);

        let rover_corr = atmosphere.corrections(
            Site::Rover,
            t,
            geo::line_of_sight(rover_apc, el_rover, az_rover),
        );
        let base_corr = atmosphere.corrections(
            Site::Base,
            t,
            geo::line_of_sight(base_apc, el_base, az_base),
        );

        let measured = (0..self.cfg.frequency_slots())
            .map(|slot| SingleDifference::new(rv, bs, slot))
            .collect();

        Some(ModeledSatellite {
            cd: *cd,
            unit_rover,
            geometry_sd_m: rho_rover - rho_base,
            tropo_sd_m: rover_corr.tropo_delay_m - base_corr.tropo_delay_m,
            iono_sd_m: rover_corr.iono_delay_m - base_corr.iono_delay_m,
            tropo_map: (mapping(el_rover), mapping(el_base)),
            measured,
            elevation_rad: cd.elevation_rad,
        })
    }

    /// One (reference − other) row on this slot and observable kind.
    fn form_row(
        &self,
        state: &DVector<f64>,
        reference: &ModeledSatellite,
        other: &ModeledSatellite,
        slot: usize,
        kind: ObservableKind,
        baseline_km: f64,
        skew_s: f64,
    ) -> Option<(DVector<f64>, f64, f64, RowTag)> {
        let sd_ref = reference.measured.get(slot)?.as_ref()?;
        let sd_other = other.measured.get(slot)?.as_ref()?;

        let (measured_ref, measured_other) = match kind {
            ObservableKind::Phase => (sd_ref.phase_m?, sd_other.phase_m?),
            ObservableKind::Code => (sd_ref.code_m?, sd_other.code_m?),
        };

        let ncols = self.layout.len();
        let mut h = DVector::<f64>::zeros(ncols);

        // modeled single differences at the current linearization point
        let mut modeled_ref = reference.geometry_sd_m + reference.tropo_sd_m;
        let mut modeled_other = other.geometry_sd_m + other.tropo_sd_m;

        // position partials: ∂(sd_ref − sd_other)/∂rover = e_other − e_ref
        for i in 0..3 {
            if let Some(col) = self.layout.index_of(ParameterKey::Position(i)) {
                h[col] = other.unit_rover[i] - reference.unit_rover[i];
            }
        }

        // residual zenith troposphere parameters
        if let (Some(col_rover), Some(col_base)) = (
            self.layout.index_of(ParameterKey::TropoRover),
            self.layout.index_of(ParameterKey::TropoBase),
        ) {
            let coeff_rover = reference.tropo_map.0 - other.tropo_map.0;
            let coeff_base = reference.tropo_map.1 - other.tropo_map.1;
            h[col_rover] = coeff_rover;
            h[col_base] = -coeff_base;
            modeled_ref += reference.tropo_map.0 * state[col_rover]
                - reference.tropo_map.1 * state[col_base];
            modeled_other +=
                other.tropo_map.0 * state[col_rover] - other.tropo_map.1 * state[col_base];
        }

        // ionosphere: estimated per satellite, L1-scaled; dispersive
        // sign flips between phase and code
        let iono_sign = match kind {
            ObservableKind::Phase => -1.0,
            ObservableKind::Code => 1.0,
        };

        let l1_hz = Carrier::L1.frequency_hz();

        if self.cfg.estimate_ionosphere {
            let gamma_ref = (l1_hz / sd_ref.frequency_hz).powi(2);
            let gamma_other = (l1_hz / sd_other.frequency_hz).powi(2);

            if let Some(col) = self.layout.index_of(ParameterKey::Iono(reference.cd.sv)) {
                h[col] = iono_sign * gamma_ref;
                modeled_ref += iono_sign * gamma_ref * state[col];
            }
            if let Some(col) = self.layout.index_of(ParameterKey::Iono(other.cd.sv)) {
                h[col] -= iono_sign * gamma_other;
                modeled_other += iono_sign * gamma_other * state[col];
            }
        } else {
            let gamma_ref = (l1_hz / sd_ref.frequency_hz).powi(2);
            let gamma_other = (l1_hz / sd_other.frequency_hz).powi(2);
            modeled_ref += iono_sign * gamma_ref * reference.iono_sd_m;
            modeled_other += iono_sign * gamma_other * other.iono_sd_m;
        }

        if kind == ObservableKind::Phase {
            // carried single difference ambiguities
            let col_ref = self
                .layout
                .index_of(ParameterKey::Ambiguity(reference.cd.sv, slot))?;
            let col_other = self
                .layout
                .index_of(ParameterKey::Ambiguity(other.cd.sv, slot))?;

            h[col_ref] = sd_ref.wavelength_m;
            h[col_other] = -sd_other.wavelength_m;
            modeled_ref += sd_ref.wavelength_m * state[col_ref];
            modeled_other += sd_other.wavelength_m * state[col_other];

            // Glonass inter frequency bias, proportional to the
            // frequency offset against the reference
            if sd_ref.carrier.is_fdma() {
                if let Some(col) = self.layout.index_of(ParameterKey::Ifb(slot)) {
                    let coeff = (sd_ref.frequency_hz - sd_other.frequency_hz) / 1.0E6;
                    h[col] = coeff;
                    // double difference only: contributes (ref − other)
                    modeled_ref += coeff * state[col];
                }
            }
        }

        let residual = (measured_ref - measured_other) - (modeled_ref - modeled_other);

        let is_code = kind == ObservableKind::Code;
        let variance = self.cfg.solver.error_model.sd_variance_m2(
            reference.elevation_rad,
            baseline_km,
            skew_s,
            is_code,
        ) + self.cfg.solver.error_model.sd_variance_m2(
            other.elevation_rad,
            baseline_km,
            skew_s,
            is_code,
        );

        Some((
            h,
            residual,
            variance,
            RowTag::DoubleDifference {
                reference: reference.cd.sv,
                other: other.cd.sv,
                carrier: sd_ref.carrier,
                slot,
                kind,
            },
        ))
    }
}

/// Plain cosecant troposphere mapping.
fn mapping(elevation_rad: f64) -> f64 {
    1.0 / elevation_rad.sin().max(0.05)
}
