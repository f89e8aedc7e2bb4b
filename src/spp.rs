//! Single point solver: absolute per-station fix from code observations.
use std::collections::HashMap;

use hifitime::Unit;
use itertools::Itertools;
use log::{debug, error};
use nalgebra::{DMatrix, DVector, Vector3};

use crate::{
    constants::SPEED_OF_LIGHT_M_S,
    error::{Error, GeometryError},
    geo,
    prelude::{Config, Constellation, Epoch, ObservationEpoch, SV},
    providers::{AtmosphereModel, EphemerisSource, SatelliteState, Site},
};

/// Weight assigned to the zero-information pseudo rows padding system
/// time offset columns of constellations absent this epoch.
const PSEUDO_ROW_WEIGHT: f64 = 1.0E-4;

/// Per-vehicle view a single point solve leaves behind, reused by the
/// satellite matcher and the diagnostics channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SkyView {
    /// Elevation above local horizon, radians.
    pub elevation_rad: f64,
    /// Azimuth from north, radians.
    pub azimuth_rad: f64,
    /// True if this vehicle passed all masks and its post-fit residual.
    pub usable: bool,
}

/// Absolute per-station solution.
#[derive(Debug, Clone, Default)]
pub struct SppSolution {
    /// Sampling [Epoch]
    pub epoch: Epoch,
    /// Absolute position, ECEF meters.
    pub position_ecef_m: Vector3<f64>,
    /// Receiver clock bias, expressed in meters.
    pub clock_bias_m: f64,
    /// System time offsets of non reference constellations, meters.
    pub system_offsets_m: HashMap<Constellation, f64>,
    /// Per-vehicle [SkyView]
    pub sky: HashMap<SV, SkyView>,
}

impl SppSolution {
    /// Vehicles that contributed to the fix.
    pub fn used_satellites(&self) -> impl Iterator<Item = SV> + '_ {
        self.sky
            .iter()
            .filter(|(_, view)| view.usable)
            .map(|(sv, _)| *sv)
    }
}

/// One vehicle's contribution, gathered before the adjustment.
struct CodeCandidate {
    sv: SV,
    pseudo_range_m: f64,
    state: SatelliteState,
    elevation_rad: f64,
    azimuth_rad: f64,
    excluded: bool,
}

/// [SinglePointSolver] resolves one station's absolute position and
/// clock from code observations, by iterative re-weighted Gauss-Newton.
/// It is the foundation of both stations' usability decisions.
pub(crate) struct SinglePointSolver<'a> {
    cfg: &'a Config,
    site: Site,
}

impl<'a> SinglePointSolver<'a> {
    pub fn new(cfg: &'a Config, site: Site) -> Self {
        Self { cfg, site }
    }

    /// Absolute solving attempt.
    /// ## Input
    /// - observations: this station's [ObservationEpoch]
    /// - ephemeris: external [EphemerisSource]
    /// - atmosphere: external [AtmosphereModel]
    /// - apriori: previous fix (speeds up convergence), if any
    pub fn solve<E: EphemerisSource, A: AtmosphereModel>(
        &self,
        observations: &ObservationEpoch,
        ephemeris: &E,
        atmosphere: &A,
        apriori: Option<Vector3<f64>>,
    ) -> Result<SppSolution, Error> {
        let t = observations.epoch;
        let mut candidates = self.gather(t, observations, ephemeris);

        // pass 0 solves, pass 1 re-solves after outlier exclusion
        let mut solution = self.adjust(t, &mut candidates, atmosphere, apriori)?;

        let outliers = self.screen(t, &mut candidates, &solution, atmosphere);
        if outliers > 0 {
            debug!("{}({}) - {} outlier(s), restarting", t, self.site, outliers);
            solution = self.adjust(t, &mut candidates, atmosphere, Some(solution.position_ecef_m))?;
        }

        for cd in candidates.iter() {
            solution.sky.insert(
                cd.sv,
                SkyView {
                    elevation_rad: cd.elevation_rad,
                    azimuth_rad: cd.azimuth_rad,
                    usable: !cd.excluded,
                },
            );
        }

        Ok(solution)
    }

    /// Collects one code candidate per vehicle: best-slot pseudo range,
    /// satellite state at transmission time.
    fn gather<E: EphemerisSource>(
        &self,
        t: Epoch,
        observations: &ObservationEpoch,
        ephemeris: &E,
    ) -> Vec<CodeCandidate> {
        let mut candidates = Vec::with_capacity(observations.satellites.len());

        for obs in observations.satellites.iter() {
            let pseudo_range_m = match obs
                .signals
                .iter()
                .filter_map(|sig| sig.pseudo_range_m.map(|pr| (sig.carrier.slot(), pr)))
                .sorted_by_key(|(slot, _)| *slot)
                .next()
            {
                Some((_, pr)) => pr,
                None => {
                    debug!("{}({}) - {} missing pseudo range", t, self.site, obs.sv);
                    continue;
                },
            };

            // transmission time, first order
            let dt_flight = pseudo_range_m / SPEED_OF_LIGHT_M_S;
            let t_tx = t - dt_flight * Unit::Second;

            let state = match ephemeris.satellite_state(t_tx, obs.sv) {
                Some(state) => state,
                None => {
                    debug!("{}({}) - {} state not resolved", t, self.site, obs.sv);
                    continue;
                },
            };

            candidates.push(CodeCandidate {
                sv: obs.sv,
                pseudo_range_m,
                state,
                elevation_rad: 0.0,
                azimuth_rad: 0.0,
                excluded: false,
            });
        }

        candidates
    }

    /// Iterated weighted Gauss-Newton over the candidate set.
    fn adjust<A: AtmosphereModel>(
        &self,
        t: Epoch,
        candidates: &mut [CodeCandidate],
        atmosphere: &A,
        apriori: Option<Vector3<f64>>,
    ) -> Result<SppSolution, Error> {
        let constellations: Vec<Constellation> = candidates
            .iter()
            .filter(|cd| !cd.excluded)
            .map(|cd| cd.sv.constellation)
            .unique()
            .sorted()
            .collect();

        if constellations.is_empty() {
            return Err(GeometryError::NotEnoughSatellites { needed: 4, got: 0 }.into());
        }

        // x, y, z, clock, one offset per non reference constellation
        let reference = constellations[0];
        let ncols = 4 + constellations.len() - 1;

        let column = |c: Constellation| -> Option<usize> {
            if c == reference {
                None
            } else {
                constellations.iter().position(|k| *k == c).map(|i| 3 + i)
            }
        };

        let mut position = apriori.unwrap_or_else(Vector3::zeros);
        let mut clock_bias_m = 0.0;
        let mut offsets_m = vec![0.0; constellations.len() - 1];

        let min_elevation_rad = self.cfg.min_elevation_deg.to_radians();

        for ith in 0..self.cfg.solver.max_iterations {
            let position_known = position.norm() > 1.0E6;

            let mut rows = Vec::with_capacity(candidates.len() + constellations.len());

            for cd in candidates.iter_mut() {
                if cd.excluded {
                    continue;
                }

                let (el, az) = geo::elevation_azimuth(position, cd.state.position_ecef_m);
                cd.elevation_rad = el;
                cd.azimuth_rad = az;

                if position_known && el < min_elevation_rad {
                    continue;
                }

                let (rho, unit) = geo::sagnac_range(cd.state.position_ecef_m, position);

                let corrections = if position_known {
                    atmosphere.corrections(self.site, t, geo::line_of_sight(position, el, az))
                } else {
                    Default::default()
                };

                let modeled = rho + clock_bias_m
                    + column(cd.sv.constellation)
                        .map(|c| offsets_m[c - 4])
                        .unwrap_or(0.0)
                    - SPEED_OF_LIGHT_M_S * cd.state.clock_offset_s
                    + corrections.tropo_delay_m
                    + corrections.iono_delay_m;

                let residual = cd.pseudo_range_m - modeled;

                let variance = self
                    .cfg
                    .solver
                    .error_model
                    .sd_variance_m2(el, 0.0, 0.0, true)
                    / 2.0
                    + cd.state.variance_m2
                    + corrections.tropo_variance_m2
                    + corrections.iono_variance_m2;

                let mut h = DVector::<f64>::zeros(ncols);
                h[0] = -unit[0];
                h[1] = -unit[1];
                h[2] = -unit[2];
                h[3] = 1.0;
                if let Some(c) = column(cd.sv.constellation) {
                    h[c] = 1.0;
                }

                rows.push((h, residual, 1.0 / variance));
            }

            if rows.len() < ncols {
                return Err(GeometryError::NotEnoughSatellites {
                    needed: ncols,
                    got: rows.len(),
                }
                .into());
            }

            // pad constellations that lost all their observations, so
            // their time offset column does not break the rank
            for (i, constellation) in constellations.iter().enumerate().skip(1) {
                let populated = rows.iter().any(|(h, _, _)| h[3 + i] != 0.0);
                if !populated {
                    debug!("{}({}) - padding {} offset", t, self.site, constellation);
                    let mut h = DVector::<f64>::zeros(ncols);
                    h[3 + i] = 1.0;
                    rows.push((h, 0.0, PSEUDO_ROW_WEIGHT));
                }
            }

            let nrows = rows.len();
            let mut h_mat = DMatrix::<f64>::zeros(nrows, ncols);
            let mut w_mat = DMatrix::<f64>::zeros(nrows, nrows);
            let mut y_vec = DVector::<f64>::zeros(nrows);

            for (i, (h, residual, weight)) in rows.iter().enumerate() {
                h_mat.set_row(i, &h.transpose());
                w_mat[(i, i)] = *weight;
                y_vec[i] = *residual;
            }

            let ht_w = h_mat.transpose() * &w_mat;
            let ht_w_h = &ht_w * &h_mat;
            let ht_w_h_inv = ht_w_h
                .try_inverse()
                .ok_or(Error::Geometry(GeometryError::SingularDesign))?;

            let dx = ht_w_h_inv * (ht_w * y_vec);

            position[0] += dx[0];
            position[1] += dx[1];
            position[2] += dx[2];
            clock_bias_m += dx[3];
            for (i, offset) in offsets_m.iter_mut().enumerate() {
                *offset += dx[4 + i];
            }

            debug!("{}({}) - (i={}) |dx|={:.6e}", t, self.site, ith, dx.norm());

            if dx.norm() < self.cfg.solver.convergence_m {
                break;
            }
        }

        let mut system_offsets_m = HashMap::new();
        for (i, constellation) in constellations.iter().enumerate().skip(1) {
            system_offsets_m.insert(*constellation, offsets_m[i - 1]);
        }

        Ok(SppSolution {
            epoch: t,
            position_ecef_m: position,
            clock_bias_m,
            system_offsets_m,
            sky: HashMap::new(),
        })
    }

    /// Post-fit residual screening. Flags offenders excluded and
    /// returns how many were found.
    fn screen<A: AtmosphereModel>(
        &self,
        t: Epoch,
        candidates: &mut [CodeCandidate],
        solution: &SppSolution,
        atmosphere: &A,
    ) -> usize {
        let mut outliers = 0;
        let min_elevation_rad = self.cfg.min_elevation_deg.to_radians();
        let position = solution.position_ecef_m;

        for cd in candidates.iter_mut() {
            if cd.excluded {
                continue;
            }

            if cd.elevation_rad < min_elevation_rad {
                cd.excluded = true;
                continue;
            }

            let (rho, _) = geo::sagnac_range(cd.state.position_ecef_m, position);

            let corrections = atmosphere.corrections(
                self.site,
                t,
                geo::line_of_sight(position, cd.elevation_rad, cd.azimuth_rad),
            );

            let modeled = rho + solution.clock_bias_m
                + solution
                    .system_offsets_m
                    .get(&cd.sv.constellation)
                    .copied()
                    .unwrap_or(0.0)
                - SPEED_OF_LIGHT_M_S * cd.state.clock_offset_s
                + corrections.tropo_delay_m
                + corrections.iono_delay_m;

            let residual = cd.pseudo_range_m - modeled;

            if residual.abs() > self.cfg.solver.code_outlier_threshold_m {
                error!(
                    "{}({}) - {} rejected (residual {:.1} m)",
                    t, self.site, cd.sv, residual
                );
                cd.excluded = true;
                outliers += 1;
            }
        }

        outliers
    }
}
