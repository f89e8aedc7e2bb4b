//! Synthetic two-station scenario builder: known geometry, known
//! injected integer ambiguities, pluggable noise.
use std::collections::HashMap;

use nalgebra::{DMatrix, DVector, Vector3};

use crate::{
    epoch::{ObservationEpoch, SatelliteObservation, SignalObservation},
    geo,
    prelude::{
        AmbiguityResolver, AtmosphereCorrections, AtmosphereModel, Carrier, Constellation,
        Duration, EphemerisSource, Epoch, IntegerSolution, LineOfSight, SatelliteState, Site, SV,
    },
};

/// Static satellite sky: [EphemerisSource] over hand-placed vehicles.
#[derive(Debug, Clone, Default)]
pub struct ScenarioEphemeris {
    positions: HashMap<SV, Vector3<f64>>,
}

impl EphemerisSource for ScenarioEphemeris {
    fn satellite_state(&self, _t: Epoch, sv: SV) -> Option<SatelliteState> {
        let position = self.positions.get(&sv)?;
        Some(SatelliteState {
            position_ecef_m: *position,
            velocity_ecef_m_s: Vector3::zeros(),
            clock_offset_s: 0.0,
            clock_drift_s_s: 0.0,
            variance_m2: 1.0E-4,
        })
    }
}

/// Null [AtmosphereModel]: vacuum conditions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAtmosphere;

impl AtmosphereModel for NullAtmosphere {
    fn corrections(&self, _: Site, _: Epoch, _: LineOfSight) -> AtmosphereCorrections {
        AtmosphereCorrections::default()
    }
}

/// Rounding [AmbiguityResolver]: nearest integers as best candidate,
/// the cheapest single-component flip as runner-up. Exact on noiseless
/// data, which is all these scenarios need.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundingResolver;

impl AmbiguityResolver for RoundingResolver {
    fn resolve(
        &self,
        float: &DVector<f64>,
        covariance: &DMatrix<f64>,
        _n_candidates: usize,
    ) -> Option<IntegerSolution> {
        let q_inv = covariance.clone().try_inverse()?;

        let quadratic = |z: &DVector<f64>| -> f64 {
            let d = float - z;
            (d.transpose() * &q_inv * d)[(0, 0)]
        };

        let best = float.map(|v| v.round());
        let s_best = quadratic(&best);

        let mut second: Option<(DVector<f64>, f64)> = None;
        for i in 0..best.len() {
            for step in [-1.0, 1.0] {
                let mut z = best.clone();
                z[i] += step;
                let s = quadratic(&z);
                if second.as_ref().map(|(_, sk)| s < *sk).unwrap_or(true) {
                    second = Some((z, s));
                }
            }
        }

        let (second, s_second) = second?;

        Some(IntegerSolution {
            candidates: vec![best, second],
            residuals: vec![s_best, s_second],
        })
    }
}

/// Two-station scenario with a hand-placed GPS sky and per-station
/// integer ambiguities.
pub struct Scenario {
    pub base_position: Vector3<f64>,
    pub rover_position: Vector3<f64>,
    pub ephemeris: ScenarioEphemeris,
    /// Injected integers, per (station, SV, slot): (rover, base)
    ambiguities: HashMap<(SV, usize), (i64, i64)>,
    /// Extra phase cycles injected on (SV, slot) at rover, from
    /// `slip_from` on (cycle slip simulation).
    slip: Option<(SV, usize, f64, Epoch)>,
    pub t0: Epoch,
    pub interval: Duration,
}

impl Scenario {
    /// Classic setup: base near the equator, rover `east_m` meters to
    /// its east, `n_sats` GPS vehicles spread over the sky.
    pub fn new(n_sats: usize, east_m: f64) -> Self {
        let base_position = Vector3::new(6378337.0, 0.0, 0.0);
        let rover_position = base_position + Vector3::new(0.0, east_m, 0.0);

        // ENU at this site maps to (up=x, east=y, north=z)
        let elevations_deg: [f64; 8] = [75.0, 55.0, 45.0, 60.0, 35.0, 50.0, 65.0, 40.0];
        let azimuths_deg: [f64; 8] = [0.0, 60.0, 120.0, 180.0, 240.0, 300.0, 30.0, 150.0];

        let mut ephemeris = ScenarioEphemeris::default();
        let mut ambiguities = HashMap::new();

        for i in 0..n_sats.min(8) {
            let sv = SV::new(Constellation::GPS, (i + 1) as u8);

            let el = elevations_deg[i].to_radians();
            let az = azimuths_deg[i].to_radians();

            let direction = Vector3::new(el.sin(), el.cos() * az.sin(), el.cos() * az.cos());
            ephemeris
                .positions
                .insert(sv, base_position + direction * 22.0E6);

            for slot in 0..2usize {
                let rover_n = 100_000 + (i as i64) * 37 + (slot as i64) * 11;
                let base_n = 90_000 + (i as i64) * 23 + (slot as i64) * 7;
                ambiguities.insert((sv, slot), (rover_n, base_n));
            }
        }

        Self {
            base_position,
            rover_position,
            ephemeris,
            ambiguities,
            slip: None,
            t0: Epoch::default(),
            interval: Duration::from_seconds(1.0),
        }
    }

    /// Injects `cycles` extra phase on this vehicle's slot at rover,
    /// from `from` on.
    pub fn with_slip(mut self, sv: SV, slot: usize, cycles: f64, from: Epoch) -> Self {
        self.slip = Some((sv, slot, cycles, from));
        self
    }

    /// Epoch instant number `k`.
    pub fn epoch(&self, k: usize) -> Epoch {
        self.t0 + self.interval * (k as f64)
    }

    /// True double difference integer (reference − other) on this slot.
    pub fn truth_dd(&self, reference: SV, other: SV, slot: usize) -> f64 {
        let (ref_rover, ref_base) = self.ambiguities[&(reference, slot)];
        let (other_rover, other_base) = self.ambiguities[&(other, slot)];
        ((ref_rover - ref_base) - (other_rover - other_base)) as f64
    }

    /// Observation pair for epoch `k`.
    pub fn observe(&self, k: usize) -> (ObservationEpoch, ObservationEpoch) {
        let t = self.epoch(k);
        (
            self.observe_station(t, self.rover_position, true),
            self.observe_station(t, self.base_position, false),
        )
    }

    /// Same, with the base sampled `offset` later (skew injection).
    pub fn observe_skewed(&self, k: usize, offset: Duration) -> (ObservationEpoch, ObservationEpoch) {
        let t = self.epoch(k);
        let mut base = self.observe_station(t, self.base_position, false);
        base.epoch = t + offset;
        (self.observe_station(t, self.rover_position, true), base)
    }

    fn observe_station(
        &self,
        t: Epoch,
        station: Vector3<f64>,
        is_rover: bool,
    ) -> ObservationEpoch {
        let mut satellites = Vec::new();

        for (sv, sat_position) in self.ephemeris.positions.iter() {
            let (rho, _) = geo::sagnac_range(*sat_position, station);

            let mut signals = Vec::new();

            for (slot, carrier) in [(0usize, Carrier::L1), (1, Carrier::L2)] {
                let lambda = carrier.wavelength_m();
                let (rover_n, base_n) = self.ambiguities[&(*sv, slot)];
                let n = if is_rover { rover_n } else { base_n };

                let mut phase_cycles = rho / lambda + n as f64;

                if is_rover {
                    if let Some((slip_sv, slip_slot, cycles, from)) = self.slip {
                        if slip_sv == *sv && slip_slot == slot && t >= from {
                            phase_cycles += cycles;
                        }
                    }
                }

                signals.push(SignalObservation {
                    carrier,
                    pseudo_range_m: Some(rho),
                    phase_cycles: Some(phase_cycles),
                    doppler_hz: None,
                    snr_dbhz: Some(45.0),
                    loss_of_lock: false,
                });
            }

            satellites.push(SatelliteObservation::new(*sv, signals));
        }

        ObservationEpoch::new(t, satellites)
    }
}
