//! Rover minus base single differences, per satellite and frequency slot.
use crate::{
    constants::SPEED_OF_LIGHT_M_S,
    epoch::SatelliteObservation,
    prelude::Carrier,
};

/// Measured single difference (rover − base) on one frequency slot.
/// Satellite clock and orbit errors cancel here; receiver terms and the
/// ambiguity survive into the double difference stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SingleDifference {
    /// [Carrier] both stations observed
    pub carrier: Carrier,
    /// Signal frequency (FDMA channel applied), Hz
    pub frequency_hz: f64,
    /// Wavelength, meters
    pub wavelength_m: f64,
    /// Phase single difference, meters
    pub phase_m: Option<f64>,
    /// Code single difference, meters
    pub code_m: Option<f64>,
}

impl SingleDifference {
    /// Runs the SD algorithm between the two stations' observations of
    /// the same vehicle, on this frequency slot.
    pub fn new(
        rover: &SatelliteObservation,
        base: &SatelliteObservation,
        slot: usize,
    ) -> Option<Self> {
        let rv = rover.signal_in_slot(slot)?;
        let bs = base.signal_in_slot(slot)?;

        if rv.carrier != bs.carrier {
            return None;
        }

        let frequency_hz = rv.carrier.frequency_hz_fdma(rover.glonass_channel);
        let wavelength_m = SPEED_OF_LIGHT_M_S / frequency_hz;

        let phase_m = match (rv.phase_cycles, bs.phase_cycles) {
            (Some(r), Some(b)) => Some((r - b) * wavelength_m),
            _ => None,
        };

        let code_m = match (rv.pseudo_range_m, bs.pseudo_range_m) {
            (Some(r), Some(b)) => Some(r - b),
            _ => None,
        };

        Some(Self {
            carrier: rv.carrier,
            frequency_hz,
            wavelength_m,
            phase_m,
            code_m,
        })
    }
}

/// Geometry free combination of two single differences, in meters.
/// Insensitive to geometry and clocks; jumps flag cycle slips.
pub(crate) fn geometry_free_m(l1: &SingleDifference, l2: &SingleDifference) -> Option<f64> {
    Some(l1.phase_m? - l2.phase_m?)
}

/// Melbourne-Wübbena combination of two single differences, in wide
/// lane cycles. Insensitive to geometry, clocks and ionosphere.
pub(crate) fn melbourne_wubbena_cycles(
    l1: &SingleDifference,
    l2: &SingleDifference,
) -> Option<f64> {
    let (f1, f2) = (l1.frequency_hz, l2.frequency_hz);
    let (phase_1, phase_2) = (l1.phase_m?, l2.phase_m?);
    let (code_1, code_2) = (l1.code_m?, l2.code_m?);

    let wl_phase_m = (f1 * phase_1 - f2 * phase_2) / (f1 - f2);
    let nl_code_m = (f1 * code_1 + f2 * code_2) / (f1 + f2);

    let wl_lambda_m = SPEED_OF_LIGHT_M_S / (f1 - f2);

    Some((wl_phase_m - nl_code_m) / wl_lambda_m)
}

#[cfg(test)]
mod test {
    use super::{geometry_free_m, melbourne_wubbena_cycles, SingleDifference};
    use crate::{
        epoch::{SatelliteObservation, SignalObservation},
        prelude::{Carrier, Constellation, SV},
    };

    fn both_stations(l1_cycles: f64, l2_cycles: f64) -> (SatelliteObservation, SatelliteObservation) {
        let sv = SV::new(Constellation::GPS, 1);
        let rover = SatelliteObservation::new(
            sv,
            vec![
                SignalObservation {
                    carrier: Carrier::L1,
                    pseudo_range_m: Some(2.0E7 + 10.0),
                    phase_cycles: Some(l1_cycles),
                    ..Default::default()
                },
                SignalObservation {
                    carrier: Carrier::L2,
                    pseudo_range_m: Some(2.0E7 + 12.0),
                    phase_cycles: Some(l2_cycles),
                    ..Default::default()
                },
            ],
        );
        let base = SatelliteObservation::new(
            sv,
            vec![
                SignalObservation {
                    carrier: Carrier::L1,
                    pseudo_range_m: Some(2.0E7),
                    phase_cycles: Some(0.0),
                    ..Default::default()
                },
                SignalObservation {
                    carrier: Carrier::L2,
                    pseudo_range_m: Some(2.0E7),
                    phase_cycles: Some(0.0),
                    ..Default::default()
                },
            ],
        );
        (rover, base)
    }

    #[test]
    fn null_difference_against_self() {
        let (rover, _) = both_stations(100.0, 80.0);
        let sd = SingleDifference::new(&rover, &rover, 0).unwrap();
        assert_eq!(sd.phase_m, Some(0.0));
        assert_eq!(sd.code_m, Some(0.0));

        let sd2 = SingleDifference::new(&rover, &rover, 1).unwrap();
        assert_eq!(geometry_free_m(&sd, &sd2), Some(0.0));
        assert_eq!(melbourne_wubbena_cycles(&sd, &sd2), Some(0.0));
    }

    #[test]
    fn phase_converts_to_meters() {
        let (rover, base) = both_stations(10.0, 0.0);
        let sd = SingleDifference::new(&rover, &base, 0).unwrap();
        let lambda = Carrier::L1.wavelength_m();
        assert!((sd.phase_m.unwrap() - 10.0 * lambda).abs() < 1.0E-9);
        assert!((sd.code_m.unwrap() - 10.0).abs() < 1.0E-9);
    }
}
