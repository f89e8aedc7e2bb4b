//! Decoded observation input
use itertools::Itertools;

use crate::prelude::{Carrier, Epoch, SV};

/// One signal observed on one [Carrier] frequency.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalObservation {
    /// [Carrier] frequency.
    pub carrier: Carrier,
    /// Pseudo range observation, expressed in meters.
    pub pseudo_range_m: Option<f64>,
    /// Carrier phase observation, expressed in cycles.
    pub phase_cycles: Option<f64>,
    /// Possible doppler observation (in Hz).
    pub doppler_hz: Option<f64>,
    /// Possible SNR indication (in dB/Hz).
    pub snr_dbhz: Option<f64>,
    /// Loss of lock indicator, as flagged by the decoder.
    pub loss_of_lock: bool,
}

impl SignalObservation {
    /// Creates new pseudo range [SignalObservation] (in meters), with possible
    /// SNR in dB/Hz.
    pub fn pseudo_range(carrier: Carrier, range_m: f64, snr_dbhz: Option<f64>) -> Self {
        Self {
            snr_dbhz,
            carrier,
            doppler_hz: None,
            phase_cycles: None,
            loss_of_lock: false,
            pseudo_range_m: Some(range_m),
        }
    }

    /// Creates new ambiguous carrier phase [SignalObservation] (in cycles),
    /// with possible SNR in dB/Hz.
    pub fn phase(carrier: Carrier, cycles: f64, snr_dbhz: Option<f64>) -> Self {
        Self {
            snr_dbhz,
            carrier,
            doppler_hz: None,
            loss_of_lock: false,
            pseudo_range_m: None,
            phase_cycles: Some(cycles),
        }
    }

    /// Copies and returns [Self] with defined pseudo range (in meters).
    pub fn with_pseudo_range_m(&self, pseudo_range_m: f64) -> Self {
        let mut s = self.clone();
        s.pseudo_range_m = Some(pseudo_range_m);
        s
    }

    /// Copies and returns [Self] with defined carrier phase (in cycles).
    pub fn with_phase_cycles(&self, cycles: f64) -> Self {
        let mut s = self.clone();
        s.phase_cycles = Some(cycles);
        s
    }

    /// Copies and returns [Self] with the loss of lock indicator raised.
    pub fn with_loss_of_lock(&self) -> Self {
        let mut s = self.clone();
        s.loss_of_lock = true;
        s
    }
}

/// All signals observed on one vehicle at one sampling instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SatelliteObservation {
    /// [SV] identity
    pub sv: SV,
    /// Glonass FDMA frequency channel (-7..=6), when it applies.
    pub glonass_channel: Option<i8>,
    /// Per-[Carrier] signals
    pub signals: Vec<SignalObservation>,
}

impl SatelliteObservation {
    /// Builds a new [SatelliteObservation] from proposed signals.
    pub fn new(sv: SV, signals: Vec<SignalObservation>) -> Self {
        Self {
            sv,
            signals,
            glonass_channel: None,
        }
    }

    /// Copies and returns [Self] with the Glonass FDMA channel defined.
    pub fn with_glonass_channel(&self, channel: i8) -> Self {
        let mut s = self.clone();
        s.glonass_channel = Some(channel);
        s
    }

    /// Returns the signal observed on this [Carrier], if any.
    pub fn signal(&self, carrier: Carrier) -> Option<&SignalObservation> {
        self.signals.iter().find(|sig| sig.carrier == carrier)
    }

    /// Returns the signal occupying this frequency slot, if any.
    pub(crate) fn signal_in_slot(&self, slot: usize) -> Option<&SignalObservation> {
        self.signals.iter().find(|sig| sig.carrier.slot() == slot)
    }

    /// Number of frequency slots carrying a usable phase observation.
    pub(crate) fn usable_phase_count(&self) -> usize {
        self.signals
            .iter()
            .filter(|sig| sig.phase_cycles.is_some())
            .map(|sig| sig.carrier.slot())
            .unique()
            .count()
    }

    /// Discards all signals below given SNR mask.
    pub(crate) fn min_snr_mask(&mut self, min_snr_dbhz: f64) {
        self.signals.retain(|sig| {
            if let Some(snr_dbhz) = sig.snr_dbhz {
                snr_dbhz > min_snr_dbhz
            } else {
                // no SNR information: still retained, because old or exotic
                // receivers may not report SNR at all
                true
            }
        })
    }
}

/// One station's decoded observations at one sampling instant.
/// Satellites are expected sorted by [SV]; [Self::new] enforces it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationEpoch {
    /// Sampling [Epoch]
    pub epoch: Epoch,
    /// Per-[SV] observations, sorted by [SV].
    pub satellites: Vec<SatelliteObservation>,
}

impl ObservationEpoch {
    /// Builds a new [ObservationEpoch], sorting the proposal by [SV].
    pub fn new(epoch: Epoch, mut satellites: Vec<SatelliteObservation>) -> Self {
        satellites.sort_by_key(|obs| obs.sv);
        Self { epoch, satellites }
    }

    /// Returns the observation for this [SV], if it was proposed.
    pub fn satellite(&self, sv: SV) -> Option<&SatelliteObservation> {
        self.satellites
            .binary_search_by_key(&sv, |obs| obs.sv)
            .ok()
            .map(|idx| &self.satellites[idx])
    }

    pub fn is_empty(&self) -> bool {
        self.satellites.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::{ObservationEpoch, SatelliteObservation, SignalObservation};
    use crate::prelude::{Carrier, Constellation, Epoch, SV};

    #[test]
    fn epoch_is_sorted() {
        let g08 = SV::new(Constellation::GPS, 8);
        let g02 = SV::new(Constellation::GPS, 2);

        let epoch = ObservationEpoch::new(
            Epoch::default(),
            vec![
                SatelliteObservation::new(g08, vec![]),
                SatelliteObservation::new(g02, vec![]),
            ],
        );

        assert_eq!(epoch.satellites[0].sv, g02);
        assert_eq!(epoch.satellites[1].sv, g08);
        assert!(epoch.satellite(g08).is_some());
        assert!(epoch.satellite(SV::new(Constellation::GPS, 3)).is_none());
    }

    #[test]
    fn usable_phase_count() {
        let sv = SV::new(Constellation::GPS, 1);
        let obs = SatelliteObservation::new(
            sv,
            vec![
                SignalObservation::phase(Carrier::L1, 1.0e8, Some(45.0)),
                SignalObservation::pseudo_range(Carrier::L2, 2.0e7, Some(40.0)),
            ],
        );
        assert_eq!(obs.usable_phase_count(), 1);
    }
}
