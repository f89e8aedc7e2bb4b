//! Per-epoch parameter block layout. The active satellite set changes
//! every epoch, so the layout is recomputed from the [CommonSet] and
//! parameters are addressed by key, never by raw satellite number.
use std::collections::HashMap;

use crate::{
    matcher::CommonSet,
    prelude::{Config, Constellation, SV},
};

/// Identity of one estimated parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ParameterKey {
    /// Rover position component (0..3), ECEF meters.
    Position(usize),
    /// Rover velocity component (0..3), ECEF m/s.
    Velocity(usize),
    /// Residual zenith troposphere delay at rover, meters.
    TropoRover,
    /// Residual zenith troposphere delay at base, meters.
    TropoBase,
    /// Glonass inter frequency bias rate on this slot, meters/MHz.
    Ifb(usize),
    /// Slant ionosphere single difference for this vehicle, meters (L1).
    Iono(SV),
    /// Carried single difference ambiguity, cycles.
    Ambiguity(SV, usize),
}

/// Ordered block layout: dynamic, troposphere, IFB, ionosphere,
/// ambiguities. Rebuilt every epoch.
#[derive(Debug, Clone, Default)]
pub(crate) struct ParameterLayout {
    keys: Vec<ParameterKey>,
    index: HashMap<ParameterKey, usize>,
}

impl ParameterLayout {
    /// Builds the layout for this epoch's [CommonSet].
    pub fn build(cfg: &Config, common: &CommonSet) -> Self {
        let mut keys = Vec::with_capacity(8 + 2 * common.satellites.len());

        for i in 0..3 {
            keys.push(ParameterKey::Position(i));
        }

        if cfg.mode.estimates_velocity() {
            for i in 0..3 {
                keys.push(ParameterKey::Velocity(i));
            }
        }

        if cfg.estimate_troposphere {
            keys.push(ParameterKey::TropoRover);
            keys.push(ParameterKey::TropoBase);
        }

        let fdma = common
            .satellites
            .iter()
            .any(|cd| cd.sv.constellation == Constellation::Glonass);

        if fdma {
            for slot in 0..cfg.frequency_slots() {
                keys.push(ParameterKey::Ifb(slot));
            }
        }

        if cfg.estimate_ionosphere {
            for cd in common.satellites.iter() {
                keys.push(ParameterKey::Iono(cd.sv));
            }
        }

        if cfg.mode.is_rtk() {
            for cd in common.satellites.iter() {
                for slot in 0..cfg.frequency_slots() {
                    if cd.has_phase(slot) {
                        keys.push(ParameterKey::Ambiguity(cd.sv, slot));
                    }
                }
            }
        }

        let index = keys.iter().enumerate().map(|(i, k)| (*k, i)).collect();

        Self { keys, index }
    }

    /// Column this key occupies, if present.
    pub fn index_of(&self, key: ParameterKey) -> Option<usize> {
        self.index.get(&key).copied()
    }

    /// Number of estimated parameters.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Ordered keys.
    pub fn keys(&self) -> &[ParameterKey] {
        &self.keys
    }

    /// Active ambiguity parameters, in layout order.
    pub fn ambiguities(&self) -> impl Iterator<Item = (SV, usize, usize)> + '_ {
        self.keys.iter().enumerate().filter_map(|(i, key)| match key {
            ParameterKey::Ambiguity(sv, slot) => Some((*sv, *slot, i)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod test {
    use super::{ParameterKey, ParameterLayout};
    use crate::{
        matcher::{CommonSatellite, CommonSet},
        prelude::{Config, Constellation, PositioningMode, SV},
    };

    fn common_of(svs: &[SV]) -> CommonSet {
        CommonSet {
            satellites: svs
                .iter()
                .map(|sv| CommonSatellite {
                    sv: *sv,
                    rover_idx: 0,
                    base_idx: 0,
                    elevation_rad: 0.8,
                    phase_slots: 0b11,
                    code_slots: 0b11,
                })
                .collect(),
            references: Default::default(),
        }
    }

    #[test]
    fn static_dual_freq_layout() {
        let mut cfg = Config::default();
        cfg.mode = PositioningMode::Static;

        let svs: Vec<SV> = (1..=3).map(|prn| SV::new(Constellation::GPS, prn)).collect();
        let layout = ParameterLayout::build(&cfg, &common_of(&svs));

        // 3 position + 3 sats × 2 slots
        assert_eq!(layout.len(), 9);
        assert_eq!(layout.index_of(ParameterKey::Position(0)), Some(0));
        assert_eq!(layout.index_of(ParameterKey::Velocity(0)), None);
        assert_eq!(
            layout.index_of(ParameterKey::Ambiguity(svs[0], 0)),
            Some(3)
        );
        assert_eq!(layout.ambiguities().count(), 6);
    }

    #[test]
    fn kinematic_carries_velocity() {
        let mut cfg = Config::default();
        cfg.mode = PositioningMode::Kinematic;

        let svs: Vec<SV> = (1..=2).map(|prn| SV::new(Constellation::GPS, prn)).collect();
        let layout = ParameterLayout::build(&cfg, &common_of(&svs));

        assert_eq!(layout.index_of(ParameterKey::Velocity(2)), Some(5));
        assert_eq!(layout.len(), 6 + 4);
    }

    #[test]
    fn glonass_brings_ifb() {
        let mut cfg = Config::default();
        cfg.mode = PositioningMode::Static;
        cfg.frequencies = 1;

        let svs = [
            SV::new(Constellation::GPS, 1),
            SV::new(Constellation::Glonass, 2),
        ];
        let layout = ParameterLayout::build(&cfg, &common_of(&svs));
        assert!(layout.index_of(ParameterKey::Ifb(0)).is_some());
        assert!(layout.index_of(ParameterKey::Ifb(1)).is_none());
    }
}
