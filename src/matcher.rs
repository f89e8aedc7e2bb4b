//! Per-epoch rover/base satellite matching and reference election.
use std::collections::{BTreeMap, HashMap};

use log::debug;

use crate::{
    prelude::{Config, Constellation, ObservationEpoch, SV},
    spp::SppSolution,
};

/// One satellite jointly usable by both stations this epoch, with
/// back references into the raw observation arrays.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CommonSatellite {
    /// [SV] identity
    pub sv: SV,
    /// Index into the rover [ObservationEpoch]
    pub rover_idx: usize,
    /// Index into the base [ObservationEpoch]
    pub base_idx: usize,
    /// Elevation at rover, radians
    pub elevation_rad: f64,
    /// Frequency slots carrying phase on both sides (bitmask)
    pub phase_slots: u8,
    /// Frequency slots carrying code on both sides (bitmask)
    pub code_slots: u8,
}

impl CommonSatellite {
    pub fn has_phase(&self, slot: usize) -> bool {
        self.phase_slots & (1 << slot) != 0
    }

    pub fn has_code(&self, slot: usize) -> bool {
        self.code_slots & (1 << slot) != 0
    }

    fn usable_slot_count(&self) -> u32 {
        (self.phase_slots | self.code_slots).count_ones()
    }
}

/// Ephemeral per-epoch set of jointly usable satellites, with one
/// elected reference per constellation.
#[derive(Debug, Clone, Default)]
pub(crate) struct CommonSet {
    /// Jointly usable satellites, grouped by constellation
    pub satellites: Vec<CommonSatellite>,
    /// Elected reference satellite, per constellation
    pub references: HashMap<Constellation, SV>,
}

impl CommonSet {
    /// Intersects the two stations' usable satellite sets and elects
    /// references. Constellations left with fewer than 2 satellites
    /// are excluded for this epoch (no double difference can form).
    /// ## Input
    /// - cfg: [Config] preset
    /// - rover, base: raw observations
    /// - rover_spp, base_spp: per-station absolute solutions
    /// - need_phase: carrier phase required (RTK) or code only (DGPS)
    pub fn match_epochs(
        cfg: &Config,
        rover: &ObservationEpoch,
        base: &ObservationEpoch,
        rover_spp: &SppSolution,
        base_spp: &SppSolution,
        need_phase: bool,
    ) -> Self {
        let slots = cfg.frequency_slots();
        let mut satellites = Vec::with_capacity(rover.satellites.len());

        // merge-intersect: both lists are sorted by SV
        let (mut i, mut j) = (0, 0);
        while i < rover.satellites.len() && j < base.satellites.len() {
            let (rv, bs) = (&rover.satellites[i], &base.satellites[j]);

            if rv.sv < bs.sv {
                i += 1;
                continue;
            }
            if bs.sv < rv.sv {
                j += 1;
                continue;
            }

            let sv = rv.sv;
            let (rover_idx, base_idx) = (i, j);
            i += 1;
            j += 1;

            let rover_view = rover_spp.sky.get(&sv).copied().unwrap_or_default();
            let base_view = base_spp.sky.get(&sv).copied().unwrap_or_default();

            if !rover_view.usable || !base_view.usable {
                debug!("{}({}) - not usable on both sites", rover.epoch, sv);
                continue;
            }

            let mut phase_slots = 0u8;
            let mut code_slots = 0u8;

            for slot in 0..slots {
                if let (Some(r), Some(b)) = (rv.signal_in_slot(slot), bs.signal_in_slot(slot)) {
                    if r.phase_cycles.is_some() && b.phase_cycles.is_some() {
                        phase_slots |= 1 << slot;
                    }
                    if r.pseudo_range_m.is_some() && b.pseudo_range_m.is_some() {
                        code_slots |= 1 << slot;
                    }
                }
            }

            if need_phase && phase_slots == 0 {
                debug!("{}({}) - no common phase", rover.epoch, sv);
                continue;
            }
            if code_slots == 0 && phase_slots == 0 {
                continue;
            }

            satellites.push(CommonSatellite {
                sv,
                rover_idx,
                base_idx,
                elevation_rad: rover_view.elevation_rad,
                phase_slots,
                code_slots,
            });
        }

        // a constellation needs the reference plus at least one other
        let mut retained: Vec<CommonSatellite> = Vec::with_capacity(satellites.len());
        let mut references = HashMap::new();

        let mut grouped: BTreeMap<Constellation, Vec<CommonSatellite>> = BTreeMap::new();
        for cd in satellites.into_iter() {
            grouped.entry(cd.sv.constellation).or_default().push(cd);
        }

        for (constellation, group) in grouped.into_iter() {
            if group.len() < 2 {
                debug!(
                    "{} - {} excluded ({} common)",
                    rover.epoch,
                    constellation,
                    group.len()
                );
                continue;
            }

            // reference: most usable frequencies, ties broken by elevation
            let reference = group
                .iter()
                .max_by(|a, b| {
                    a.usable_slot_count().cmp(&b.usable_slot_count()).then(
                        a.elevation_rad
                            .partial_cmp(&b.elevation_rad)
                            .unwrap_or(std::cmp::Ordering::Equal),
                    )
                })
                .unwrap();

            debug!(
                "{} - {} reference: {} (elev {:.1}°)",
                rover.epoch,
                constellation,
                reference.sv,
                reference.elevation_rad.to_degrees()
            );

            references.insert(constellation, reference.sv);
            retained.extend(group.into_iter());
        }

        Self {
            satellites: retained,
            references,
        }
    }

    /// Reference satellite of this constellation, if elected.
    pub fn reference(&self, constellation: Constellation) -> Option<SV> {
        self.references.get(&constellation).copied()
    }

    /// True if this [SV] is an elected reference.
    pub fn is_reference(&self, sv: SV) -> bool {
        self.reference(sv.constellation) == Some(sv)
    }

    /// Looks a common satellite up by [SV].
    pub fn satellite(&self, sv: SV) -> Option<&CommonSatellite> {
        self.satellites.iter().find(|cd| cd.sv == sv)
    }

    pub fn is_empty(&self) -> bool {
        self.satellites.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::CommonSet;
    use crate::{
        epoch::{SatelliteObservation, SignalObservation},
        prelude::{Carrier, Config, Constellation, Epoch, ObservationEpoch, SV},
        spp::{SkyView, SppSolution},
    };

    fn dual_freq_sat(sv: SV) -> SatelliteObservation {
        SatelliteObservation::new(
            sv,
            vec![
                SignalObservation {
                    carrier: Carrier::L1,
                    pseudo_range_m: Some(2.0E7),
                    phase_cycles: Some(1.0E8),
                    ..Default::default()
                },
                SignalObservation {
                    carrier: Carrier::L2,
                    pseudo_range_m: Some(2.0E7),
                    phase_cycles: Some(0.8E8),
                    ..Default::default()
                },
            ],
        )
    }

    fn spp_with(svs: &[(SV, f64)]) -> SppSolution {
        let mut solution = SppSolution::default();
        for (sv, elev_deg) in svs {
            solution.sky.insert(
                *sv,
                SkyView {
                    elevation_rad: elev_deg.to_radians(),
                    azimuth_rad: 0.0,
                    usable: true,
                },
            );
        }
        solution
    }

    #[test]
    fn intersection_and_reference() {
        let cfg = Config::default();

        let g01 = SV::new(Constellation::GPS, 1);
        let g02 = SV::new(Constellation::GPS, 2);
        let g03 = SV::new(Constellation::GPS, 3);
        let g04 = SV::new(Constellation::GPS, 4);

        let rover = ObservationEpoch::new(
            Epoch::default(),
            vec![dual_freq_sat(g01), dual_freq_sat(g02), dual_freq_sat(g03)],
        );

        // base misses G03, sees G04 instead
        let base = ObservationEpoch::new(
            Epoch::default(),
            vec![dual_freq_sat(g01), dual_freq_sat(g02), dual_freq_sat(g04)],
        );

        let rover_spp = spp_with(&[(g01, 30.0), (g02, 60.0), (g03, 45.0)]);
        let base_spp = spp_with(&[(g01, 31.0), (g02, 61.0), (g04, 20.0)]);

        let common = CommonSet::match_epochs(&cfg, &rover, &base, &rover_spp, &base_spp, true);

        assert_eq!(common.satellites.len(), 2);
        // same frequency count on both: highest rover elevation wins
        assert_eq!(common.reference(Constellation::GPS), Some(g02));
        assert!(common.is_reference(g02));
        assert!(!common.is_reference(g01));
    }

    #[test]
    fn lone_constellation_excluded() {
        let cfg = Config::default();

        let g01 = SV::new(Constellation::GPS, 1);
        let g02 = SV::new(Constellation::GPS, 2);
        let e05 = SV::new(Constellation::Galileo, 5);

        let rover = ObservationEpoch::new(
            Epoch::default(),
            vec![dual_freq_sat(g01), dual_freq_sat(g02), dual_freq_sat(e05)],
        );
        let base = rover.clone();

        let views = spp_with(&[(g01, 30.0), (g02, 45.0), (e05, 50.0)]);
        let common = CommonSet::match_epochs(&cfg, &rover, &base, &views, &views, true);

        // single Galileo vehicle cannot form a double difference
        assert_eq!(common.satellites.len(), 2);
        assert!(common.reference(Constellation::Galileo).is_none());
        assert_eq!(common.reference(Constellation::GPS), Some(g02));
    }
}
