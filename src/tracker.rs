//! Per (satellite, frequency) lock counting and slip triggered resets.
use std::collections::{hash_map::Entry, HashMap};

use log::{debug, warn};

use crate::{
    matcher::CommonSet,
    prelude::{Config, Epoch, ObservationEpoch, SV},
    sd::{geometry_free_m, melbourne_wubbena_cycles, SingleDifference},
};

/// Running average, reset on slip.
#[derive(Debug, Clone, Copy, Default)]
struct Averager {
    y: f64,
    n: u64,
}

impl Averager {
    /// Updates average value, taking new `x` into account
    fn average(&mut self, x: f64) -> f64 {
        self.y = (x + (self.n as f64) * self.y) / (self.n + 1) as f64;
        self.n += 1;
        self.y
    }

    /// Hard reset
    fn reset(&mut self) {
        self.y = 0.0;
        self.n = 0;
    }

    fn value(&self) -> Option<f64> {
        if self.n > 0 {
            Some(self.y)
        } else {
            None
        }
    }
}

/// Persistent tracking state of one (satellite, frequency slot) channel.
#[derive(Debug, Clone, Copy)]
pub struct TrackState {
    /// Continuous slip-free epochs. Strictly increases while tracking
    /// holds, resets to exactly 0 on any detected slip.
    pub lock: u32,
    /// Carried float single difference ambiguity, cycles.
    pub ambiguity_cycles: f64,
    /// Variance over the carried ambiguity, cycles².
    pub variance_cycles2: f64,
    /// True once an integer fix was accepted for this channel.
    pub fixed: bool,
    /// True if a slip was declared this very epoch.
    pub slip: bool,
    /// Geometry free memory, meters.
    gf_m: Option<f64>,
    /// Melbourne-Wübbena running average, wide lane cycles.
    mw: Averager,
    /// Last epoch this channel contributed.
    last_seen: Epoch,
}

impl TrackState {
    fn new(t: Epoch, seed_cycles: f64, seed_variance: f64) -> Self {
        Self {
            lock: 0,
            ambiguity_cycles: seed_cycles,
            variance_cycles2: seed_variance,
            fixed: false,
            slip: true,
            gf_m: None,
            mw: Averager::default(),
            last_seen: t,
        }
    }

    /// Wide lane running average, when it formed.
    pub(crate) fn wide_lane_cycles(&self) -> Option<f64> {
        self.mw.value()
    }
}

/// What one tracking pass decided, per frequency slot.
#[derive(Debug, Clone, Default)]
pub(crate) struct TrackingSummary {
    /// (SV, slot) channels that reset this epoch.
    pub resets: Vec<(SV, usize)>,
    /// Frequency slots where the majority rule fired: everything on the
    /// slot (and the dynamic block) is to be re-initialized.
    pub majority_reset_slots: Vec<usize>,
}

impl TrackingSummary {
    pub fn is_reset(&self, sv: SV, slot: usize) -> bool {
        self.majority_reset_slots.contains(&slot) || self.resets.contains(&(sv, slot))
    }
}

/// [ChannelTracker] runs the per-channel state machine
/// {untracked → tracked(n) → reset → tracked(0)} over every common
/// satellite, every epoch.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChannelTracker {
    channels: HashMap<(SV, usize), TrackState>,
}

impl ChannelTracker {
    /// One tracking pass over this epoch's common satellites.
    pub fn run(
        &mut self,
        cfg: &Config,
        common: &CommonSet,
        rover: &ObservationEpoch,
        base: &ObservationEpoch,
    ) -> TrackingSummary {
        let t = rover.epoch;
        let slots = cfg.frequency_slots();

        let mut summary = TrackingSummary::default();
        let mut common_per_slot = vec![0usize; slots];
        let mut tracked_resets_per_slot = vec![0usize; slots];

        for cd in common.satellites.iter() {
            let rv = &rover.satellites[cd.rover_idx];
            let bs = &base.satellites[cd.base_idx];

            let sd: Vec<Option<SingleDifference>> = (0..slots)
                .map(|slot| SingleDifference::new(rv, bs, slot))
                .collect();

            // dual frequency combinations, when both slots formed
            let (gf_m, mw_cycles) = match (sd.first(), sd.get(1)) {
                (Some(Some(l1)), Some(Some(l2))) => (
                    geometry_free_m(l1, l2),
                    melbourne_wubbena_cycles(l1, l2),
                ),
                _ => (None, None),
            };

            for slot in 0..slots {
                if !cd.has_phase(slot) {
                    continue;
                }

                let Some(sd_slot) = &sd[slot] else {
                    continue;
                };

                common_per_slot[slot] += 1;

                let seed = seed_cycles(sd_slot);
                let seed_var = cfg.solver.initial_variances.ambiguity_cycles2;

                let entry = match self.channels.entry((cd.sv, slot)) {
                    Entry::Vacant(vacant) => {
                        debug!("{}({}/L{}) - new channel", t, cd.sv, slot + 1);
                        vacant.insert(TrackState::new(t, seed, seed_var));
                        summary.resets.push((cd.sv, slot));
                        continue;
                    },
                    Entry::Occupied(occupied) => occupied.into_mut(),
                };

                let mut slip = false;

                let loss_of_lock = rv
                    .signal_in_slot(slot)
                    .map(|sig| sig.loss_of_lock)
                    .unwrap_or(false)
                    || bs
                        .signal_in_slot(slot)
                        .map(|sig| sig.loss_of_lock)
                        .unwrap_or(false);

                if loss_of_lock {
                    debug!("{}({}/L{}) - decoder loss of lock", t, cd.sv, slot + 1);
                    slip = true;
                }

                if t - entry.last_seen > cfg.tracking.max_outage {
                    debug!("{}({}/L{}) - stale interval", t, cd.sv, slot + 1);
                    slip = true;
                }

                if let (Some(gf), Some(prev)) = (gf_m, entry.gf_m) {
                    if (gf - prev).abs() > cfg.tracking.gf_slip_threshold_m {
                        debug!(
                            "{}({}/L{}) - geometry free jump {:.3} m",
                            t,
                            cd.sv,
                            slot + 1,
                            (gf - prev).abs()
                        );
                        slip = true;
                    }
                }

                if let (Some(mw), Some(mean)) = (mw_cycles, entry.mw.value()) {
                    if (mw - mean).abs() > cfg.tracking.mw_slip_threshold_cycles {
                        debug!(
                            "{}({}/L{}) - Melbourne-Wübbena jump {:.2} cycles",
                            t,
                            cd.sv,
                            slot + 1,
                            (mw - mean).abs()
                        );
                        slip = true;
                    }
                }

                if slip {
                    entry.lock = 0;
                    entry.slip = true;
                    entry.fixed = false;
                    entry.ambiguity_cycles = seed;
                    entry.variance_cycles2 = seed_var;
                    entry.mw.reset();
                    summary.resets.push((cd.sv, slot));
                    tracked_resets_per_slot[slot] += 1;
                } else {
                    entry.lock += 1;
                    entry.slip = false;
                }

                entry.gf_m = gf_m;
                if let Some(mw) = mw_cycles {
                    entry.mw.average(mw);
                }
                entry.last_seen = t;
            }
        }

        // majority rule: too many simultaneous slips on one frequency
        // reads as a receiver discontinuity, not as real slips
        for slot in 0..slots {
            if common_per_slot[slot] == 0 {
                continue;
            }

            let fraction = tracked_resets_per_slot[slot] as f64 / common_per_slot[slot] as f64;

            if fraction > cfg.tracking.majority_reset_fraction {
                warn!(
                    "{} - majority reset on L{} ({}/{} channels)",
                    t,
                    slot + 1,
                    tracked_resets_per_slot[slot],
                    common_per_slot[slot]
                );

                summary.majority_reset_slots.push(slot);

                for ((sv, chan_slot), entry) in self.channels.iter_mut() {
                    if *chan_slot == slot {
                        entry.lock = 0;
                        entry.slip = true;
                        entry.fixed = false;
                        entry.variance_cycles2 = cfg.solver.initial_variances.ambiguity_cycles2;
                        entry.mw.reset();
                        if !summary.resets.contains(&(*sv, slot)) {
                            summary.resets.push((*sv, slot));
                        }
                    }
                }
            }
        }

        summary
    }

    /// Carried state of one channel.
    pub fn channel(&self, sv: SV, slot: usize) -> Option<&TrackState> {
        self.channels.get(&(sv, slot))
    }

    /// Writes the filter's updated float estimate back into the channel.
    pub fn feedback(&mut self, sv: SV, slot: usize, ambiguity_cycles: f64, variance_cycles2: f64) {
        if let Some(entry) = self.channels.get_mut(&(sv, slot)) {
            entry.ambiguity_cycles = ambiguity_cycles;
            entry.variance_cycles2 = variance_cycles2;
        }
    }

    /// Raises the fixed flag after an accepted integer resolution.
    pub fn mark_fixed(&mut self, sv: SV, slot: usize, fixed: bool) {
        if let Some(entry) = self.channels.get_mut(&(sv, slot)) {
            entry.fixed = fixed;
        }
    }
}

/// Approximate ambiguity from code minus phase, in cycles.
fn seed_cycles(sd: &SingleDifference) -> f64 {
    match (sd.phase_m, sd.code_m) {
        (Some(phase_m), Some(code_m)) => (phase_m - code_m) / sd.wavelength_m,
        (Some(phase_m), None) => phase_m / sd.wavelength_m,
        _ => 0.0,
    }
}

#[cfg(test)]
mod test {
    use super::ChannelTracker;
    use crate::{
        epoch::{SatelliteObservation, SignalObservation},
        matcher::CommonSet,
        prelude::{Carrier, Config, Constellation, Epoch, ObservationEpoch, SV},
        spp::{SkyView, SppSolution},
    };
    use hifitime::Unit;

    fn station(svs: &[SV], t: Epoch, slipped: Option<SV>) -> ObservationEpoch {
        ObservationEpoch::new(
            t,
            svs.iter()
                .map(|sv| {
                    let mut l1 = SignalObservation {
                        carrier: Carrier::L1,
                        pseudo_range_m: Some(2.0E7),
                        phase_cycles: Some(1.0E8),
                        ..Default::default()
                    };
                    if slipped == Some(*sv) {
                        l1.loss_of_lock = true;
                    }
                    let l2 = SignalObservation {
                        carrier: Carrier::L2,
                        pseudo_range_m: Some(2.0E7),
                        phase_cycles: Some(0.8E8),
                        ..Default::default()
                    };
                    SatelliteObservation::new(*sv, vec![l1, l2])
                })
                .collect(),
        )
    }

    fn spp_for(svs: &[SV]) -> SppSolution {
        let mut solution = SppSolution::default();
        for sv in svs {
            solution.sky.insert(
                *sv,
                SkyView {
                    elevation_rad: 0.8,
                    azimuth_rad: 0.0,
                    usable: true,
                },
            );
        }
        solution
    }

    #[test]
    fn lock_counts_and_slip_reset() {
        let cfg = Config::default();
        let mut tracker = ChannelTracker::default();

        let svs: Vec<SV> = (1..=4).map(|prn| SV::new(Constellation::GPS, prn)).collect();
        let spp = spp_for(&svs);

        let t0 = Epoch::default();

        for k in 0..3 {
            let t = t0 + (k as f64) * Unit::Second;
            let rover = station(&svs, t, None);
            let base = station(&svs, t, None);
            let common = CommonSet::match_epochs(&cfg, &rover, &base, &spp, &spp, true);
            tracker.run(&cfg, &common, &rover, &base);
        }

        // first epoch creates the channel at 0, two more increment it
        assert_eq!(tracker.channel(svs[0], 0).unwrap().lock, 2);

        // decoder flagged slip on one vehicle: its counter resets to
        // exactly 0, everyone else keeps counting
        let t = t0 + 3.0 * Unit::Second;
        let rover = station(&svs, t, Some(svs[1]));
        let base = station(&svs, t, None);
        let common = CommonSet::match_epochs(&cfg, &rover, &base, &spp, &spp, true);
        let summary = tracker.run(&cfg, &common, &rover, &base);

        assert!(summary.is_reset(svs[1], 0));
        assert_eq!(tracker.channel(svs[1], 0).unwrap().lock, 0);
        assert!(tracker.channel(svs[1], 0).unwrap().slip);
        assert_eq!(tracker.channel(svs[0], 0).unwrap().lock, 3);
        assert!(!tracker.channel(svs[0], 0).unwrap().slip);
    }

    #[test]
    fn majority_reset_fires() {
        let cfg = Config::default();
        let mut tracker = ChannelTracker::default();

        let svs: Vec<SV> = (1..=4).map(|prn| SV::new(Constellation::GPS, prn)).collect();
        let spp = spp_for(&svs);
        let t0 = Epoch::default();

        let rover = station(&svs, t0, None);
        let base = station(&svs, t0, None);
        let common = CommonSet::match_epochs(&cfg, &rover, &base, &spp, &spp, true);
        tracker.run(&cfg, &common, &rover, &base);

        // 3 of 4 vehicles flag loss of lock at once
        let t = t0 + 1.0 * Unit::Second;
        let mut rover = station(&svs, t, None);
        for obs in rover.satellites.iter_mut().take(3) {
            for sig in obs.signals.iter_mut() {
                sig.loss_of_lock = true;
            }
        }
        let base = station(&svs, t, None);
        let common = CommonSet::match_epochs(&cfg, &rover, &base, &spp, &spp, true);
        let summary = tracker.run(&cfg, &common, &rover, &base);

        assert!(summary.majority_reset_slots.contains(&0));
        // the untouched vehicle resets too, by the majority rule
        assert!(summary.is_reset(svs[3], 0));
        assert_eq!(tracker.channel(svs[3], 0).unwrap().lock, 0);
    }
}
