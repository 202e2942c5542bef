//! The reservation engine: the two passes that do and undo isolation, the
//! thermal swap, and the vcpu-affinity repair pass that follows any change
//! to `final_reserved_cpus`.
//!
//! Grounded directly on `hyp_core_ctl_do_reservation`,
//! `hyp_core_ctl_undo_reservation`, `handle_thermal_notify` and
//! `finalize_reservation` in the original driver. Every `Platform` call here
//! happens without holding `state`; callers serialize engine passes against
//! each other by holding `reservation_mutex` for the duration.

use log::{debug, error, warn};

use crate::controller::Controller;
use crate::cpuset::{CpuSet, PCpu};

impl Controller {
    fn apply_min_freq(&self, cpu: PCpu) {
        if !self.state.lock().unwrap().freq_qos_init_done {
            return;
        }
        let floor = self.floors.lock().unwrap()[cpu];
        if floor != 0 {
            self.platform.set_min_freq(cpu, floor);
        }
    }

    fn reset_min_freq(&self, cpu: PCpu) {
        if self.state.lock().unwrap().freq_qos_init_done {
            self.platform.reset_min_freq(cpu);
        }
    }

    fn sync_our_isolated(&self, updated: CpuSet) {
        self.state.lock().unwrap().our_isolated_cpus = updated;
    }

    /// Brings `our_isolated_cpus` up to `reserve_cpus` (minus whatever is
    /// thermally throttled or offline), then hands the result off to
    /// `finalize_reservation`. Runs while `reservation_mutex` is held.
    pub(crate) fn do_reservation(&self) {
        debug!("do_reservation: start");
        let thermal = self.platform.thermal_throttled_cpus();

        let (reserve_cpus, mut our_isolated) = {
            let state = self.state.lock().unwrap();
            (state.reserve_cpus, state.our_isolated_cpus)
        };

        let mut offline_cpus = CpuSet::new();
        let want_isolated = reserve_cpus.difference(&our_isolated).difference(&thermal);

        for cpu in want_isolated.iter() {
            if !self.platform.is_cpu_online(cpu) {
                offline_cpus.insert(cpu);
                continue;
            }
            match self.platform.isolate_cpu(cpu) {
                Ok(()) => {
                    our_isolated.insert(cpu);
                    self.apply_min_freq(cpu);
                    self.sync_our_isolated(our_isolated);
                }
                Err(e) => debug!("do_reservation: failed to isolate cpu{cpu}: {e:?}"),
            }
        }

        let iso_required = reserve_cpus.difference(&offline_cpus).weight();
        let iso_done = our_isolated.weight();

        if iso_done < iso_required {
            let mut need = iso_required - iso_done;
            let mut candidates = self
                .platform
                .possible_cpus()
                .difference(&our_isolated)
                .difference(&thermal)
                .difference(&offline_cpus);

            // Offline replacement candidates are free: count them as
            // satisfied without ever calling isolate_cpu.
            let mut online_candidates = CpuSet::new();
            for cpu in candidates.iter() {
                if need == 0 {
                    break;
                }
                if self.platform.is_cpu_online(cpu) {
                    online_candidates.insert(cpu);
                } else {
                    offline_cpus.insert(cpu);
                    need -= 1;
                }
            }
            candidates = online_candidates;

            for cpu in candidates.iter() {
                if need == 0 {
                    break;
                }
                match self.platform.isolate_cpu(cpu) {
                    Ok(()) => {
                        our_isolated.insert(cpu);
                        self.apply_min_freq(cpu);
                        self.sync_our_isolated(our_isolated);
                        need -= 1;
                    }
                    Err(e) => {
                        debug!("do_reservation: failed to isolate replacement cpu{cpu}: {e:?}")
                    }
                }
            }
        } else if iso_done > iso_required {
            let mut need = iso_done - iso_required;
            let excess = our_isolated.difference(&reserve_cpus);
            for cpu in excess.iter() {
                if need == 0 {
                    break;
                }
                match self.platform.unisolate_cpu(cpu) {
                    Ok(()) => {
                        our_isolated.remove(cpu);
                        self.reset_min_freq(cpu);
                        self.sync_our_isolated(our_isolated);
                        need -= 1;
                    }
                    Err(e) => warn!("do_reservation: failed to unisolate cpu{cpu}: {e:?}"),
                }
            }
        }

        let target = our_isolated.union(&offline_cpus);
        self.finalize_reservation(target);
        debug!(
            "do_reservation: end our_isolated={} final_reserved={}",
            our_isolated,
            self.final_reserved_cpus()
        );
    }

    /// Releases every CPU this controller holds isolated. Does not issue
    /// vcpu-affinity hypercalls; once isolation is lifted the hypervisor is
    /// free to migrate vcpus on its own.
    pub(crate) fn undo_reservation(&self) {
        debug!("undo_reservation: start");
        let our_isolated = { self.state.lock().unwrap().our_isolated_cpus };
        for cpu in our_isolated.iter() {
            match self.platform.unisolate_cpu(cpu) {
                Ok(()) => {
                    self.state.lock().unwrap().our_isolated_cpus.remove(cpu);
                    self.reset_min_freq(cpu);
                }
                Err(e) => warn!("undo_reservation: failed to unisolate cpu{cpu}: {e:?}"),
            }
        }
        debug!("undo_reservation: end");
    }

    /// Swaps a throttled reserved CPU for a healthy spare (or gives one
    /// back once a throttle clears), then repairs affinity. Called directly
    /// from the thermal notifier while reservation is disabled; while
    /// enabled the notifier just wakes the worker, which reaches this via
    /// `do_reservation`'s `want_isolated` exclusion of `thermal`.
    pub(crate) fn handle_thermal(&self, cpu: PCpu, throttled: bool) {
        let thermal = self.platform.thermal_throttled_cpus();
        let (final_reserved, reserve_cpus) = {
            let state = self.state.lock().unwrap();
            (state.final_reserved_cpus, state.reserve_cpus)
        };

        let mut target = final_reserved;
        let mut changed = false;

        if throttled {
            let candidates = self
                .platform
                .possible_cpus()
                .difference(&thermal)
                .difference(&final_reserved);
            if let Some(replacement) = candidates.any() {
                target.remove(cpu);
                target.insert(replacement);
                changed = true;
            } else {
                error!("handle_thermal: no spare cpu to replace throttled cpu{cpu}");
            }
        } else {
            let candidates = final_reserved.difference(&reserve_cpus);
            if let Some(replacement) = candidates.any() {
                target.remove(replacement);
                target.insert(cpu);
                changed = true;
            }
        }

        if changed {
            self.finalize_reservation(target);
        }
    }

    /// Repairs the vcpu table so that every vcpu sits on a CPU in `target`,
    /// then commits `target` as `final_reserved_cpus`.
    ///
    /// Pass 1 keeps every vcpu that is already on one of its own
    /// `pcpu_original`/`pcpu_current` CPUs within `target`. Pass 2 assigns
    /// the CPUs `target` has left over to whatever vcpus pass 1 didn't
    /// settle, lowest pcpu id first.
    pub(crate) fn finalize_reservation(&self, target: CpuSet) {
        let required = {
            let mut state = self.state.lock().unwrap();
            if target == state.final_reserved_cpus {
                return;
            }
            let required = state.reserve_cpus.weight();
            if target.weight() < required {
                debug!("finalize_reservation: shortfall, keeping previous assignment");
                return;
            }
            state.final_reserved_cpus = target;
            required
        };

        let mut remaining = target;
        let mut table = self.vcpu_table.lock().unwrap();
        let mut unsettled = Vec::new();

        for (idx, rec) in table.iter_mut().enumerate() {
            if remaining.contains(rec.pcpu_original) {
                remaining.remove(rec.pcpu_original);
                if rec.pcpu_current != rec.pcpu_original {
                    match self.platform.vcpu_affinity_set(rec.cap_id, rec.pcpu_original) {
                        Ok(()) => rec.pcpu_current = rec.pcpu_original,
                        Err(e) => warn!(
                            "finalize_reservation: vcpu{idx} affinity restore to pcpu{} failed: {e:?}",
                            rec.pcpu_original
                        ),
                    }
                }
            } else if remaining.contains(rec.pcpu_current) {
                remaining.remove(rec.pcpu_current);
            } else {
                unsettled.push(idx);
            }
        }

        for idx in unsettled {
            let Some(replacement) = remaining.any() else {
                error!("finalize_reservation: no spare pcpu left for vcpu{idx}");
                continue;
            };
            remaining.remove(replacement);
            let rec = &mut table[idx];
            match self.platform.vcpu_affinity_set(rec.cap_id, replacement) {
                Ok(()) => rec.pcpu_current = replacement,
                Err(e) => warn!(
                    "finalize_reservation: vcpu{idx} affinity set to pcpu{replacement} failed: {e:?}"
                ),
            }
        }

        debug_assert_eq!(
            required,
            table.len(),
            "finalize_reservation: reserve_cpus weight must track vcpu count"
        );
        assert!(
            remaining.is_empty(),
            "finalize_reservation: leftover reserved cpus not claimed by any vcpu"
        );
    }
}
