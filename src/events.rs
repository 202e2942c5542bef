//! Public entry points for the five event sources named in `spec.md` §1:
//! the enable/disable control, the thermal notifier, the hotplug
//! online/offline notifiers, the vcpu-populate notifier and the suspend/
//! resume VPM IRQ.

use axerrno::{AxResult, ax_err};
use log::{debug, error, info, warn};

use crate::controller::Controller;
use crate::cpuset::{CpuSet, PCpu};
use crate::platform::VpmState;
use crate::vcpu::{CapId, VcpuRecord};

impl Controller {
    /// Turns reservation on or off. Requires the vcpu table to already be
    /// populated; a no-op if the state doesn't actually change.
    pub fn set_enable(&self, enable: bool) -> AxResult<()> {
        let _reservation_guard = self.reservation_mutex.lock().unwrap();
        let mut state = self.state.lock().unwrap();

        if !state.is_vcpu_info_populated {
            error!("set_enable: vcpu info isn't populated yet");
            return ax_err!(BadState, "vcpu info isn't populated");
        }
        if enable == state.reservation_enabled {
            return Ok(());
        }

        if state.is_vpm_group_info_populated {
            if enable {
                self.watchdog.cancel();
            } else {
                self.watchdog.arm();
            }
        }

        info!("reservation {}", if enable { "enabled" } else { "disabled" });
        state.reservation_enabled = enable;
        state.pending = true;
        drop(state);
        self.cv.notify_one();
        Ok(())
    }

    /// Thermal notifier: `cpu` just transitioned to (or out of) throttled.
    pub fn on_thermal(&self, cpu: PCpu, throttled: bool) {
        let _reservation_guard = self.reservation_mutex.lock().unwrap();
        debug!(
            "cpu{cpu} is {} by thermal",
            if throttled { "throttled" } else { "unthrottled" }
        );

        if throttled {
            let was_isolated = {
                let mut state = self.state.lock().unwrap();
                if !state.final_reserved_cpus.contains(cpu) {
                    return;
                }
                let was = state.our_isolated_cpus.contains(cpu);
                if was {
                    state.our_isolated_cpus.remove(cpu);
                }
                was
            };
            if was_isolated {
                if let Err(e) = self.platform.unisolate_cpu(cpu) {
                    warn!("on_thermal: failed to unisolate throttled cpu{cpu}: {e:?}");
                }
            }
        } else {
            let relevant = {
                let state = self.state.lock().unwrap();
                state.reserve_cpus.contains(cpu)
                    || state
                        .final_reserved_cpus
                        .intersects(&self.platform.thermal_throttled_cpus())
            };
            if !relevant {
                return;
            }
        }

        let enabled = self.state.lock().unwrap().reservation_enabled;
        if enabled {
            self.wake_worker();
        } else {
            self.handle_thermal(cpu, throttled);
        }
    }

    /// Hotplug offline notifier. Runs without `reservation_mutex`: it must
    /// not block, mirroring the original driver's cpuhp offline callback.
    pub fn on_hotplug_offline(&self, cpu: PCpu) {
        let mut state = self.state.lock().unwrap();
        if !state.reservation_enabled || !state.our_isolated_cpus.contains(cpu) {
            return;
        }
        state.our_isolated_cpus.remove(cpu);
        let freq_qos_init_done = state.freq_qos_init_done;
        drop(state);

        self.platform.unisolate_cpu_unlocked(cpu);
        if freq_qos_init_done {
            self.platform.reset_min_freq(cpu);
        }
    }

    /// Hotplug online notifier. Only wakes the worker if `cpu` is part of
    /// the currently-committed reservation.
    pub fn on_hotplug_online(&self, cpu: PCpu) {
        let mut state = self.state.lock().unwrap();
        if !state.reservation_enabled || !state.final_reserved_cpus.contains(cpu) {
            return;
        }
        state.pending = true;
        drop(state);
        self.cv.notify_one();
    }

    /// Vcpu-populate notifier: records one more `(cap_id, pcpu)` pair while
    /// the secondary VM is still coming up. A no-op once the table has
    /// already been latched by [`Controller::mark_vcpus_running`].
    pub fn populate_vcpu(&self, cap_id: CapId, pcpu: PCpu) -> AxResult<()> {
        let _reservation_guard = self.reservation_mutex.lock().unwrap();
        if self.state.lock().unwrap().is_vcpu_info_populated {
            return Ok(());
        }
        if !self.possible_cpus.contains(pcpu) {
            error!("populate_vcpu: pcpu{pcpu} is not a possible cpu on this host");
            return ax_err!(InvalidInput, "pcpu out of range");
        }
        let mut table = self.vcpu_table.lock().unwrap();
        if table.len() >= self.max_reserve_cpus {
            error!("populate_vcpu: vcpu table full, dropping pcpu{pcpu}");
            return ax_err!(InvalidInput, "vcpu table is full");
        }
        debug!("vcpu{} maps to pcpu{pcpu}", table.len());
        table.push(VcpuRecord::new(cap_id, pcpu));
        Ok(())
    }

    /// VM-status notifier: the secondary VM transitioned to RUNNING. Freezes
    /// the vcpu table and derives `reserve_cpus`/`final_reserved_cpus` from
    /// it. Idempotent.
    pub fn mark_vcpus_running(&self) {
        let _reservation_guard = self.reservation_mutex.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        if state.is_vcpu_info_populated {
            return;
        }
        let table = self.vcpu_table.lock().unwrap();
        let reserve = CpuSet::from_iter_cpus(table.iter().map(|r| r.pcpu_original));
        state.reserve_cpus = reserve;
        state.final_reserved_cpus = reserve;
        state.is_vcpu_info_populated = true;
        info!("vcpu info populated, reserve_cpus={reserve}");
    }

    /// Registers the secondary VM's VPM group handle so the suspend/resume
    /// IRQ handler and the watchdog know what to query.
    pub fn register_vpm_group(&self, cap_id: CapId) {
        let mut state = self.state.lock().unwrap();
        state.vpm_cap_id = cap_id;
        state.is_vpm_group_info_populated = true;
    }

    /// Suspend/resume VPM IRQ handler. Queries the current VPM group state
    /// and cancels the watchdog once the VM has fully suspended.
    pub fn on_vpm_irq(&self) {
        let cap_id = self.state.lock().unwrap().vpm_cap_id;
        let vpm_state = match self.platform.vpm_group_get_state(cap_id) {
            Ok(s) => s,
            Err(e) => {
                error!("on_vpm_irq: failed to read vpm group state: {e:?}");
                return;
            }
        };

        match vpm_state {
            VpmState::Running => {
                if !self.state.lock().unwrap().reservation_enabled {
                    warn!("on_vpm_irq: SVM resumed but reservation isn't enabled");
                }
            }
            VpmState::SystemSuspended => {
                self.watchdog.cancel();
            }
            VpmState::CpusSuspended => {
                error!("on_vpm_irq: unexpected vpm group state {vpm_state:?}");
            }
        }
    }
}
