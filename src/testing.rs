//! A fake [`Platform`] for unit and scenario tests. Records every call it
//! receives instead of touching any real scheduler, hypervisor or QoS
//! layer, and lets a test script flip "offline" or "throttled" out from
//! under the controller between event deliveries.

use std::sync::Mutex;

use axerrno::{AxResult, ax_err};

use crate::cpuset::{CpuSet, PCpu};
use crate::platform::{Platform, VpmState};
use crate::vcpu::CapId;

#[derive(Default)]
struct Inner {
    possible: CpuSet,
    online: CpuSet,
    isolated: CpuSet,
    thermal: CpuSet,
    vpm_state: Option<VpmState>,
    fail_isolate: CpuSet,
    affinity_calls: Vec<(CapId, PCpu)>,
    min_freq_calls: Vec<(PCpu, u32)>,
    reset_freq_calls: Vec<PCpu>,
}

pub struct FakePlatform {
    inner: Mutex<Inner>,
}

impl FakePlatform {
    /// All of `possible` start online and nothing is isolated or throttled.
    pub fn new(possible: CpuSet) -> Self {
        Self {
            inner: Mutex::new(Inner {
                possible,
                online: possible,
                ..Inner::default()
            }),
        }
    }

    pub fn set_online(&self, cpu: PCpu, online: bool) {
        let mut inner = self.inner.lock().unwrap();
        if online {
            inner.online.insert(cpu);
        } else {
            inner.online.remove(cpu);
        }
    }

    pub fn set_throttled(&self, cpu: PCpu, throttled: bool) {
        let mut inner = self.inner.lock().unwrap();
        if throttled {
            inner.thermal.insert(cpu);
        } else {
            inner.thermal.remove(cpu);
        }
    }

    pub fn set_vpm_state(&self, state: VpmState) {
        self.inner.lock().unwrap().vpm_state = Some(state);
    }

    /// Makes `isolate_cpu(cpu)` fail until told otherwise, to exercise the
    /// engine's transient-error logging paths.
    pub fn fail_isolate(&self, cpu: PCpu, fail: bool) {
        let mut inner = self.inner.lock().unwrap();
        if fail {
            inner.fail_isolate.insert(cpu);
        } else {
            inner.fail_isolate.remove(cpu);
        }
    }

    pub fn isolated_cpus_snapshot(&self) -> CpuSet {
        self.inner.lock().unwrap().isolated
    }

    pub fn affinity_calls(&self) -> Vec<(CapId, PCpu)> {
        self.inner.lock().unwrap().affinity_calls.clone()
    }

    pub fn min_freq_calls(&self) -> Vec<(PCpu, u32)> {
        self.inner.lock().unwrap().min_freq_calls.clone()
    }

    pub fn reset_freq_calls(&self) -> Vec<PCpu> {
        self.inner.lock().unwrap().reset_freq_calls.clone()
    }
}

impl Platform for FakePlatform {
    fn possible_cpus(&self) -> CpuSet {
        self.inner.lock().unwrap().possible
    }

    fn is_cpu_online(&self, cpu: PCpu) -> bool {
        self.inner.lock().unwrap().online.contains(cpu)
    }

    fn isolated_cpus(&self) -> CpuSet {
        self.inner.lock().unwrap().isolated
    }

    fn thermal_throttled_cpus(&self) -> CpuSet {
        self.inner.lock().unwrap().thermal
    }

    fn isolate_cpu(&self, cpu: PCpu) -> AxResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_isolate.contains(cpu) {
            return ax_err!(ResourceBusy, "fake isolate failure");
        }
        inner.isolated.insert(cpu);
        Ok(())
    }

    fn unisolate_cpu(&self, cpu: PCpu) -> AxResult<()> {
        self.inner.lock().unwrap().isolated.remove(cpu);
        Ok(())
    }

    fn unisolate_cpu_unlocked(&self, cpu: PCpu) {
        self.inner.lock().unwrap().isolated.remove(cpu);
    }

    fn vcpu_affinity_set(&self, cap_id: CapId, cpu: PCpu) -> AxResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.affinity_calls.push((cap_id, cpu));
        Ok(())
    }

    fn vpm_group_get_state(&self, _cap_id: CapId) -> AxResult<VpmState> {
        self.inner
            .lock()
            .unwrap()
            .vpm_state
            .ok_or_else(|| axerrno::ax_err_type!(BadState, "no vpm state configured"))
    }

    fn set_min_freq(&self, cpu: PCpu, freq_khz: u32) {
        self.inner.lock().unwrap().min_freq_calls.push((cpu, freq_khz));
    }

    fn reset_min_freq(&self, cpu: PCpu) {
        self.inner.lock().unwrap().reset_freq_calls.push(cpu);
    }
}
