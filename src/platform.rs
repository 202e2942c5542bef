//! The collaborators a host environment must provide.
//!
//! Everything here is out of scope for this crate's own logic (`spec.md`
//! §1, §6): the hypercall transport, the host scheduler's isolate/unisolate
//! primitive, the thermal and hotplug subsystems, and the frequency-floor
//! QoS layer. Production code wires a real implementation at
//! `Controller::new`; tests wire a fake that just records calls.

use axerrno::AxResult;

use crate::cpuset::{CpuSet, PCpu};
use crate::vcpu::CapId;

/// State reported by `vpm_group_get_state`, mirroring the VPM group states
/// the original driver reads off the secondary VM's power-manager group.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VpmState {
    Running = 1,
    CpusSuspended = 2,
    SystemSuspended = 3,
}

impl TryFrom<u64> for VpmState {
    type Error = ();

    fn try_from(v: u64) -> Result<Self, ()> {
        match v {
            1 => Ok(VpmState::Running),
            2 => Ok(VpmState::CpusSuspended),
            3 => Ok(VpmState::SystemSuspended),
            _ => Err(()),
        }
    }
}

/// The host/hypervisor contract this crate relies on.
///
/// Implementors must be safe to call from the worker thread and from event
/// callbacks that may run concurrently with it; the controller never calls
/// these methods while holding its own internal locks.
pub trait Platform: Send + Sync {
    /// All physical CPUs this host could ever bring online.
    fn possible_cpus(&self) -> CpuSet;

    /// Physical CPUs currently online.
    fn is_cpu_online(&self, cpu: PCpu) -> bool;

    /// Physical CPUs currently isolated by *any* actor on the host, not just
    /// this controller. Used for status reporting only.
    fn isolated_cpus(&self) -> CpuSet;

    /// Physical CPUs the thermal subsystem currently has throttled.
    fn thermal_throttled_cpus(&self) -> CpuSet;

    /// Removes `cpu` from the host scheduler, blocking until complete.
    fn isolate_cpu(&self, cpu: PCpu) -> AxResult<()>;

    /// Restores `cpu` to the host scheduler, blocking until complete.
    fn unisolate_cpu(&self, cpu: PCpu) -> AxResult<()>;

    /// Same as `unisolate_cpu`, but callable from a context that must not
    /// block (hotplug-offline notifier).
    fn unisolate_cpu_unlocked(&self, cpu: PCpu);

    /// Pins the vcpu identified by `cap_id` to `cpu` via hypercall.
    fn vcpu_affinity_set(&self, cap_id: CapId, cpu: PCpu) -> AxResult<()>;

    /// Reads the current power-manager state of the secondary VM's vpm
    /// group identified by `cap_id`.
    fn vpm_group_get_state(&self, cap_id: CapId) -> AxResult<VpmState>;

    /// Raises the floor frequency of `cpu`'s policy to `freq_khz`.
    fn set_min_freq(&self, cpu: PCpu, freq_khz: u32);

    /// Resets `cpu`'s floor frequency to the platform default.
    fn reset_min_freq(&self, cpu: PCpu);
}
