//! CPU reservation controller.
//!
//! Cooperates with a hypervisor to give a secondary, secure VM exclusive,
//! thermally-safe use of a reserved set of physical CPUs. This crate owns
//! the reservation state machine and the vcpu↔pcpu assignment algorithm;
//! everything it doesn't own (the hypercall transport, the host scheduler's
//! isolate/unisolate primitive, thermal and hotplug notifications, the
//! frequency-floor QoS layer) is injected through [`Platform`].
//!
//! Event sources call into [`Controller`] directly (see [`mod@events`]);
//! a background worker thread drives the actual reservation passes in
//! [`mod@engine`].

mod config;
mod controller;
mod cpuset;
mod engine;
mod events;
mod platform;
mod text;
mod vcpu;
mod watchdog;
mod worker;

pub use config::Config;
pub use controller::Controller;
pub use cpuset::{CpuSet, MAX_CPUS, PCpu, parse_cpulist};
pub use platform::{Platform, VpmState};
pub use vcpu::{CapId, VcpuRecord};

#[cfg(any(test, feature = "testing"))]
pub mod testing;
