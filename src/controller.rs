//! The reservation controller: shared state, construction and teardown.
//!
//! The actual algorithms live in [`crate::engine`] (the two-phase matching
//! and reservation passes), [`crate::worker`] (the background thread that
//! drives them) and [`crate::events`] (the public entry points external
//! event sources call into). This module just owns the state they all
//! share and the locking discipline around it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::info;

use crate::config::Config;
use crate::cpuset::{CpuSet, MAX_CPUS, PCpu};
use crate::platform::Platform;
use crate::vcpu::{CapId, VcpuRecord};
use crate::watchdog::Watchdog;

/// Everything the short spinlock guards: anything the worker, the event
/// callbacks and the engine all need to touch to agree on "what should be
/// isolated right now" without blocking on a `Platform` call.
pub(crate) struct SharedState {
    pub(crate) pending: bool,
    pub(crate) reservation_enabled: bool,
    pub(crate) reserve_cpus: CpuSet,
    pub(crate) final_reserved_cpus: CpuSet,
    pub(crate) our_isolated_cpus: CpuSet,
    pub(crate) is_vcpu_info_populated: bool,
    pub(crate) is_vpm_group_info_populated: bool,
    pub(crate) freq_qos_init_done: bool,
    pub(crate) vpm_cap_id: CapId,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            pending: false,
            reservation_enabled: false,
            reserve_cpus: CpuSet::new(),
            final_reserved_cpus: CpuSet::new(),
            our_isolated_cpus: CpuSet::new(),
            is_vcpu_info_populated: false,
            is_vpm_group_info_populated: false,
            freq_qos_init_done: false,
            vpm_cap_id: CapId::NONE,
        }
    }
}

pub struct Controller {
    pub(crate) platform: Arc<dyn Platform>,
    #[allow(dead_code)]
    pub(crate) config: Config,
    pub(crate) possible_cpus: CpuSet,
    pub(crate) max_reserve_cpus: usize,

    pub(crate) state: Mutex<SharedState>,
    pub(crate) cv: Condvar,
    pub(crate) reservation_mutex: Mutex<()>,

    pub(crate) vcpu_table: Mutex<Vec<VcpuRecord>>,
    pub(crate) floors: Mutex<[u32; MAX_CPUS]>,

    pub(crate) watchdog: Watchdog,
    pub(crate) stopping: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Controller {
    /// Builds a controller and starts its worker thread.
    ///
    /// `possible_cpus` bounds both the CPU-set capacity this controller will
    /// ever address and, via `weight() / 2`, the maximum number of vcpus
    /// the secondary VM may populate (the original driver's implicit
    /// assumption that the reserved partition never exceeds half the host).
    pub fn new(config: Config, possible_cpus: CpuSet, platform: Arc<dyn Platform>) -> Arc<Self> {
        let timeout = Duration::from_millis(config.suspend_timeout_ms);
        let max_reserve_cpus = possible_cpus.weight() / 2;

        let controller = Arc::new(Self {
            platform,
            config,
            possible_cpus,
            max_reserve_cpus,
            state: Mutex::new(SharedState::default()),
            cv: Condvar::new(),
            reservation_mutex: Mutex::new(()),
            vcpu_table: Mutex::new(Vec::new()),
            floors: Mutex::new([0u32; MAX_CPUS]),
            watchdog: Watchdog::new(timeout),
            stopping: AtomicBool::new(false),
            worker: Mutex::new(None),
        });

        let worker_controller = Arc::clone(&controller);
        let handle = thread::Builder::new()
            .name("hyp_core_ctl".into())
            .spawn(move || worker_controller.worker_loop())
            .expect("failed to spawn hyp_core_ctl worker thread");
        *controller.worker.lock().unwrap() = Some(handle);

        info!("controller started, possible_cpus={}", controller.possible_cpus);
        controller
    }

    /// Stops the worker and watchdog threads and waits for them to exit.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        {
            let mut state = self.state.lock().unwrap();
            state.pending = true;
        }
        self.cv.notify_one();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.watchdog.shutdown();
        info!("controller stopped");
    }

    pub fn possible_cpus(&self) -> CpuSet {
        self.possible_cpus
    }

    pub fn max_reserve_cpus(&self) -> usize {
        self.max_reserve_cpus
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().unwrap().reservation_enabled
    }

    pub fn reserve_cpus(&self) -> CpuSet {
        self.state.lock().unwrap().reserve_cpus
    }

    pub fn final_reserved_cpus(&self) -> CpuSet {
        self.state.lock().unwrap().final_reserved_cpus
    }

    pub fn our_isolated_cpus(&self) -> CpuSet {
        self.state.lock().unwrap().our_isolated_cpus
    }

    pub fn is_vcpu_info_populated(&self) -> bool {
        self.state.lock().unwrap().is_vcpu_info_populated
    }

    /// A snapshot of the vcpu table as `(index, pcpu_original, pcpu_current)`.
    pub fn vcpu_snapshot(&self) -> Vec<(usize, PCpu, PCpu)> {
        self.vcpu_table
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, r)| (i, r.pcpu_original, r.pcpu_current))
            .collect()
    }

    /// Blocks until the worker has no pass pending or in progress.
    ///
    /// Event sources never need this; it exists for callers (and tests)
    /// that want to observe the result of an asynchronous engine pass
    /// synchronously.
    pub fn settle(&self) {
        loop {
            let guard = self.reservation_mutex.lock().unwrap();
            let pending = self.state.lock().unwrap().pending;
            if !pending {
                return;
            }
            drop(guard);
            thread::yield_now();
        }
    }

    pub(crate) fn wake_worker(&self) {
        let mut state = self.state.lock().unwrap();
        state.pending = true;
        drop(state);
        self.cv.notify_one();
    }
}
