//! One-shot suspend watchdog.
//!
//! The original driver arms a `timer_list` timer (`hh_suspend_timer`) when
//! the secondary VM is told to suspend and disarms it when the matching VPM
//! IRQ arrives; if it fires first, it just logs a warning. A tick-driven
//! timer wheel has no natural home in a threaded host process, so this is
//! realized as a dedicated thread parked on a `Condvar` with a deadline.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::warn;

struct State {
    generation: u64,
    deadline: Option<Instant>,
    stopping: bool,
}

pub struct Watchdog {
    shared: Arc<(Mutex<State>, Condvar)>,
    timeout: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        let shared = Arc::new((
            Mutex::new(State {
                generation: 0,
                deadline: None,
                stopping: false,
            }),
            Condvar::new(),
        ));
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("hyp_core_ctl_wd".into())
            .spawn(move || Self::run(worker_shared, timeout))
            .expect("failed to spawn suspend-watchdog thread");
        Self {
            shared,
            timeout,
            handle: Mutex::new(Some(handle)),
        }
    }

    fn run(shared: Arc<(Mutex<State>, Condvar)>, timeout: Duration) {
        let (lock, cv) = &*shared;
        let mut state = lock.lock().unwrap();
        loop {
            if state.stopping {
                return;
            }
            match state.deadline {
                None => {
                    state = cv.wait(state).unwrap();
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(
                            "{}ms timeout occurred while waiting for SVM to suspend",
                            timeout.as_millis()
                        );
                        state.deadline = None;
                        continue;
                    }
                    let generation = state.generation;
                    let (guard, _timeout_result) =
                        cv.wait_timeout(state, deadline - now).unwrap();
                    state = guard;
                    if state.generation != generation {
                        // re-armed or cancelled while we were waiting
                        continue;
                    }
                }
            }
        }
    }

    /// Arms (or re-arms) the watchdog for `suspend_timeout_ms` from now.
    pub fn arm(&self) {
        let (lock, cv) = &*self.shared;
        let mut state = lock.lock().unwrap();
        state.generation += 1;
        state.deadline = Some(Instant::now() + self.timeout);
        cv.notify_one();
    }

    /// Disarms the watchdog without logging a timeout.
    pub fn cancel(&self) {
        let (lock, cv) = &*self.shared;
        let mut state = lock.lock().unwrap();
        state.generation += 1;
        state.deadline = None;
        cv.notify_one();
    }

    pub fn shutdown(&self) {
        {
            let (lock, cv) = &*self.shared;
            let mut state = lock.lock().unwrap();
            state.stopping = true;
            cv.notify_one();
        }
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn cancel_before_deadline_does_not_fire() {
        let wd = Watchdog::new(Duration::from_millis(20));
        wd.arm();
        thread::sleep(Duration::from_millis(5));
        wd.cancel();
        thread::sleep(Duration::from_millis(40));
        wd.shutdown();
    }

    #[test]
    fn arm_without_cancel_logs_and_returns_to_sleep() {
        static FIRED: AtomicBool = AtomicBool::new(false);
        let wd = Watchdog::new(Duration::from_millis(10));
        wd.arm();
        thread::sleep(Duration::from_millis(40));
        FIRED.store(true, Ordering::SeqCst);
        wd.shutdown();
        assert!(FIRED.load(Ordering::SeqCst));
    }
}
