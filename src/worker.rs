//! The background thread that drives the reservation engine.
//!
//! A single long-lived thread, analogous to the original driver's
//! `hcc_kthread`: it sleeps until something sets `pending`, then runs one
//! engine pass while holding `reservation_mutex`, dispatching to
//! `do_reservation` or `undo_reservation` depending on whether reservation
//! is currently enabled.

use std::sync::atomic::Ordering;

use log::debug;

use crate::controller::Controller;

impl Controller {
    pub(crate) fn worker_loop(self: std::sync::Arc<Self>) {
        debug!("worker: started");
        loop {
            {
                let mut state = self.state.lock().unwrap();
                while !state.pending {
                    state = self.cv.wait(state).unwrap();
                }
                state.pending = false;
            }

            if self.stopping.load(Ordering::Acquire) {
                break;
            }

            let _reservation_guard = self.reservation_mutex.lock().unwrap();
            let enabled = self.state.lock().unwrap().reservation_enabled;
            if enabled {
                self.do_reservation();
            } else {
                self.undo_reservation();
            }
        }
        debug!("worker: stopped");
    }
}
