//! Controller configuration.

/// Tunables fixed at controller construction time.
///
/// Replaces the original driver's scattered module-level globals
/// (`HH_RM_VPM_GRP_SUSPEND_WAIT_MS`, `FREQ_QOS_MIN_DEFAULT_VALUE`) with a
/// single struct built once.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// How long the watchdog waits for a suspend-path VPM IRQ to arrive
    /// after `arm()` before logging a timeout warning.
    pub suspend_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            suspend_timeout_ms: 1000,
        }
    }
}
