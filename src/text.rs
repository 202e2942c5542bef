//! The external text surface: `enable`, `status`, `hcc_min_freq`,
//! `reserve_cpus` — the sysfs/debugfs attributes the original driver
//! exposes, reworked as functions over `&Controller` that a host binary's
//! own configfs/sysfs/CLI layer can wire up however it likes.

use std::fmt::Write as _;

use axerrno::{AxResult, ax_err};

use crate::controller::Controller;
use crate::cpuset::{CpuSet, MAX_CPUS, parse_cpulist};

/// Parses a boolean write (`"0"`/`"1"`/`"true"`/`"false"`, trimmed).
pub fn parse_bool(s: &str) -> AxResult<bool> {
    match s.trim() {
        "0" | "false" | "n" | "off" => Ok(false),
        "1" | "true" | "y" | "on" => Ok(true),
        _ => ax_err!(InvalidInput, "expected a boolean"),
    }
}

/// Parses a `hcc_min_freq`-style write: whitespace-separated `cpu:freq`
/// tokens. The whole buffer is rejected atomically on the first malformed
/// token, mirroring the original driver's `sscanf` loop.
pub fn parse_hcc_min_freq(s: &str) -> AxResult<Vec<(usize, u32)>> {
    let mut out = Vec::new();
    for token in s.split_whitespace() {
        let Some((cpu, freq)) = token.split_once(':') else {
            return ax_err!(InvalidInput, "expected cpu:freq tokens");
        };
        let (Ok(cpu), Ok(freq)) = (cpu.parse::<usize>(), freq.parse::<u32>()) else {
            return ax_err!(InvalidInput, "expected cpu:freq tokens");
        };
        if cpu >= MAX_CPUS {
            return ax_err!(InvalidInput, "cpu id out of range");
        }
        out.push((cpu, freq));
    }
    Ok(out)
}

/// Formats the current floor table as `hcc_min_freq` read output.
pub fn format_hcc_min_freq(floors: &[u32], possible_cpus: &CpuSet) -> String {
    let mut out = String::new();
    for cpu in possible_cpus.iter() {
        let _ = writeln!(out, "{cpu}:{}", floors[cpu]);
    }
    out
}

impl Controller {
    /// `enable` read.
    pub fn enable_read(&self) -> bool {
        self.is_enabled()
    }

    /// `enable` write.
    pub fn enable_write(&self, s: &str) -> AxResult<()> {
        self.set_enable(parse_bool(s)?)
    }

    /// `hcc_min_freq` read.
    pub fn hcc_min_freq_read(&self) -> String {
        let floors = *self.floors.lock().unwrap();
        format_hcc_min_freq(&floors, &self.possible_cpus)
    }

    /// `hcc_min_freq` write: sets the per-cpu floor applied the next time
    /// the engine isolates that cpu. Does not touch already-isolated cpus.
    pub fn hcc_min_freq_write(&self, s: &str) -> AxResult<()> {
        let entries = parse_hcc_min_freq(s)?;
        let _reservation_guard = self.reservation_mutex.lock().unwrap();
        if !self.is_vcpu_info_populated() {
            return ax_err!(BadState, "vcpu info isn't populated");
        }
        self.state.lock().unwrap().freq_qos_init_done = true;
        let mut floors = self.floors.lock().unwrap();
        for (cpu, freq) in entries {
            floors[cpu] = freq;
        }
        Ok(())
    }

    /// `reserve_cpus` (debugfs) read.
    pub fn reserve_cpus_read(&self) -> String {
        self.reserve_cpus().to_string()
    }

    /// `reserve_cpus` (debugfs) write: only accepted while reservation is
    /// disabled and the new set's weight matches the populated vcpu count.
    pub fn reserve_cpus_write(&self, s: &str) -> AxResult<()> {
        let new_set = parse_cpulist(s)?;
        let _reservation_guard = self.reservation_mutex.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        if !state.is_vcpu_info_populated {
            return ax_err!(BadState, "vcpu info isn't populated");
        }
        if state.reservation_enabled {
            return ax_err!(PermissionDenied, "reservation is enabled");
        }
        let nr_vcpus = self.vcpu_table.lock().unwrap().len();
        if new_set.weight() != nr_vcpus {
            return ax_err!(InvalidInput, "cpu count does not match vcpu count");
        }
        state.reserve_cpus = new_set;
        Ok(())
    }

    /// `status` read: a multi-line dump of every piece of state a human
    /// debugging this controller would want to see at a glance.
    pub fn status(&self) -> String {
        let (enabled, reserve_cpus, final_reserved_cpus, our_isolated_cpus, vcpu_populated, vpm_populated) = {
            let state = self.state.lock().unwrap();
            (
                state.reservation_enabled,
                state.reserve_cpus,
                state.final_reserved_cpus,
                state.our_isolated_cpus,
                state.is_vcpu_info_populated,
                state.is_vpm_group_info_populated,
            )
        };

        let mut out = String::new();
        let _ = writeln!(out, "enable={enabled}");
        let _ = writeln!(out, "reserve_cpus={reserve_cpus}");
        let _ = writeln!(out, "final_reserved_cpus={final_reserved_cpus}");
        let _ = writeln!(out, "our_isolated_cpus={our_isolated_cpus}");
        let _ = writeln!(out, "isolated_cpus={}", self.platform.isolated_cpus());
        let _ = writeln!(out, "online_cpus={}", online_cpus(self));
        let _ = writeln!(
            out,
            "thermal_throttled_cpus={}",
            self.platform.thermal_throttled_cpus()
        );
        let _ = writeln!(out, "is_vcpu_info_populated={vcpu_populated}");
        let _ = writeln!(out, "is_vpm_group_info_populated={vpm_populated}");
        for (idx, pcpu, curr_pcpu) in self.vcpu_snapshot() {
            let _ = writeln!(out, "vcpu={idx} pcpu={pcpu} curr_pcpu={curr_pcpu}");
        }
        out
    }
}

fn online_cpus(ctrl: &Controller) -> CpuSet {
    let mut set = CpuSet::new();
    for cpu in ctrl.possible_cpus().iter() {
        if ctrl.platform.is_cpu_online(cpu) {
            set.insert(cpu);
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_known_forms() {
        assert_eq!(parse_bool("1").unwrap(), true);
        assert_eq!(parse_bool("0").unwrap(), false);
        assert_eq!(parse_bool(" true ").unwrap(), true);
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn parse_hcc_min_freq_rejects_malformed_token_atomically() {
        let parsed = parse_hcc_min_freq("0:1200 1:1400").unwrap();
        assert_eq!(parsed, vec![(0, 1200), (1, 1400)]);
        assert!(parse_hcc_min_freq("0:1200 garbage").is_err());
        assert!(parse_hcc_min_freq("9999:1200").is_err());
    }

    #[test]
    fn format_hcc_min_freq_lists_possible_cpus() {
        let mut floors = [0u32; MAX_CPUS];
        floors[0] = 1200;
        floors[1] = 1400;
        let possible = CpuSet::from_iter_cpus([0, 1]);
        assert_eq!(format_hcc_min_freq(&floors, &possible), "0:1200\n1:1400\n");
    }
}
