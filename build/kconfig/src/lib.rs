// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};

/// Scheduler configuration passed into the kernel build.
///
/// The kernel build script reads this (RON-encoded) from the `SCHED_KCONFIG`
/// environment variable, and falls back to `SchedConfig::default()` when the
/// variable is not set. Fields missing from the RON text take their default
/// values, so a config only needs to name what it changes.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct SchedConfig {
    /// Number of CPUs the kernel keeps per-CPU ready queues for.
    pub max_cpus: u32,

    /// Priority given to a freshly constructed scheduling context.
    pub default_prio: u8,

    /// Quantum (in scheduler clock units, microseconds by convention) given
    /// to contexts that don't ask for one.
    pub default_time_slice: u64,

    /// Capacity of each CPU's weighted-fair-queueing heap. This bounds the
    /// number of WFQ contexts that can be ready on one CPU at once.
    pub wfq_heap_slots: u32,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            max_cpus: 8,
            default_prio: 1,
            default_time_slice: 10_000,
            wfq_heap_slots: 1024,
        }
    }
}

/// Reasons a `SchedConfig` can't be used to build a kernel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// `max_cpus` is zero, or too large to be named by a CPU set.
    CpuCount(u32),
    /// A zero default quantum would make every default context expire
    /// immediately.
    ZeroTimeSlice,
    /// The heap must hold at least one context and its slots are indexed
    /// with `u16`.
    HeapSlots(u32),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::CpuCount(n) => {
                write!(f, "max_cpus must be in 1..=4096, got {n}")
            }
            Self::ZeroTimeSlice => write!(f, "default_time_slice must be > 0"),
            Self::HeapSlots(n) => {
                write!(f, "wfq_heap_slots must be in 1..=65535, got {n}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl SchedConfig {
    /// Checks the config for values the kernel can't represent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_cpus == 0 || self.max_cpus > 4096 {
            return Err(ConfigError::CpuCount(self.max_cpus));
        }
        if self.default_time_slice == 0 {
            return Err(ConfigError::ZeroTimeSlice);
        }
        if self.wfq_heap_slots == 0 || self.wfq_heap_slots > u32::from(u16::MAX)
        {
            return Err(ConfigError::HeapSlots(self.wfq_heap_slots));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(SchedConfig::default().validate(), Ok(()));
    }

    #[test]
    fn partial_ron_keeps_defaults() {
        let cfg: SchedConfig =
            ron::de::from_str("(max_cpus: 2, wfq_heap_slots: 64)").unwrap();
        assert_eq!(cfg.max_cpus, 2);
        assert_eq!(cfg.wfq_heap_slots, 64);
        assert_eq!(cfg.default_prio, 1);
        assert_eq!(cfg.default_time_slice, 10_000);
    }

    #[test]
    fn rejects_unrepresentable_values() {
        let cfg = SchedConfig {
            max_cpus: 0,
            ..SchedConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::CpuCount(0)));

        let cfg = SchedConfig {
            default_time_slice: 0,
            ..SchedConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroTimeSlice));

        let cfg = SchedConfig {
            wfq_heap_slots: 70_000,
            ..SchedConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::HeapSlots(70_000)));
    }
}
