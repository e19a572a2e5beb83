//! Adaptive resource policy: turns a battery/RAM reading (plus an externally
//! supplied failsafe flag) into a worker-count and cache-write decision.
//! Pure and side-effect free so it can be unit tested without touching real
//! hardware; the runner consults it exactly once per run.

use std::sync::Arc;

/// A snapshot of the device's resource state, produced by whatever probes
/// the host environment provides.
#[derive(Debug, Clone, Copy)]
pub struct ResourceReading {
    /// Battery charge, 0-100. `None` on devices with no battery (e.g. a
    /// plugged-in gateway), which the policy treats as "assume full".
    pub battery_percent: Option<u8>,
    /// Free RAM in megabytes. `None` means "assume full resources".
    pub free_ram_mb: Option<f32>,
}

/// A thread-safe battery-reading probe, injected so tests can simulate
/// arbitrary battery trajectories without real hardware.
pub type BatteryProbe = Arc<dyn Fn() -> Option<u8> + Send + Sync>;
/// A thread-safe free-RAM probe, reporting megabytes free.
pub type RamProbe = Arc<dyn Fn() -> Option<f32> + Send + Sync>;

/// Tunable thresholds the policy reacts to.
#[derive(Debug, Clone, Copy)]
pub struct PolicyThresholds {
    /// Battery percentage below which workers are halved and battery mode
    /// is switched on. Defaults to 40, matching the project's historical
    /// battery-aware demo.
    pub low_battery_percent: u8,
    /// Free-RAM floor, in megabytes, below which the same stress response
    /// kicks in.
    pub low_ram_mb: f32,
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            low_battery_percent: 40,
            low_ram_mb: 256.0,
        }
    }
}

/// Outcome of applying [`AdaptivePolicy::decide`] to a [`ResourceReading`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    pub worker_count: usize,
    /// Forwarded to task bodies via a runtime hint so they may branch
    /// (e.g. a lightweight analysis path vs. the full one).
    pub battery_mode_active: bool,
    /// False under failsafe: no extra disk writes while degraded.
    pub allow_cache_writes: bool,
}

/// Pure decision function plus the maximum worker ceiling it clamps to.
pub struct AdaptivePolicy {
    max_workers: usize,
    thresholds: PolicyThresholds,
}

impl AdaptivePolicy {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            thresholds: PolicyThresholds::default(),
        }
    }

    pub fn with_thresholds(max_workers: usize, thresholds: PolicyThresholds) -> Self {
        Self {
            max_workers: max_workers.max(1),
            thresholds,
        }
    }

    /// Detect a system's logical CPU count, for callers that want a
    /// reasonable ceiling without picking one themselves.
    pub fn detect_max_workers() -> usize {
        num_cpus::get().max(1)
    }

    /// `failsafe` is an external signal (e.g. set by the caller after
    /// observing repeated task failures), not derived from the reading.
    pub fn decide(&self, reading: ResourceReading, failsafe: bool) -> PolicyDecision {
        let t = &self.thresholds;
        let battery_low = reading
            .battery_percent
            .map(|b| b < t.low_battery_percent)
            .unwrap_or(false);
        let ram_low = reading
            .free_ram_mb
            .map(|mb| mb < t.low_ram_mb)
            .unwrap_or(false);
        let stressed = battery_low || ram_low;

        let worker_count = if failsafe {
            1
        } else if stressed {
            self.max_workers.div_ceil(2).max(1)
        } else {
            self.max_workers
        };

        PolicyDecision {
            worker_count,
            battery_mode_active: stressed,
            allow_cache_writes: !failsafe,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(battery: Option<u8>, ram_mb: Option<f32>) -> ResourceReading {
        ResourceReading {
            battery_percent: battery,
            free_ram_mb: ram_mb,
        }
    }

    #[test]
    fn healthy_reading_uses_full_ceiling() {
        let policy = AdaptivePolicy::new(8);
        let d = policy.decide(reading(Some(90), Some(2048.0)), false);
        assert_eq!(d.worker_count, 8);
        assert!(!d.battery_mode_active);
        assert!(d.allow_cache_writes);
    }

    #[test]
    fn low_battery_halves_workers_rounding_up() {
        let policy = AdaptivePolicy::new(7);
        let d = policy.decide(reading(Some(25), Some(2048.0)), false);
        assert_eq!(d.worker_count, 4);
        assert!(d.battery_mode_active);
        assert!(d.allow_cache_writes);
    }

    #[test]
    fn failsafe_floors_to_one_worker_and_disables_cache_writes() {
        let policy = AdaptivePolicy::new(8);
        let d = policy.decide(reading(Some(90), Some(2048.0)), true);
        assert_eq!(d.worker_count, 1);
        assert!(!d.allow_cache_writes);
    }

    #[test]
    fn low_ram_triggers_stress_even_with_full_battery() {
        let policy = AdaptivePolicy::new(8);
        let d = policy.decide(reading(Some(100), Some(64.0)), false);
        assert_eq!(d.worker_count, 4);
        assert!(d.battery_mode_active);
    }

    #[test]
    fn missing_readings_are_treated_as_full_resources() {
        let policy = AdaptivePolicy::new(8);
        let d = policy.decide(reading(None, None), false);
        assert_eq!(d.worker_count, 8);
        assert!(!d.battery_mode_active);
    }

    #[test]
    fn ceiling_of_one_never_goes_below_one() {
        let policy = AdaptivePolicy::new(1);
        let d = policy.decide(reading(Some(5), Some(1.0)), false);
        assert_eq!(d.worker_count, 1);
    }
}
