//! Runtime-tunable knobs for a run: worker ceiling, resource thresholds,
//! cache directory, deadline, and watched paths. No file or environment
//! parsing lives here — that belongs to an external CLI front-end; this
//! struct is the single seam it would populate.

use crate::policy::PolicyThresholds;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_workers: usize,
    pub thresholds: PolicyThresholds,
    /// Below this battery percentage the runner aborts the whole run with
    /// `BatteryLevelLow` rather than just throttling worker count. `None`
    /// disables the guard (e.g. a plugged-in device).
    pub battery_critical_percent: Option<u8>,
    pub failsafe: bool,
    pub cache_dir: Option<PathBuf>,
    pub cache_max_age: Option<Duration>,
    pub deadline: Option<Duration>,
    pub watched_paths: Vec<PathBuf>,
    pub cancel_grace_period: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: crate::policy::AdaptivePolicy::detect_max_workers(),
            thresholds: PolicyThresholds::default(),
            battery_critical_percent: Some(5),
            failsafe: false,
            cache_dir: None,
            cache_max_age: None,
            deadline: None,
            watched_paths: Vec::new(),
            cancel_grace_period: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct EngineConfigBuilder {
    inner: EngineConfigOverrides,
}

#[derive(Default)]
struct EngineConfigOverrides {
    max_workers: Option<usize>,
    thresholds: Option<PolicyThresholds>,
    battery_critical_percent: Option<Option<u8>>,
    failsafe: Option<bool>,
    cache_dir: Option<PathBuf>,
    cache_max_age: Option<Duration>,
    deadline: Option<Duration>,
    watched_paths: Option<Vec<PathBuf>>,
    cancel_grace_period: Option<Duration>,
}

impl EngineConfigBuilder {
    pub fn max_workers(mut self, n: usize) -> Self {
        self.inner.max_workers = Some(n);
        self
    }

    pub fn thresholds(mut self, t: PolicyThresholds) -> Self {
        self.inner.thresholds = Some(t);
        self
    }

    pub fn battery_critical_percent(mut self, pct: Option<u8>) -> Self {
        self.inner.battery_critical_percent = Some(pct);
        self
    }

    pub fn failsafe(mut self, enabled: bool) -> Self {
        self.inner.failsafe = Some(enabled);
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.inner.cache_dir = Some(dir.into());
        self
    }

    pub fn cache_max_age(mut self, age: Duration) -> Self {
        self.inner.cache_max_age = Some(age);
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.inner.deadline = Some(deadline);
        self
    }

    pub fn watched_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.inner.watched_paths = Some(paths);
        self
    }

    pub fn cancel_grace_period(mut self, grace: Duration) -> Self {
        self.inner.cancel_grace_period = Some(grace);
        self
    }

    pub fn build(self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            max_workers: self.inner.max_workers.unwrap_or(defaults.max_workers),
            thresholds: self.inner.thresholds.unwrap_or(defaults.thresholds),
            battery_critical_percent: self
                .inner
                .battery_critical_percent
                .unwrap_or(defaults.battery_critical_percent),
            failsafe: self.inner.failsafe.unwrap_or(defaults.failsafe),
            cache_dir: self.inner.cache_dir.or(defaults.cache_dir),
            cache_max_age: self.inner.cache_max_age.or(defaults.cache_max_age),
            deadline: self.inner.deadline.or(defaults.deadline),
            watched_paths: self.inner.watched_paths.unwrap_or(defaults.watched_paths),
            cancel_grace_period: self
                .inner
                .cancel_grace_period
                .unwrap_or(defaults.cancel_grace_period),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_only_specified_fields() {
        let cfg = EngineConfig::builder().max_workers(2).failsafe(true).build();
        assert_eq!(cfg.max_workers, 2);
        assert!(cfg.failsafe);
        assert_eq!(cfg.cache_dir, None);
    }

    #[test]
    fn default_detects_a_nonzero_worker_ceiling() {
        let cfg = EngineConfig::default();
        assert!(cfg.max_workers >= 1);
    }
}
