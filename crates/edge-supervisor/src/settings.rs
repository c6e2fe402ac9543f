//! Resolved supervisor settings.

use std::path::PathBuf;
use std::time::Duration;

use edge_core::EdgeConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub engine_binary: PathBuf,
    /// Parent of every profile's artifact directory.
    pub run_dir: PathBuf,
    pub startup_timeout: Duration,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub grace_period: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub stable_after: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &EdgeConfig) -> Self {
        let s = &config.supervisor;
        Self {
            engine_binary: config.paths.engine_binary.clone(),
            run_dir: config.paths.run_dir(),
            startup_timeout: s.startup_timeout(),
            probe_interval: s.probe_interval(),
            probe_timeout: s.probe_timeout(),
            grace_period: s.grace_period(),
            max_retries: s.max_retries,
            backoff_base: s.backoff_base(),
            backoff_max: s.backoff_max(),
            stable_after: s.stable_after(),
        }
    }

    /// Delay before the restart following failure number `failures`.
    pub fn restart_backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}
