//! edgecli.toml configuration parser.
//!
//! Every section and field is optional. Durations are strings such as
//! `"5s"`, `"500ms"` or `"2m"`.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::codec::DEFAULT_MAX_TXT_STRINGS;

/// Config file name looked up inside the data directory.
pub const CONFIG_FILE_NAME: &str = "edgecli.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    pub paths: PathsConfig,
    pub supervisor: SupervisorConfig,
    pub resolver: ResolverConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Profile store and default run directory live here.
    pub data_dir: PathBuf,
    /// Proxy engine executable, looked up on PATH when relative.
    pub engine_binary: PathBuf,
    /// Per-profile engine artifacts; defaults to `<data_dir>/run`.
    pub run_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".edgecli"),
            engine_binary: PathBuf::from("xray"),
            run_dir: None,
        }
    }
}

impl PathsConfig {
    pub fn run_dir(&self) -> PathBuf {
        self.run_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("run"))
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("profiles.redb")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub startup_timeout: String,
    pub probe_interval: String,
    pub probe_timeout: String,
    pub grace_period: String,
    pub max_retries: u32,
    pub backoff_base: String,
    pub backoff_max: String,
    /// Healthy time after which the restart counter is cleared.
    pub stable_after: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_timeout: "5s".to_string(),
            probe_interval: "2s".to_string(),
            probe_timeout: "1s".to_string(),
            grace_period: "5s".to_string(),
            max_retries: 5,
            backoff_base: "1s".to_string(),
            backoff_max: "30s".to_string(),
            stable_after: "60s".to_string(),
        }
    }
}

impl SupervisorConfig {
    pub fn startup_timeout(&self) -> Duration {
        parse_duration(&self.startup_timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn probe_interval(&self) -> Duration {
        parse_duration(&self.probe_interval).unwrap_or(Duration::from_secs(2))
    }

    pub fn probe_timeout(&self) -> Duration {
        parse_duration(&self.probe_timeout).unwrap_or(Duration::from_secs(1))
    }

    pub fn grace_period(&self) -> Duration {
        parse_duration(&self.grace_period).unwrap_or(Duration::from_secs(5))
    }

    pub fn backoff_base(&self) -> Duration {
        parse_duration(&self.backoff_base).unwrap_or(Duration::from_secs(1))
    }

    pub fn backoff_max(&self) -> Duration {
        parse_duration(&self.backoff_max).unwrap_or(Duration::from_secs(30))
    }

    pub fn stable_after(&self) -> Duration {
        parse_duration(&self.stable_after).unwrap_or(Duration::from_secs(60))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Per-attempt lookup timeout.
    pub timeout: String,
    pub max_retries: u32,
    pub backoff_base: String,
    pub backoff_max: String,
    pub max_txt_strings: usize,
    /// Query this server instead of the system resolvers.
    pub nameserver: Option<IpAddr>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout: "3s".to_string(),
            max_retries: 3,
            backoff_base: "500ms".to_string(),
            backoff_max: "4s".to_string(),
            max_txt_strings: DEFAULT_MAX_TXT_STRINGS,
            nameserver: None,
        }
    }
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(3))
    }

    pub fn backoff_base(&self) -> Duration {
        parse_duration(&self.backoff_base).unwrap_or(Duration::from_millis(500))
    }

    pub fn backoff_max(&self) -> Duration {
        parse_duration(&self.backoff_max).unwrap_or(Duration::from_secs(4))
    }
}

impl EdgeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: EdgeConfig = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.check()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject duration strings that would silently fall back to defaults.
    pub fn check(&self) -> anyhow::Result<()> {
        let s = &self.supervisor;
        let r = &self.resolver;
        let durations = [
            ("supervisor.startup_timeout", &s.startup_timeout),
            ("supervisor.probe_interval", &s.probe_interval),
            ("supervisor.probe_timeout", &s.probe_timeout),
            ("supervisor.grace_period", &s.grace_period),
            ("supervisor.backoff_base", &s.backoff_base),
            ("supervisor.backoff_max", &s.backoff_max),
            ("supervisor.stable_after", &s.stable_after),
            ("resolver.timeout", &r.timeout),
            ("resolver.backoff_base", &r.backoff_base),
            ("resolver.backoff_max", &r.backoff_max),
        ];
        for (key, value) in durations {
            if parse_duration(value).is_none() {
                bail!("{key}: cannot parse duration `{value}`");
            }
        }
        if r.max_txt_strings == 0 {
            bail!("resolver.max_txt_strings must be at least 1");
        }
        Ok(())
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
