pub mod client;
pub mod decode;
pub mod run;
pub mod server;

use std::path::Path;

use anyhow::{Context, bail};
use edge_core::config::{CONFIG_FILE_NAME, PathsConfig};
use edge_core::{EdgeConfig, Profile, ProfileId, check_port_conflicts};
use edge_state::{ProfileStore, StoreError};
use tracing::debug;

/// Loaded configuration plus the opened profile store.
pub struct App {
    pub config: EdgeConfig,
    pub store: ProfileStore,
}

impl App {
    pub fn open(config: EdgeConfig) -> anyhow::Result<Self> {
        let path = config.paths.store_path();
        let store = ProfileStore::open(&path)
            .with_context(|| format!("failed to open profile store {}", path.display()))?;
        debug!(path = %path.display(), "profile store opened");
        Ok(Self { config, store })
    }

    /// Load a profile, turning a missing one into a readable error.
    pub fn load(&self, id: &ProfileId) -> anyhow::Result<Profile> {
        match self.store.load(id) {
            Ok(profile) => Ok(profile),
            Err(StoreError::NotFound(_)) => bail!("no {} profile named '{}'", id.kind().as_str(), id.name()),
            Err(e) => Err(e).with_context(|| format!("failed to load {id}")),
        }
    }

    /// Save a new profile, refusing duplicates and port clashes with stored profiles.
    pub fn insert(&self, profile: &Profile) -> anyhow::Result<()> {
        let id = profile.id();
        if self.store.get(&id)?.is_some() {
            bail!("{id} already exists");
        }
        self.check_ports(profile)?;
        self.store
            .save(profile)
            .with_context(|| format!("failed to save {id}"))
    }

    /// Overwrite a profile that already exists.
    pub fn update(&self, profile: &Profile) -> anyhow::Result<()> {
        self.check_ports(profile)?;
        let id = profile.id();
        self.store
            .save(profile)
            .with_context(|| format!("failed to save {id}"))
    }

    fn check_ports(&self, profile: &Profile) -> anyhow::Result<()> {
        let id = profile.id();
        let mut all: Vec<Profile> = self
            .store
            .list_all()?
            .into_iter()
            .filter(|p| p.id() != id)
            .collect();
        all.push(profile.clone());
        check_port_conflicts(&all).with_context(|| format!("cannot save {id}"))?;
        Ok(())
    }
}

/// `--config`, else `<data_dir>/edgecli.toml` when it exists, else defaults.
///
/// `--data-dir` overrides whatever the file says.
pub fn load_config(config: Option<&Path>, data_dir: Option<&Path>) -> anyhow::Result<EdgeConfig> {
    let mut loaded = match config {
        Some(path) => EdgeConfig::from_file(path)?,
        None => {
            let dir = data_dir
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathsConfig::default().data_dir);
            let candidate = dir.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                EdgeConfig::from_file(&candidate)?
            } else {
                EdgeConfig::default()
            }
        }
    };
    if let Some(dir) = data_dir {
        loaded.paths.data_dir = dir.to_path_buf();
    }
    Ok(loaded)
}

/// Unix seconds as a UTC timestamp.
pub fn format_time(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}
