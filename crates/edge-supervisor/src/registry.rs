//! Registry of per-profile supervisors.
//!
//! Holds no process state of its own: each profile's runtime belongs to
//! its [`ProfileSupervisor`]. Operations look the supervisor up, release
//! the map, and then run, so different profiles proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use edge_core::{Profile, ProfileId};
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::engine::{EngineLauncher, ProcessLauncher};
use crate::error::{SupervisorError, SupervisorResult};
use crate::phase::{Phase, PhaseEvent, SupervisorStatus};
use crate::settings::SupervisorSettings;
use crate::supervisor::ProfileSupervisor;

const EVENT_CAPACITY: usize = 256;

struct Entry {
    profile: Profile,
    supervisor: ProfileSupervisor,
}

pub struct SupervisorRegistry {
    entries: RwLock<HashMap<ProfileId, Entry>>,
    settings: SupervisorSettings,
    launcher: Arc<dyn EngineLauncher>,
    events: broadcast::Sender<PhaseEvent>,
}

impl SupervisorRegistry {
    pub fn new(settings: SupervisorSettings, launcher: Arc<dyn EngineLauncher>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            settings,
            launcher,
            events,
        }
    }

    /// Registry that runs the real engine binary.
    pub fn with_process_launcher(settings: SupervisorSettings) -> Self {
        Self::new(settings, Arc::new(ProcessLauncher))
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Add a profile, or update a stopped one.
    ///
    /// Rejects a profile whose designated port is already claimed by a
    /// different registered profile. The map is only locked to claim the
    /// port; waiting on the profile's own transition happens outside it.
    pub async fn register(&self, profile: Profile) -> SupervisorResult<()> {
        let id = profile.id();
        let port = profile.designated_port();

        let (previous, supervisor) = {
            let mut entries = self.entries.write().await;
            check_port(&entries, &id, port)?;
            match entries.get_mut(&id) {
                Some(entry) => {
                    let previous = std::mem::replace(&mut entry.profile, profile.clone());
                    (previous, entry.supervisor.clone())
                }
                None => {
                    let supervisor = ProfileSupervisor::new(
                        profile.clone(),
                        self.settings.clone(),
                        Arc::clone(&self.launcher),
                        self.events.clone(),
                    );
                    entries.insert(id.clone(), Entry { profile, supervisor });
                    info!(profile = %id, port, "profile registered");
                    return Ok(());
                }
            }
        };

        if let Err(e) = supervisor.replace_profile(profile).await {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(&id) {
                entry.profile = previous;
            }
            return Err(e);
        }
        debug!(profile = %id, "profile updated");
        Ok(())
    }

    /// Stop the profile's engine and forget it.
    pub async fn unregister(&self, id: &ProfileId) -> SupervisorResult<()> {
        let supervisor = self.supervisor(id).await?;
        supervisor.stop().await?;
        self.entries.write().await.remove(id);
        info!(profile = %id, "profile unregistered");
        Ok(())
    }

    /// Register and start in one step.
    pub async fn start_profile(&self, profile: Profile) -> SupervisorResult<()> {
        let id = profile.id();
        self.register(profile).await?;
        self.start(&id).await
    }

    pub async fn start(&self, id: &ProfileId) -> SupervisorResult<()> {
        self.supervisor(id).await?.start().await
    }

    pub async fn stop(&self, id: &ProfileId) -> SupervisorResult<()> {
        self.supervisor(id).await?.stop().await
    }

    pub async fn reset(&self, id: &ProfileId) -> SupervisorResult<()> {
        self.supervisor(id).await?.reset().await
    }

    pub async fn status(&self, id: &ProfileId) -> SupervisorResult<SupervisorStatus> {
        Ok(self.supervisor(id).await?.status())
    }

    /// Status of every registered profile, ordered by id.
    pub async fn statuses(&self) -> Vec<SupervisorStatus> {
        let entries = self.entries.read().await;
        let mut all: Vec<SupervisorStatus> =
            entries.values().map(|e| e.supervisor.status()).collect();
        all.sort_by(|a, b| a.profile.cmp(&b.profile));
        all
    }

    /// Phase changes of every profile, present and future.
    pub fn subscribe(&self) -> broadcast::Receiver<PhaseEvent> {
        self.events.subscribe()
    }

    pub async fn profiles(&self) -> Vec<ProfileId> {
        let entries = self.entries.read().await;
        let mut ids: Vec<ProfileId> = entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop every profile concurrently.
    pub async fn stop_all(&self) {
        let supervisors: Vec<ProfileSupervisor> = {
            let entries = self.entries.read().await;
            entries.values().map(|e| e.supervisor.clone()).collect()
        };
        let mut tasks = JoinSet::new();
        for supervisor in supervisors {
            if supervisor.phase() == Phase::Stopped {
                continue;
            }
            tasks.spawn(async move {
                let id = supervisor.id().clone();
                (id, supervisor.stop().await)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Err(e))) => warn!(profile = %id, error = %e, "stop failed"),
                Ok((id, Ok(()))) => debug!(profile = %id, "stopped"),
                Err(e) => warn!(error = %e, "stop task panicked"),
            }
        }
        info!("all profiles stopped");
    }

    pub async fn supervisor(&self, id: &ProfileId) -> SupervisorResult<ProfileSupervisor> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| e.supervisor.clone())
            .ok_or_else(|| SupervisorError::UnknownProfile(id.clone()))
    }
}

fn check_port(entries: &HashMap<ProfileId, Entry>, id: &ProfileId, port: u16) -> SupervisorResult<()> {
    match entries
        .iter()
        .find(|(other, e)| *other != id && e.profile.designated_port() == port)
    {
        Some((other, _)) => Err(SupervisorError::PortConflict {
            profile: id.clone(),
            other: other.clone(),
            port,
        }),
        None => Ok(()),
    }
}
