//! Per-profile supervisor.
//!
//! All transitions of one profile run under a single async lock, so a
//! `stop()` issued during a `start()` (or during a restart driven by the
//! monitor) waits for the transition in flight and then applies. Status
//! lives in a `watch` channel and is readable without that lock.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use edge_core::{EngineArtifacts, Profile, ProfileId, render_engine_config};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::engine::{EngineHandle, EngineLauncher, ExitInfo, LaunchSpec};
use crate::error::{ProcessError, SupervisorError, SupervisorResult};
use crate::phase::{Phase, PhaseEvent, SupervisorStatus};
use crate::probe::{self, ProbeResult};
use crate::settings::SupervisorSettings;

/// Poll period while waiting for a fresh engine to become healthy.
const STARTUP_POLL: Duration = Duration::from_millis(100);

/// Upper bound on waiting for a killed engine to be reaped.
const KILL_WAIT: Duration = Duration::from_secs(2);

struct MonitorSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// State touched only while holding the transition lock.
struct Runtime {
    profile: Profile,
    artifacts: EngineArtifacts,
    engine: Option<Box<dyn EngineHandle>>,
    monitor: Option<MonitorSlot>,
    restart_count: u32,
    /// Bumped by every start and stop; a monitor from an older
    /// generation must not touch the runtime.
    generation: u64,
}

struct Inner {
    id: ProfileId,
    settings: SupervisorSettings,
    launcher: Arc<dyn EngineLauncher>,
    runtime: Mutex<Runtime>,
    status: watch::Sender<SupervisorStatus>,
    events: broadcast::Sender<PhaseEvent>,
}

/// Supervises the engine of one profile. Cheap to clone.
#[derive(Clone)]
pub struct ProfileSupervisor {
    inner: Arc<Inner>,
}

impl ProfileSupervisor {
    pub fn new(
        profile: Profile,
        settings: SupervisorSettings,
        launcher: Arc<dyn EngineLauncher>,
        events: broadcast::Sender<PhaseEvent>,
    ) -> Self {
        let id = profile.id();
        let artifacts = EngineArtifacts::for_profile(&settings.run_dir, &id);
        let (status, _) = watch::channel(SupervisorStatus::stopped(id.clone()));
        Self {
            inner: Arc::new(Inner {
                id,
                settings,
                launcher,
                runtime: Mutex::new(Runtime {
                    profile,
                    artifacts,
                    engine: None,
                    monitor: None,
                    restart_count: 0,
                    generation: 0,
                }),
                status,
                events,
            }),
        }
    }

    pub fn id(&self) -> &ProfileId {
        &self.inner.id
    }

    /// Current phase and diagnostics. Never waits and never mutates.
    pub fn status(&self) -> SupervisorStatus {
        self.inner.status.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.inner.phase()
    }

    /// Receiver that observes every status update of this profile.
    pub fn watch(&self) -> watch::Receiver<SupervisorStatus> {
        self.inner.status.subscribe()
    }

    pub async fn profile(&self) -> Profile {
        self.inner.runtime.lock().await.profile.clone()
    }

    /// Swap in an edited profile. Only allowed while stopped.
    pub async fn replace_profile(&self, profile: Profile) -> SupervisorResult<()> {
        let mut rt = self.inner.runtime.lock().await;
        let phase = self.inner.phase();
        if phase != Phase::Stopped {
            return Err(SupervisorError::Busy {
                profile: self.inner.id.clone(),
                phase,
            });
        }
        rt.profile = profile;
        Ok(())
    }

    /// `Stopped -> Starting -> Running`, or `Failed` with the cause.
    ///
    /// Precondition failures (`PortInUse`, `SpawnFailure`) are never
    /// retried. Starting an already active profile is a no-op; starting a
    /// failed one requires `reset()` first.
    pub async fn start(&self) -> SupervisorResult<()> {
        let inner = &self.inner;
        let mut rt = inner.runtime.lock().await;
        match inner.phase() {
            Phase::Stopped => {}
            Phase::Running | Phase::Unhealthy | Phase::Restarting => {
                debug!(profile = %inner.id, "start ignored, engine already active");
                return Ok(());
            }
            from => {
                return Err(SupervisorError::InvalidTransition {
                    profile: inner.id.clone(),
                    from,
                    to: Phase::Starting,
                });
            }
        }

        rt.generation += 1;
        rt.restart_count = 0;
        inner.update(|s| {
            s.restart_count = 0;
            s.error = None;
            s.diagnostic = None;
        });
        inner.set_phase(Phase::Starting, None);

        match inner.launch(&mut rt).await {
            Ok(()) => {
                inner.set_phase(Phase::Running, None);
                let (shutdown_tx, shutdown_rx) = watch::channel(false);
                let handle = tokio::spawn(run_monitor(
                    Arc::clone(&self.inner),
                    rt.generation,
                    shutdown_rx,
                ));
                rt.monitor = Some(MonitorSlot {
                    handle,
                    shutdown_tx,
                });
                Ok(())
            }
            Err(e) => {
                inner.fail(&mut rt, e.clone());
                Err(e.into())
            }
        }
    }

    /// Bring the profile to `Stopped` from any phase.
    ///
    /// Idempotent: concurrent or repeated calls queue on the transition
    /// lock, and every caller after the first finds `Stopped` and returns
    /// without touching the process.
    pub async fn stop(&self) -> SupervisorResult<()> {
        let inner = &self.inner;
        let mut rt = inner.runtime.lock().await;
        let phase = inner.phase();
        if phase == Phase::Stopped {
            debug!(profile = %inner.id, "already stopped");
            return Ok(());
        }

        rt.generation += 1;
        if let Some(slot) = rt.monitor.take() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
        }

        if phase != Phase::Failed {
            inner.set_phase(Phase::Stopping, None);
            if let Some(mut engine) = rt.engine.take() {
                graceful_stop(engine.as_mut(), inner.settings.grace_period).await;
            }
        }

        remove_artifacts(&rt.artifacts);
        rt.restart_count = 0;
        inner.update(|s| {
            s.pid = None;
            s.restart_count = 0;
            s.error = None;
            s.diagnostic = None;
        });
        inner.set_phase(Phase::Stopped, None);
        Ok(())
    }

    /// Clear a `Failed` profile back to `Stopped`.
    pub async fn reset(&self) -> SupervisorResult<()> {
        self.stop().await
    }
}

impl Inner {
    fn phase(&self) -> Phase {
        self.status.borrow().phase
    }

    fn update(&self, f: impl FnOnce(&mut SupervisorStatus)) {
        self.status.send_modify(f);
    }

    /// Record a phase change, log it, and broadcast it.
    fn set_phase(&self, to: Phase, detail: Option<String>) {
        let mut from = to;
        self.status.send_modify(|s| {
            from = s.phase;
            s.phase = to;
            if detail.is_some() {
                s.diagnostic = detail.clone();
            }
        });
        if from == to {
            return;
        }
        debug_assert!(from.can_transition_to(to), "{from} -> {to}");
        match &detail {
            Some(d) => info!(profile = %self.id, %from, %to, detail = %d, "phase changed"),
            None => info!(profile = %self.id, %from, %to, "phase changed"),
        }
        let _ = self.events.send(PhaseEvent {
            profile: self.id.clone(),
            from,
            to,
            at: epoch_secs(),
            detail,
        });
    }

    /// Write artifacts, spawn, and wait for the first healthy probe.
    ///
    /// On error no engine is left running.
    async fn launch(&self, rt: &mut Runtime) -> Result<(), ProcessError> {
        let port = rt.profile.designated_port();
        write_artifacts(&rt.profile, &rt.artifacts)?;
        probe::ensure_port_free(rt.profile.bind_host(), port)?;

        let spec = LaunchSpec {
            profile: self.id.clone(),
            binary: self.settings.engine_binary.clone(),
            config_path: rt.artifacts.config_path.clone(),
            log_path: rt.artifacts.log_path.clone(),
            port,
        };
        let mut engine = self
            .launcher
            .launch(&spec)
            .map_err(|e| ProcessError::SpawnFailure {
                binary: spec.binary.display().to_string(),
                reason: e.to_string(),
            })?;
        let pid = engine.pid();
        self.update(|s| s.pid = pid);
        debug!(profile = %self.id, ?pid, port, "engine spawned, waiting for health");

        match self.wait_healthy(engine.as_mut(), port, &spec.log_path).await {
            Ok(()) => {
                rt.engine = Some(engine);
                self.update(|s| s.last_health_check = Some(epoch_secs()));
                Ok(())
            }
            Err(e) => {
                force_down(engine.as_mut()).await;
                self.update(|s| s.pid = None);
                Err(e)
            }
        }
    }

    async fn wait_healthy(
        &self,
        engine: &mut dyn EngineHandle,
        port: u16,
        log_path: &Path,
    ) -> Result<(), ProcessError> {
        let timeout = self.settings.startup_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let probe_timeout = self
                .settings
                .probe_timeout
                .min(remaining)
                .max(Duration::from_millis(10));
            match probe::engine_probe(engine, port, probe_timeout).await {
                ProbeResult::Healthy => return Ok(()),
                ProbeResult::Exited(exit) => {
                    return Err(ProcessError::EarlyExit {
                        diagnostic: exit_diagnostic(exit, log_path),
                    });
                }
                other => debug!(profile = %self.id, result = ?other, "engine not ready"),
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProcessError::StartupTimeout { timeout });
            }
            tokio::time::sleep(STARTUP_POLL.min(remaining)).await;
        }
    }

    /// Enter `Failed`. The engine must already be down.
    fn fail(&self, rt: &mut Runtime, err: ProcessError) {
        remove_artifacts(&rt.artifacts);
        error!(profile = %self.id, error = %err, "engine failed");
        let diagnostic = err.to_string();
        self.update(|s| {
            s.pid = None;
            s.error = Some(err);
        });
        self.set_phase(Phase::Failed, Some(diagnostic));
    }

    /// Restart after a failed probe until the engine is healthy again.
    ///
    /// Returns false when the monitor should exit: the profile was stopped
    /// or restarted elsewhere, or the retry budget ran out.
    async fn recover(
        &self,
        generation: u64,
        mut diagnostic: String,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            let (failures, delay) = {
                let mut rt = self.runtime.lock().await;
                if rt.generation != generation {
                    return false;
                }
                if let Some(mut engine) = rt.engine.take() {
                    force_down(engine.as_mut()).await;
                }
                rt.restart_count += 1;
                let failures = rt.restart_count;
                self.update(|s| {
                    s.pid = None;
                    s.restart_count = failures;
                });
                self.set_phase(Phase::Unhealthy, Some(diagnostic.clone()));

                if failures > self.settings.max_retries {
                    let err = ProcessError::CrashLoopExceeded {
                        failures,
                        max_retries: self.settings.max_retries,
                        last_diagnostic: diagnostic,
                    };
                    self.fail(&mut rt, err);
                    return false;
                }
                self.set_phase(Phase::Restarting, None);
                (failures, self.settings.restart_backoff(failures))
            };

            warn!(profile = %self.id, failures, ?delay, "restarting engine");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return false,
            }

            let mut rt = self.runtime.lock().await;
            if rt.generation != generation {
                return false;
            }
            self.set_phase(Phase::Starting, None);
            match self.launch(&mut rt).await {
                Ok(()) => {
                    self.set_phase(Phase::Running, None);
                    return true;
                }
                Err(
                    e @ (ProcessError::SpawnFailure { .. }
                    | ProcessError::ConfigWrite { .. }
                    | ProcessError::InvalidProfile(_)),
                ) => {
                    self.fail(&mut rt, e);
                    return false;
                }
                Err(e) => {
                    warn!(profile = %self.id, error = %e, "restart attempt failed");
                    diagnostic = e.to_string();
                }
            }
        }
    }

    /// Clear the restart counter once the engine has stayed healthy.
    async fn mark_stable(&self, generation: u64) {
        if self.status.borrow().restart_count == 0 {
            return;
        }
        let mut rt = self.runtime.lock().await;
        if rt.generation != generation || self.phase() != Phase::Running {
            return;
        }
        rt.restart_count = 0;
        self.update(|s| s.restart_count = 0);
        info!(profile = %self.id, "engine stable, restart counter cleared");
    }
}

/// Background health loop for one started generation.
async fn run_monitor(inner: Arc<Inner>, generation: u64, mut shutdown: watch::Receiver<bool>) {
    let interval = inner.settings.probe_interval;
    let mut healthy_since = Instant::now();
    debug!(profile = %inner.id, ?interval, "monitor started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                debug!(profile = %inner.id, "monitor shutting down");
                return;
            }
        }

        // Exit check under the lock; the port check runs without it so a
        // slow probe never delays stop().
        let (exited, port) = {
            let mut rt = inner.runtime.lock().await;
            if rt.generation != generation || inner.phase() != Phase::Running {
                return;
            }
            let port = rt.profile.designated_port();
            let Some(engine) = rt.engine.as_mut() else {
                return;
            };
            (engine.try_exit(), port)
        };
        let result = match exited {
            Some(exit) => ProbeResult::Exited(exit),
            None => probe::port_probe(port, inner.settings.probe_timeout).await,
        };
        inner.update(|s| s.last_health_check = Some(epoch_secs()));

        if result.is_healthy() {
            if healthy_since.elapsed() >= inner.settings.stable_after {
                inner.mark_stable(generation).await;
            }
            continue;
        }

        let diagnostic = result.diagnostic(port);
        warn!(profile = %inner.id, %diagnostic, "health probe failed");
        if !inner.recover(generation, diagnostic, &mut shutdown).await {
            return;
        }
        healthy_since = Instant::now();
    }
}

/// SIGTERM, then kill once the grace period runs out.
async fn graceful_stop(engine: &mut dyn EngineHandle, grace: Duration) {
    engine.terminate();
    match tokio::time::timeout(grace, engine.wait()).await {
        Ok(exit) => debug!(?exit, "engine exited after terminate"),
        Err(_) => {
            warn!(?grace, "engine ignored terminate, killing");
            force_down(engine).await;
        }
    }
}

async fn force_down(engine: &mut dyn EngineHandle) {
    engine.kill();
    if tokio::time::timeout(KILL_WAIT, engine.wait()).await.is_err() {
        warn!(pid = ?engine.pid(), "engine not reaped after kill");
    }
}

fn write_artifacts(profile: &Profile, artifacts: &EngineArtifacts) -> Result<(), ProcessError> {
    let config = render_engine_config(profile, artifacts)
        .map_err(|e| ProcessError::InvalidProfile(e.to_string()))?;
    let body = serde_json::to_vec_pretty(&config).map_err(|e| ProcessError::ConfigWrite {
        path: artifacts.config_path.display().to_string(),
        reason: e.to_string(),
    })?;

    std::fs::create_dir_all(&artifacts.dir).map_err(write_error(&artifacts.dir))?;
    std::fs::write(&artifacts.config_path, body).map_err(write_error(&artifacts.config_path))?;
    if let Profile::Server(server) = profile {
        std::fs::write(&artifacts.cert_path, &server.certificate.cert_pem)
            .map_err(write_error(&artifacts.cert_path))?;
        write_private(&artifacts.key_path, &server.certificate.key_pem)
            .map_err(write_error(&artifacts.key_path))?;
    }
    debug!(dir = %artifacts.dir.display(), "engine artifacts written");
    Ok(())
}

fn write_error(path: &Path) -> impl FnOnce(std::io::Error) -> ProcessError {
    let path = path.display().to_string();
    move |e| ProcessError::ConfigWrite {
        path,
        reason: e.to_string(),
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

fn remove_artifacts(artifacts: &EngineArtifacts) {
    match std::fs::remove_dir_all(&artifacts.dir) {
        Ok(()) => debug!(dir = %artifacts.dir.display(), "engine artifacts removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %artifacts.dir.display(), error = %e, "failed to remove engine artifacts"),
    }
}

/// Exit status plus the last line the engine logged, if any.
fn exit_diagnostic(exit: ExitInfo, log_path: &Path) -> String {
    let last_line = std::fs::read_to_string(log_path).ok().and_then(|log| {
        log.lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().chars().take(200).collect::<String>())
    });
    match last_line {
        Some(line) => format!("{exit}: {line}"),
        None => exit.to_string(),
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_diagnostic_includes_last_log_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("engine.log");
        std::fs::write(&log, "starting\nfailed to load config: bad uuid\n\n").unwrap();
        let d = exit_diagnostic(ExitInfo { code: Some(23) }, &log);
        assert_eq!(d, "exit code 23: failed to load config: bad uuid");

        let missing = dir.path().join("missing.log");
        assert_eq!(exit_diagnostic(ExitInfo { code: None }, &missing), "terminated by signal");
    }

    #[test]
    fn server_artifacts_include_key_material() {
        let dir = tempfile::tempdir().unwrap();
        let server = edge_core::ServerProfile::create(edge_core::ServerProfileRequest {
            name: "mc1".to_string(),
            bind_domain: "example.com".to_string(),
            backend_address: "127.0.0.1:25565".to_string(),
            port: None,
            path: None,
        })
        .unwrap();
        let profile: Profile = server.clone().into();
        let artifacts = EngineArtifacts::for_profile(dir.path(), &profile.id());

        write_artifacts(&profile, &artifacts).unwrap();
        let config: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&artifacts.config_path).unwrap()).unwrap();
        assert_eq!(config["inbounds"][0]["port"], 443);
        assert_eq!(
            std::fs::read_to_string(&artifacts.key_path).unwrap(),
            server.certificate.key_pem
        );
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&artifacts.key_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        remove_artifacts(&artifacts);
        assert!(!artifacts.dir.exists());
        // Removing twice is harmless.
        remove_artifacts(&artifacts);
    }

    #[test]
    fn unresolved_client_is_an_invalid_profile() {
        let dir = tempfile::tempdir().unwrap();
        let profile: Profile = edge_core::ClientProfile::from_domain("home", "example.com", 30000)
            .unwrap()
            .into();
        let artifacts = EngineArtifacts::for_profile(dir.path(), &profile.id());
        assert!(matches!(
            write_artifacts(&profile, &artifacts),
            Err(ProcessError::InvalidProfile(_))
        ));
    }
}
