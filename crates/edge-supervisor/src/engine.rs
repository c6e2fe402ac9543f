//! Engine process seam.
//!
//! The supervisor only talks to [`EngineLauncher`] and [`EngineHandle`];
//! [`ProcessLauncher`] runs the real engine binary as
//! `<binary> run -config <engine.json>`.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use edge_core::ProfileId;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Everything needed to launch one engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub profile: ProfileId,
    pub binary: PathBuf,
    pub config_path: PathBuf,
    pub log_path: PathBuf,
    pub port: u16,
}

/// How an engine process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// `None` when terminated by a signal.
    pub code: Option<i32>,
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// A running (or exited) engine.
pub trait EngineHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Non-blocking exit check.
    fn try_exit(&mut self) -> Option<ExitInfo>;

    /// Ask the engine to shut down.
    fn terminate(&mut self);

    /// Force the engine down.
    fn kill(&mut self);

    /// Wait for exit. `None` if the exit status could not be collected.
    fn wait(&mut self) -> BoxFuture<'_, Option<ExitInfo>>;
}

pub trait EngineLauncher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn EngineHandle>>;
}

/// Launches the engine binary as a child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl EngineLauncher for ProcessLauncher {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn EngineHandle>> {
        let log = std::fs::File::create(&spec.log_path)?;
        let log_err = log.try_clone()?;

        let mut command = Command::new(&spec.binary);
        if let Some(dir) = spec.config_path.parent() {
            command.current_dir(dir);
        }
        let child = command
            .arg("run")
            .arg("-config")
            .arg(&spec.config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .spawn()?;

        info!(profile = %spec.profile, pid = ?child.id(), binary = %spec.binary.display(), "engine process started");
        Ok(Box::new(ChildEngine { child }))
    }
}

struct ChildEngine {
    child: Child,
}

impl EngineHandle for ChildEngine {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exit(&mut self) -> Option<ExitInfo> {
        match self.child.try_wait() {
            Ok(status) => status.map(ExitInfo::from),
            Err(e) => {
                warn!(error = %e, "failed to poll engine process");
                None
            }
        }
    }

    #[cfg(unix)]
    fn terminate(&mut self) {
        if let Some(pid) = self.child.id() {
            debug!(pid, "sending SIGTERM to engine");
            // SAFETY: `pid` comes from `Child::id()`, which is `Some` only while
            // the child has not been reaped, so it still names our process.
            // SIGTERM is a valid signal number.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) {
        self.kill();
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "engine kill request failed");
        }
    }

    fn wait(&mut self) -> BoxFuture<'_, Option<ExitInfo>> {
        Box::pin(async move {
            match self.child.wait().await {
                Ok(status) => Some(status.into()),
                Err(e) => {
                    warn!(error = %e, "failed to wait for engine process");
                    None
                }
            }
        })
    }
}
