//! Supervisor error types.

use std::time::Duration;

use edge_core::ProfileId;
use thiserror::Error;

use crate::phase::Phase;

/// Why an engine could not be started or kept running.
///
/// Every `Failed` phase carries one of these in its status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    #[error("port {port} is already in use")]
    PortInUse { port: u16 },

    #[error("failed to launch `{binary}`: {reason}")]
    SpawnFailure { binary: String, reason: String },

    #[error("engine not healthy within {timeout:?}")]
    StartupTimeout { timeout: Duration },

    #[error("engine exited during startup: {diagnostic}")]
    EarlyExit { diagnostic: String },

    #[error("engine failed {failures} times in a row (limit {max_retries}); last failure: {last_diagnostic}")]
    CrashLoopExceeded {
        failures: u32,
        max_retries: u32,
        last_diagnostic: String,
    },

    #[error("cannot write {path}: {reason}")]
    ConfigWrite { path: String, reason: String },

    #[error("profile cannot be run: {0}")]
    InvalidProfile(String),
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("unknown profile: {0}")]
    UnknownProfile(ProfileId),

    #[error("port {port} of {profile} is already used by {other}")]
    PortConflict {
        profile: ProfileId,
        other: ProfileId,
        port: u16,
    },

    #[error("{profile} is {phase}; stop it first")]
    Busy { profile: ProfileId, phase: Phase },

    #[error("{profile}: cannot go from {from} to {to}")]
    InvalidTransition {
        profile: ProfileId,
        from: Phase,
        to: Phase,
    },
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
