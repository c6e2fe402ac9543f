//! Supervisor phases and the events emitted when they change.

use std::fmt;

use edge_core::ProfileId;
use serde::{Deserialize, Serialize};

use crate::error::ProcessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Stopped,
    Starting,
    Running,
    Unhealthy,
    Restarting,
    Stopping,
    /// Terminal until `stop()` or `reset()`.
    Failed,
}

impl Phase {
    /// Allowed edges of the supervisor state machine.
    ///
    /// `Starting -> Unhealthy` only happens when a restart attempt fails;
    /// it counts as another consecutive failure.
    pub fn can_transition_to(self, to: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, to),
            (Stopped, Starting)
                | (Starting, Running | Failed | Unhealthy | Stopping)
                | (Running, Unhealthy | Stopping)
                | (Unhealthy, Restarting | Failed | Stopping)
                | (Restarting, Starting | Stopping)
                | (Stopping, Stopped)
                | (Failed, Stopped)
        )
    }

    /// A process may exist in this phase.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Phase::Starting | Phase::Running | Phase::Unhealthy | Phase::Restarting
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Stopped => "stopped",
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::Unhealthy => "unhealthy",
            Phase::Restarting => "restarting",
            Phase::Stopping => "stopping",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One phase change of one profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseEvent {
    pub profile: ProfileId,
    pub from: Phase,
    pub to: Phase,
    /// Unix seconds.
    pub at: u64,
    pub detail: Option<String>,
}

/// Snapshot returned by `status()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub profile: ProfileId,
    pub phase: Phase,
    pub pid: Option<u32>,
    /// Unix seconds of the last completed probe.
    pub last_health_check: Option<u64>,
    /// Consecutive failures since the engine was last stable.
    pub restart_count: u32,
    /// Last probe failure or exit description.
    pub diagnostic: Option<String>,
    /// Set whenever `phase` is `Failed`.
    pub error: Option<ProcessError>,
}

impl SupervisorStatus {
    pub fn stopped(profile: ProfileId) -> Self {
        Self {
            profile,
            phase: Phase::Stopped,
            pid: None,
            last_health_check: None,
            restart_count: 0,
            diagnostic: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_edges() {
        assert!(Phase::Stopped.can_transition_to(Phase::Starting));
        assert!(Phase::Starting.can_transition_to(Phase::Running));
        assert!(Phase::Running.can_transition_to(Phase::Unhealthy));
        assert!(Phase::Unhealthy.can_transition_to(Phase::Restarting));
        assert!(Phase::Restarting.can_transition_to(Phase::Starting));
        assert!(Phase::Unhealthy.can_transition_to(Phase::Failed));
        assert!(Phase::Failed.can_transition_to(Phase::Stopped));
    }

    #[test]
    fn forbidden_edges() {
        assert!(!Phase::Stopped.can_transition_to(Phase::Running));
        assert!(!Phase::Failed.can_transition_to(Phase::Starting));
        assert!(!Phase::Running.can_transition_to(Phase::Stopped));
        assert!(!Phase::Stopping.can_transition_to(Phase::Starting));
        assert!(!Phase::Stopped.can_transition_to(Phase::Stopping));
    }

    #[test]
    fn every_active_phase_can_stop() {
        for phase in [Phase::Starting, Phase::Running, Phase::Unhealthy, Phase::Restarting] {
            assert!(phase.is_active());
            assert!(phase.can_transition_to(Phase::Stopping), "{phase}");
        }
        assert!(!Phase::Failed.is_active());
    }
}
