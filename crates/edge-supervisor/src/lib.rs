//! edge-supervisor: runs and watches the proxy engine for each profile.
//!
//! # Architecture
//!
//! ```text
//! SupervisorRegistry
//!   └── ProfileSupervisor (one per profile, independent)
//!         ├── transition lock: start / stop / restart never interleave
//!         ├── status watch: pure reads for status()
//!         ├── EngineLauncher → EngineHandle (real process, or a fake in tests)
//!         └── background monitor
//!               ├── probe: process alive AND port reachable
//!               └── restart policy: capped exponential backoff, bounded retries
//! ```
//!
//! Phase changes are broadcast as [`PhaseEvent`]s for display.

pub mod engine;
pub mod error;
pub mod phase;
pub mod probe;
pub mod registry;
pub mod settings;
pub mod supervisor;

pub use engine::{EngineHandle, EngineLauncher, ExitInfo, LaunchSpec, ProcessLauncher};
pub use error::{ProcessError, SupervisorError, SupervisorResult};
pub use phase::{Phase, PhaseEvent, SupervisorStatus};
pub use registry::SupervisorRegistry;
pub use settings::SupervisorSettings;
pub use supervisor::ProfileSupervisor;
