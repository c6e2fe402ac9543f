//! Health probes.
//!
//! An engine is healthy when its process is alive and its designated port
//! accepts a TCP connection within the probe timeout.

use std::io;
use std::net::TcpListener;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::engine::{EngineHandle, ExitInfo};
use crate::error::ProcessError;

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    Healthy,
    /// The process is gone.
    Exited(ExitInfo),
    /// Connection refused or otherwise failed.
    Unreachable,
    /// No answer within the probe timeout.
    TimedOut,
}

impl ProbeResult {
    pub fn is_healthy(self) -> bool {
        self == ProbeResult::Healthy
    }

    pub fn diagnostic(self, port: u16) -> String {
        match self {
            ProbeResult::Healthy => "healthy".to_string(),
            ProbeResult::Exited(exit) => format!("engine exited ({exit})"),
            ProbeResult::Unreachable => format!("port {port} refused connection"),
            ProbeResult::TimedOut => format!("port {port} did not answer in time"),
        }
    }
}

/// Connect to `127.0.0.1:port`; anything slower than `timeout` is a failure.
pub async fn port_probe(port: u16, timeout: Duration) -> ProbeResult {
    match tokio::time::timeout(timeout, TcpStream::connect(("127.0.0.1", port))).await {
        Ok(Ok(_)) => ProbeResult::Healthy,
        Ok(Err(e)) => {
            debug!(port, error = %e, "port probe failed");
            ProbeResult::Unreachable
        }
        Err(_) => {
            debug!(port, ?timeout, "port probe timed out");
            ProbeResult::TimedOut
        }
    }
}

/// Full probe: process liveness first, then the port.
pub async fn engine_probe(engine: &mut dyn EngineHandle, port: u16, timeout: Duration) -> ProbeResult {
    if let Some(exit) = engine.try_exit() {
        return ProbeResult::Exited(exit);
    }
    port_probe(port, timeout).await
}

/// Fail with `PortInUse` if something already listens on `host:port`.
///
/// Other bind errors (e.g. a privileged port) are left for the engine to
/// report, since the engine may hold capabilities this process lacks.
pub fn ensure_port_free(host: &str, port: u16) -> Result<(), ProcessError> {
    match TcpListener::bind((host, port)) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => Err(ProcessError::PortInUse { port }),
        Err(e) => {
            debug!(host, port, error = %e, "port precheck inconclusive");
            Ok(())
        }
    }
}
