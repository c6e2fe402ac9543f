//! Error types for discovery resolution.

use edge_core::{CodecError, ValidationError};
use thiserror::Error;

pub type ResolutionResult<T> = Result<T, ResolutionError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// The name exists but has no TXT answer, or does not exist at all.
    #[error("no discovery record published at {host}")]
    NoRecord { host: String },

    #[error("resolving {host} failed after {attempts} attempts: {last_error}")]
    ResolutionTimeout {
        host: String,
        attempts: u32,
        last_error: String,
    },

    /// No nameserver could be used at all. Not retried.
    #[error("DNS transport error: {0}")]
    DnsTransport(String),

    #[error("resolution cancelled")]
    Cancelled,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    InvalidDomain(#[from] ValidationError),
}

/// Outcome of one failed lookup attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupFailure {
    #[error("no TXT records")]
    NoRecord,

    /// Worth retrying: a timeout, refused connection, or server failure.
    #[error("{0}")]
    Transport(String),

    /// Retrying cannot help, e.g. no nameserver is configured.
    #[error("resolver unavailable: {0}")]
    Unavailable(String),
}
