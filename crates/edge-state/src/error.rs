//! Error types for the profile store.

use edge_core::{ProfileId, ValidationError};
use thiserror::Error;

/// Result type alias for profile store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by [`ProfileStore`](crate::ProfileStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot open profile store at {location}: {reason}")]
    Open { location: String, reason: String },

    /// A redb failure; `op` names the step that failed.
    #[error("profile store {op} failed: {reason}")]
    Storage { op: &'static str, reason: String },

    #[error("cannot encode profile {profile}: {reason}")]
    Encode { profile: ProfileId, reason: String },

    /// The stored bytes no longer parse as a profile.
    #[error("stored profile {profile} is unreadable: {reason}")]
    Corrupt { profile: ProfileId, reason: String },

    #[error("no profile {0}")]
    NotFound(ProfileId),

    #[error("refusing to store {profile}: {source}")]
    Invalid {
        profile: ProfileId,
        #[source]
        source: ValidationError,
    },
}
