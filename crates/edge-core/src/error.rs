//! Error types shared by the identity model, the codecs, and profiles.

use thiserror::Error;

/// A profile or record field failed validation.
///
/// Carries the field name and the offending value so callers can render
/// a precise message without re-parsing anything.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field} `{value}`: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub value: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Errors produced while encoding or decoding discovery data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed link: {0}")]
    MalformedLink(String),

    #[error("unsupported version tag `{found}` (expected `{expected}`)")]
    UnsupportedVersion {
        found: String,
        expected: &'static str,
    },

    #[error("failed to parse discovery payload: {0}")]
    Parse(String),

    /// `needed` and `limit` are TXT strings for TXT output, characters for links.
    #[error("encoded record too large: needs {needed}, limit is {limit}")]
    EncodingTooLarge { needed: usize, limit: usize },

    #[error(transparent)]
    InvalidField(#[from] ValidationError),
}

/// Errors from self-signed certificate generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateError {
    #[error("certificate domain is empty")]
    EmptyDomain,

    #[error("invalid certificate domain: {0}")]
    InvalidDomain(String),

    #[error("certificate generation failed: {0}")]
    Generation(String),
}

impl From<rcgen::Error> for CertificateError {
    fn from(err: rcgen::Error) -> Self {
        CertificateError::Generation(err.to_string())
    }
}

/// Errors raised while building or using a profile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("client profile `{0}` has no resolved discovery record")]
    Unresolved(String),
}

pub type ProfileResult<T> = Result<T, ProfileError>;
