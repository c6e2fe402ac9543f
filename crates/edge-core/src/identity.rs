//! Identity model: tunnel credentials and self-signed certificates.
//!
//! Both are generated once per server profile and never mutated.
//! Regenerating produces a brand new value; anything published from the
//! old one (TXT record, link) has to be published again.

use std::fmt;

use chrono::{Datelike, NaiveDate, Utc};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::error::{CertificateError, ValidationError};
use crate::validate;

/// Validity window of generated certificates, in years.
pub const CERT_VALIDITY_YEARS: i32 = 10;

/// Length of the canonical hyphenated credential form.
const CANONICAL_LEN: usize = 36;

/// Opaque 128-bit tunnel credential, rendered as a lowercase hyphenated UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Credential(Uuid);

impl Credential {
    /// Generate a fresh credential from the OS random source.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse the canonical `8-4-4-4-12` form. Case-insensitive.
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::new("id", text, "expected a hyphenated UUID");
        if text.len() != CANONICAL_LEN {
            return Err(invalid());
        }
        Uuid::try_parse(text).map(Self).map_err(|_| invalid())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl TryFrom<String> for Credential {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Credential::parse(&value)
    }
}

impl From<Credential> for String {
    fn from(value: Credential) -> Self {
        value.to_string()
    }
}

/// A private key plus a self-signed certificate bound to one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBundle {
    /// Subject CN and sole DNS SAN.
    pub domain: String,
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded PKCS#8 private key.
    pub key_pem: String,
    /// Unix seconds.
    pub not_before: i64,
    /// Unix seconds.
    pub not_after: i64,
    /// Hex SHA-256 of the DER certificate.
    pub fingerprint: String,
}

impl CertificateBundle {
    /// Whether `now` (unix seconds) falls inside the validity window.
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.not_before <= now && now < self.not_after
    }
}

/// Generate an ECDSA P-256 key and a self-signed server certificate for `domain`.
pub fn generate_certificate(domain: &str) -> Result<CertificateBundle, CertificateError> {
    if domain.is_empty() {
        return Err(CertificateError::EmptyDomain);
    }
    validate::domain("domain", domain)
        .map_err(|e| CertificateError::InvalidDomain(e.to_string()))?;

    let mut params = CertificateParams::new(vec![domain.to_string()])
        .map_err(|e| CertificateError::InvalidDomain(e.to_string()))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "edgecli");
    dn.push(DnType::CommonName, domain);
    params.distinguished_name = dn;

    // Day clamped to 28 so the +10y date always exists.
    let today = Utc::now().date_naive();
    let (year, month, day) = (today.year(), today.month(), today.day().min(28));
    params.not_before = rcgen::date_time_ymd(year, month as u8, day as u8);
    params.not_after = rcgen::date_time_ymd(year + CERT_VALIDITY_YEARS, month as u8, day as u8);

    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    let fingerprint = hex::encode(Sha256::digest(cert.der()));
    let not_before = unix_midnight(year, month, day)?;
    let not_after = unix_midnight(year + CERT_VALIDITY_YEARS, month, day)?;

    info!(%domain, %fingerprint, "generated self-signed certificate");

    Ok(CertificateBundle {
        domain: domain.to_string(),
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
        not_before,
        not_after,
        fingerprint,
    })
}

fn unix_midnight(year: i32, month: u32, day: u32) -> Result<i64, CertificateError> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
        .ok_or_else(|| CertificateError::Generation(format!("invalid date {year}-{month}-{day}")))
}
