//! Field validators for profile and record input.
//!
//! Each validator names the field it checks so the resulting
//! [`ValidationError`] points back at the user's input.

use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ValidationError;

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)*[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$",
    )
    .expect("domain regex")
});

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("name regex"));

/// Longest DNS name accepted (presentation form, no trailing dot).
pub const MAX_DOMAIN_LEN: usize = 253;

/// Longest profile name accepted.
pub const MAX_NAME_LEN: usize = 64;

const PATH_FORBIDDEN: &[char] = &['<', '>', ':', '"', '|', '?', '*', ' '];

/// Validate a DNS name such as `example.com`.
pub fn domain(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new(field, value, "must not be empty"));
    }
    if value.len() > MAX_DOMAIN_LEN {
        return Err(ValidationError::new(
            field,
            value,
            format!("longer than {MAX_DOMAIN_LEN} characters"),
        ));
    }
    if !DOMAIN_RE.is_match(value) {
        return Err(ValidationError::new(field, value, "not a valid DNS name"));
    }
    Ok(())
}

/// Validate a TCP port; zero is never a usable port.
pub fn port(field: &'static str, value: u16) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::new(field, "0", "must be in 1-65535"));
    }
    Ok(())
}

/// Convert a wide integer to a port, rejecting anything outside 1-65535.
pub fn port_from_u64(field: &'static str, value: u64) -> Result<u16, ValidationError> {
    let port = u16::try_from(value)
        .map_err(|_| ValidationError::new(field, value.to_string(), "must be in 1-65535"))?;
    self::port(field, port)?;
    Ok(port)
}

/// Validate a profile name: letters, digits, `_` and `-` only.
pub fn profile_name(value: &str) -> Result<(), ValidationError> {
    if value.len() > MAX_NAME_LEN {
        return Err(ValidationError::new(
            "name",
            value,
            format!("longer than {MAX_NAME_LEN} characters"),
        ));
    }
    if !NAME_RE.is_match(value) {
        return Err(ValidationError::new(
            "name",
            value,
            "only letters, digits, `_` and `-` are allowed",
        ));
    }
    Ok(())
}

/// Validate an HTTP path used by the tunnel transport.
pub fn path(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if !value.starts_with('/') {
        return Err(ValidationError::new(field, value, "must begin with `/`"));
    }
    if let Some(c) = value.chars().find(|c| PATH_FORBIDDEN.contains(c) || c.is_control()) {
        return Err(ValidationError::new(
            field,
            value,
            format!("contains forbidden character {c:?}"),
        ));
    }
    Ok(())
}

/// Validate a host that is either an IP literal or a DNS name.
pub fn host(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    domain(field, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_domains() {
        assert!(domain("domain", "example.com").is_ok());
        assert!(domain("domain", "mc.play-now.example.co.uk").is_ok());
        assert!(domain("domain", "localhost").is_ok());
    }

    #[test]
    fn rejects_bad_domains() {
        assert!(domain("domain", "").is_err());
        assert!(domain("domain", "-bad.com").is_err());
        assert!(domain("domain", "under_score.com").is_err());
        assert!(domain("domain", "trailing.").is_err());
        assert!(domain("domain", &"a".repeat(254)).is_err());
    }

    #[test]
    fn domain_error_names_field_and_value() {
        let err = domain("bind_domain", "bad domain").unwrap_err();
        assert_eq!(err.field, "bind_domain");
        assert_eq!(err.value, "bad domain");
    }

    #[test]
    fn port_zero_rejected() {
        assert!(port("port", 0).is_err());
        assert!(port("port", 1).is_ok());
        assert!(port("port", 65535).is_ok());
    }

    #[test]
    fn wide_ports_rejected() {
        assert_eq!(port_from_u64("port", 443), Ok(443));
        assert!(port_from_u64("port", 0).is_err());
        assert!(port_from_u64("port", 65536).is_err());
        assert!(port_from_u64("port", 70_000).is_err());
    }

    #[test]
    fn profile_names() {
        assert!(profile_name("mc1").is_ok());
        assert!(profile_name("my_server-2").is_ok());
        assert!(profile_name("").is_err());
        assert!(profile_name("has space").is_err());
        assert!(profile_name("../escape").is_err());
    }

    #[test]
    fn paths() {
        assert!(path("path", "/mcproxy").is_ok());
        assert!(path("path", "/a/b-c_d").is_ok());
        assert!(path("path", "mcproxy").is_err());
        assert!(path("path", "").is_err());
        assert!(path("path", "/what?").is_err());
    }

    #[test]
    fn hosts_accept_ips_and_names() {
        assert!(host("backend", "127.0.0.1").is_ok());
        assert!(host("backend", "::1").is_ok());
        assert!(host("backend", "mc.internal").is_ok());
        assert!(host("backend", "bad host").is_err());
    }
}
