//! Discovery records: the connection parameters a client needs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::identity::Credential;
use crate::validate;

/// Label prepended to a domain to form the TXT discovery host.
pub const DISCOVERY_LABEL: &str = "_auth";

/// TTL suggested to operators when publishing the TXT record.
pub const DISCOVERY_TTL: u32 = 600;

/// Build the TXT query name for a domain: `_auth.<domain>`.
pub fn discovery_host(domain: &str) -> String {
    format!("{DISCOVERY_LABEL}.{domain}")
}

/// Discovery wire version. Only exact tag matches are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "v=edgecli1")]
    V1,
}

impl ProtocolVersion {
    pub const CURRENT: ProtocolVersion = ProtocolVersion::V1;

    pub fn tag(self) -> &'static str {
        match self {
            ProtocolVersion::V1 => "v=edgecli1",
        }
    }

    /// Match a tag exactly; no trimming, no case folding.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "v=edgecli1" => Some(ProtocolVersion::V1),
            _ => None,
        }
    }
}

/// Tunneling protocol spoken by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vless,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Vless => "vless",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vless" => Ok(Protocol::Vless),
            other => Err(ValidationError::new(
                "protocol",
                other,
                "unsupported tunneling protocol",
            )),
        }
    }
}

/// Everything a client needs to reach one server instance.
///
/// Fields are private; [`DiscoveryRecord::new`] is the only way in, so a
/// record that exists always satisfies the field constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RecordFields", into = "RecordFields")]
pub struct DiscoveryRecord {
    version: ProtocolVersion,
    id: Credential,
    domain: String,
    protocol: Protocol,
    port: u16,
    path: String,
}

impl DiscoveryRecord {
    pub fn new(
        id: Credential,
        domain: impl Into<String>,
        protocol: Protocol,
        port: u16,
        path: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let domain = domain.into();
        let path = path.into();
        validate::domain("domain", &domain)?;
        validate::port("port", port)?;
        validate::path("path", &path)?;
        Ok(Self {
            version: ProtocolVersion::CURRENT,
            id,
            domain,
            protocol,
            port,
            path,
        })
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn id(&self) -> Credential {
        self.id
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// TXT query name for this record's domain.
    pub fn discovery_host(&self) -> String {
        discovery_host(&self.domain)
    }
}

/// Unchecked persisted form of a [`DiscoveryRecord`].
#[derive(Serialize, Deserialize)]
struct RecordFields {
    version: ProtocolVersion,
    id: Credential,
    domain: String,
    protocol: Protocol,
    port: u16,
    path: String,
}

impl TryFrom<RecordFields> for DiscoveryRecord {
    type Error = ValidationError;

    fn try_from(f: RecordFields) -> Result<Self, Self::Error> {
        let mut record = DiscoveryRecord::new(f.id, f.domain, f.protocol, f.port, f.path)?;
        record.version = f.version;
        Ok(record)
    }
}

impl From<DiscoveryRecord> for RecordFields {
    fn from(r: DiscoveryRecord) -> Self {
        RecordFields {
            version: r.version,
            id: r.id,
            domain: r.domain,
            protocol: r.protocol,
            port: r.port,
            path: r.path,
        }
    }
}
