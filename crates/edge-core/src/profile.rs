//! Server and client profiles.
//!
//! A server profile owns its credential and certificate and derives the
//! discovery record published to clients. A client profile is created
//! from a domain (resolved later through DNS) or from a link (decoded
//! immediately) and caches the resolved record until the next resolution.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::codec;
use crate::error::{ProfileError, ProfileResult, ValidationError};
use crate::identity::{self, CertificateBundle, Credential};
use crate::record::{DISCOVERY_TTL, DiscoveryRecord, Protocol, discovery_host};
use crate::validate;

/// Default public port of a server engine.
pub const DEFAULT_SERVER_PORT: u16 = 443;

/// Default transport path.
pub const DEFAULT_PATH: &str = "/mcproxy";

/// Default local listen port of a client engine.
pub const DEFAULT_LOCAL_PORT: u16 = 25565;

// ── Identifiers ────────────────────────────────────────────────────

/// Which side of the tunnel a profile describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Server,
    Client,
}

impl ProfileKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProfileKind::Server => "server",
            ProfileKind::Client => "client",
        }
    }
}

/// Profile identifier: `{kind}/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileId(String);

impl ProfileId {
    pub fn new(kind: ProfileKind, name: &str) -> Self {
        Self(format!("{}/{name}", kind.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> ProfileKind {
        if self.0.starts_with("client/") {
            ProfileKind::Client
        } else {
            ProfileKind::Server
        }
    }

    pub fn name(&self) -> &str {
        self.0.split_once('/').map_or(self.0.as_str(), |(_, name)| name)
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProfileId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once('/')
            .ok_or_else(|| ValidationError::new("profile", s, "expected `server/<name>` or `client/<name>`"))?;
        let kind = match kind {
            "server" => ProfileKind::Server,
            "client" => ProfileKind::Client,
            other => return Err(ValidationError::new("profile", other, "unknown profile kind")),
        };
        validate::profile_name(name)?;
        Ok(ProfileId::new(kind, name))
    }
}

/// Backend target as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendAddress {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for BackendAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ValidationError::new("backend_address", s, reason);
        let (host, port) = s.rsplit_once(':').ok_or_else(|| invalid("expected host:port"))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        let port: u16 = port.parse().map_err(|_| invalid("port must be in 1-65535"))?;
        validate::port("backend_address", port)?;
        validate::host("backend_address", host)?;
        Ok(BackendAddress {
            host: host.to_string(),
            port,
        })
    }
}

// ── Server ─────────────────────────────────────────────────────────

/// Input for [`ServerProfile::create`].
#[derive(Debug, Clone)]
pub struct ServerProfileRequest {
    pub name: String,
    pub bind_domain: String,
    pub backend_address: String,
    pub port: Option<u16>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProfile {
    pub name: String,
    pub bind_domain: String,
    pub backend_address: BackendAddress,
    pub credential: Credential,
    pub certificate: CertificateBundle,
    pub discovery_record: DiscoveryRecord,
    pub created_at: u64,
    pub updated_at: u64,
}

impl ServerProfile {
    /// Validate input and generate a fresh credential and certificate.
    pub fn create(req: ServerProfileRequest) -> ProfileResult<Self> {
        validate::profile_name(&req.name)?;
        validate::domain("bind_domain", &req.bind_domain)?;
        let backend_address: BackendAddress = req.backend_address.parse()?;
        let port = req.port.unwrap_or(DEFAULT_SERVER_PORT);
        let path = req.path.unwrap_or_else(|| DEFAULT_PATH.to_string());

        let credential = Credential::generate();
        let certificate = identity::generate_certificate(&req.bind_domain)?;
        let discovery_record =
            DiscoveryRecord::new(credential, req.bind_domain.clone(), Protocol::Vless, port, path)?;

        let now = epoch_secs();
        info!(name = %req.name, domain = %req.bind_domain, "server profile created");
        Ok(Self {
            name: req.name,
            bind_domain: req.bind_domain,
            backend_address,
            credential,
            certificate,
            discovery_record,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> ProfileId {
        ProfileId::new(ProfileKind::Server, &self.name)
    }

    /// Public port the engine listens on.
    pub fn listen_port(&self) -> u16 {
        self.discovery_record.port()
    }

    /// Replace credential, certificate, and record together.
    ///
    /// Anything previously published from this profile is stale afterwards.
    pub fn regenerate_identity(&mut self) -> ProfileResult<()> {
        let credential = Credential::generate();
        let certificate = identity::generate_certificate(&self.bind_domain)?;
        let discovery_record = DiscoveryRecord::new(
            credential,
            self.bind_domain.clone(),
            self.discovery_record.protocol(),
            self.discovery_record.port(),
            self.discovery_record.path(),
        )?;
        self.credential = credential;
        self.certificate = certificate;
        self.discovery_record = discovery_record;
        self.updated_at = epoch_secs();
        info!(name = %self.name, "server identity regenerated; republish discovery data");
        Ok(())
    }

    /// Everything an operator needs to hand out this server.
    pub fn share(&self, max_txt_strings: usize) -> ProfileResult<ShareBundle> {
        let txt = codec::encode_txt_with_limit(&self.discovery_record, max_txt_strings)?;
        let link = codec::encode_link(&self.discovery_record)?;
        Ok(ShareBundle {
            dns_record: DnsRecordInfo {
                record_type: "TXT".to_string(),
                host: discovery_host(&self.bind_domain),
                values: txt.clone(),
                ttl: DISCOVERY_TTL,
            },
            txt,
            link,
            connection: self.discovery_record.clone(),
        })
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate::profile_name(&self.name)?;
        validate::domain("bind_domain", &self.bind_domain)?;
        if self.discovery_record.id() != self.credential {
            return Err(ValidationError::new(
                "discovery_record",
                self.discovery_record.id().to_string(),
                "record id does not match the profile credential",
            ));
        }
        if self.certificate.domain != self.bind_domain {
            return Err(ValidationError::new(
                "certificate",
                self.certificate.domain.clone(),
                "certificate is bound to another domain",
            ));
        }
        Ok(())
    }
}

/// DNS record an operator publishes for TXT-based discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecordInfo {
    pub record_type: String,
    pub host: String,
    /// Character-strings in publication order.
    pub values: Vec<String>,
    pub ttl: u32,
}

/// Discovery data rendered from a server profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareBundle {
    pub txt: Vec<String>,
    pub link: String,
    pub dns_record: DnsRecordInfo,
    pub connection: DiscoveryRecord,
}

// ── Client ─────────────────────────────────────────────────────────

/// Where a client profile gets its discovery record from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ClientSource {
    Domain(String),
    Link(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub name: String,
    pub source: ClientSource,
    pub local_port: u16,
    pub resolved_record: Option<DiscoveryRecord>,
    /// Unix seconds of the last successful resolution or decode.
    pub resolved_at: Option<u64>,
    pub created_at: u64,
}

impl ClientProfile {
    /// Client that will resolve `_auth.<domain>` before starting.
    pub fn from_domain(name: &str, domain: &str, local_port: u16) -> ProfileResult<Self> {
        validate::profile_name(name)?;
        validate::domain("remote_domain", domain)?;
        validate::port("local_port", local_port)?;
        Ok(Self {
            name: name.to_string(),
            source: ClientSource::Domain(domain.to_string()),
            local_port,
            resolved_record: None,
            resolved_at: None,
            created_at: epoch_secs(),
        })
    }

    /// Client built from a shared link; the record is decoded immediately.
    pub fn from_link(name: &str, link: &str, local_port: u16) -> ProfileResult<Self> {
        validate::profile_name(name)?;
        validate::port("local_port", local_port)?;
        let record = codec::decode_link(link)?;
        let now = epoch_secs();
        Ok(Self {
            name: name.to_string(),
            source: ClientSource::Link(link.trim().to_string()),
            local_port,
            resolved_record: Some(record),
            resolved_at: Some(now),
            created_at: now,
        })
    }

    pub fn id(&self) -> ProfileId {
        ProfileId::new(ProfileKind::Client, &self.name)
    }

    /// Domain to resolve, if this client is DNS-backed.
    pub fn remote_domain(&self) -> Option<&str> {
        match &self.source {
            ClientSource::Domain(d) => Some(d),
            ClientSource::Link(_) => None,
        }
    }

    /// Replace the cached record with a freshly resolved one.
    pub fn apply_resolution(&mut self, record: DiscoveryRecord) {
        info!(name = %self.name, domain = %record.domain(), "client record updated");
        self.resolved_record = Some(record);
        self.resolved_at = Some(epoch_secs());
    }

    /// The cached record, or an error if the client was never resolved.
    pub fn record(&self) -> ProfileResult<&DiscoveryRecord> {
        self.resolved_record
            .as_ref()
            .ok_or_else(|| ProfileError::Unresolved(self.name.clone()))
    }
}

// ── Either kind ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Profile {
    Server(ServerProfile),
    Client(ClientProfile),
}

impl Profile {
    pub fn id(&self) -> ProfileId {
        match self {
            Profile::Server(p) => p.id(),
            Profile::Client(p) => p.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Profile::Server(p) => &p.name,
            Profile::Client(p) => &p.name,
        }
    }

    pub fn kind(&self) -> ProfileKind {
        match self {
            Profile::Server(_) => ProfileKind::Server,
            Profile::Client(_) => ProfileKind::Client,
        }
    }

    /// Port the supervised engine binds on this host.
    pub fn designated_port(&self) -> u16 {
        match self {
            Profile::Server(p) => p.listen_port(),
            Profile::Client(p) => p.local_port,
        }
    }

    /// Interface the engine binds.
    pub fn bind_host(&self) -> &'static str {
        match self {
            Profile::Server(_) => "0.0.0.0",
            Profile::Client(_) => "127.0.0.1",
        }
    }
}

impl From<ServerProfile> for Profile {
    fn from(p: ServerProfile) -> Self {
        Profile::Server(p)
    }
}

impl From<ClientProfile> for Profile {
    fn from(p: ClientProfile) -> Self {
        Profile::Client(p)
    }
}

/// Reject two profiles that would bind the same local port.
pub fn check_port_conflicts<'a>(
    profiles: impl IntoIterator<Item = &'a Profile>,
) -> Result<(), ValidationError> {
    let mut seen: HashMap<u16, ProfileId> = HashMap::new();
    for profile in profiles {
        let port = profile.designated_port();
        let id = profile.id();
        if let Some(other) = seen.get(&port)
            && *other != id
        {
            return Err(ValidationError::new(
                "port",
                port.to_string(),
                format!("already used by profile {other}"),
            ));
        }
        seen.insert(port, id);
    }
    Ok(())
}

pub(crate) fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
