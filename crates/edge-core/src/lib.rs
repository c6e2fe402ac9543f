//! edge-core: identity, discovery, and profile model for edgecli.
//!
//! # Flow
//!
//! ```text
//! ServerProfile::create
//!   ├── Credential::generate()          (128-bit, UUID text form)
//!   ├── generate_certificate(domain)    (self-signed, 10 years)
//!   └── DiscoveryRecord
//!         ├── codec::encode_txt  → "v=edgecli1; {...}"  (published at _auth.<domain>)
//!         └── codec::encode_link → "edge://..."        (shared out of band)
//!
//! ClientProfile::from_link / from_domain + apply_resolution
//!   └── DiscoveryRecord → engine::render_engine_config
//! ```

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod profile;
pub mod record;
pub mod validate;

pub use config::EdgeConfig;
pub use engine::{EngineArtifacts, render_engine_config};
pub use error::{CertificateError, CodecError, ProfileError, ProfileResult, ValidationError};
pub use identity::{CertificateBundle, Credential, generate_certificate};
pub use profile::{
    BackendAddress, ClientProfile, ClientSource, DnsRecordInfo, Profile, ProfileId, ProfileKind,
    ServerProfile, ServerProfileRequest, ShareBundle, check_port_conflicts,
};
pub use record::{DiscoveryRecord, Protocol, ProtocolVersion, discovery_host};
