//! Engine configuration handoff.
//!
//! Renders the JSON configuration consumed by the external proxy engine
//! (Xray-compatible schema). Output is a pure function of the profile and
//! the artifact paths, so every start rewrites an identical file for an
//! unchanged profile.

use std::path::{Path, PathBuf};

use serde_json::{Value, json};

use crate::error::ProfileResult;
use crate::profile::{ClientProfile, Profile, ProfileId, ServerProfile};

/// Files the supervisor writes for one profile, all under one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineArtifacts {
    pub dir: PathBuf,
    pub config_path: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Engine stdout and stderr.
    pub log_path: PathBuf,
}

impl EngineArtifacts {
    /// Scoped location `<run_dir>/<kind>-<name>/`.
    pub fn for_profile(run_dir: &Path, id: &ProfileId) -> Self {
        let dir = run_dir.join(format!("{}-{}", id.kind().as_str(), id.name()));
        Self {
            config_path: dir.join("engine.json"),
            cert_path: dir.join("cert.pem"),
            key_path: dir.join("key.pem"),
            log_path: dir.join("engine.log"),
            dir,
        }
    }
}

/// Render the engine configuration for either profile kind.
pub fn render_engine_config(profile: &Profile, artifacts: &EngineArtifacts) -> ProfileResult<Value> {
    match profile {
        Profile::Server(server) => Ok(render_server(server, artifacts)),
        Profile::Client(client) => render_client(client),
    }
}

fn render_server(server: &ServerProfile, artifacts: &EngineArtifacts) -> Value {
    let record = &server.discovery_record;
    json!({
        "log": { "loglevel": "warning" },
        "inbounds": [{
            "listen": "0.0.0.0",
            "port": record.port(),
            "protocol": record.protocol().as_str(),
            "settings": {
                "clients": [{ "id": server.credential.to_string(), "flow": "" }],
                "decryption": "none"
            },
            "streamSettings": {
                "network": "xhttp",
                "security": "tls",
                "xhttpSettings": {
                    "host": server.bind_domain,
                    "mode": "auto",
                    "path": record.path(),
                    "scMaxBufferedPosts": 200,
                    "scStreamUpServerSecs": "20-80"
                },
                "tlsSettings": {
                    "serverName": server.bind_domain,
                    "alpn": ["h3", "h2", "http/1.1"],
                    "minVersion": "1.2",
                    "certificates": [{
                        "certificateFile": artifacts.cert_path.display().to_string(),
                        "keyFile": artifacts.key_path.display().to_string()
                    }]
                }
            }
        }],
        "outbounds": [{
            "protocol": "freedom",
            "settings": { "redirect": server.backend_address.to_string() }
        }]
    })
}

fn render_client(client: &ClientProfile) -> ProfileResult<Value> {
    let record = client.record()?;
    Ok(json!({
        "log": { "loglevel": "warning" },
        "inbounds": [{
            "listen": "127.0.0.1",
            "port": client.local_port,
            "protocol": "dokodemo-door",
            "settings": {
                "address": "127.0.0.1",
                "port": 25565,
                "network": "tcp"
            }
        }],
        "outbounds": [{
            "protocol": record.protocol().as_str(),
            "settings": {
                "vnext": [{
                    "address": record.domain(),
                    "port": record.port(),
                    "users": [{ "id": record.id().to_string(), "encryption": "none" }]
                }]
            },
            "streamSettings": {
                "network": "xhttp",
                "security": "tls",
                "xhttpSettings": {
                    "host": record.domain(),
                    "mode": "auto",
                    "path": record.path(),
                    "extra": {
                        "scMaxEachPostBytes": "1000000-10000000",
                        "scMinPostsIntervalMs": "0-100"
                    }
                },
                "tlsSettings": {
                    "serverName": record.domain(),
                    "allowInsecure": true,
                    "fingerprint": "chrome",
                    "alpn": ["h3", "h2"]
                }
            }
        }]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProfileError;
    use crate::profile::{ServerProfileRequest, ProfileKind};

    fn server() -> ServerProfile {
        ServerProfile::create(ServerProfileRequest {
            name: "mc1".to_string(),
            bind_domain: "example.com".to_string(),
            backend_address: "127.0.0.1:25565".to_string(),
            port: None,
            path: None,
        })
        .unwrap()
    }

    #[test]
    fn artifacts_are_scoped_per_profile() {
        let a = EngineArtifacts::for_profile(Path::new("/run/edge"), &ProfileId::new(ProfileKind::Server, "mc1"));
        let b = EngineArtifacts::for_profile(Path::new("/run/edge"), &ProfileId::new(ProfileKind::Client, "mc1"));
        assert_eq!(a.config_path, Path::new("/run/edge/server-mc1/engine.json"));
        assert_ne!(a.dir, b.dir);
    }

    #[test]
    fn server_config_carries_profile_fields() {
        let server = server();
        let artifacts = EngineArtifacts::for_profile(Path::new("/tmp/run"), &server.id());
        let cfg = render_engine_config(&server.clone().into(), &artifacts).unwrap();
        let inbound = &cfg["inbounds"][0];
        assert_eq!(inbound["port"], 443);
        assert_eq!(inbound["settings"]["clients"][0]["id"], server.credential.to_string());
        assert_eq!(inbound["streamSettings"]["xhttpSettings"]["path"], "/mcproxy");
        assert_eq!(
            inbound["streamSettings"]["tlsSettings"]["certificates"][0]["certificateFile"],
            "/tmp/run/server-mc1/cert.pem"
        );
        assert_eq!(cfg["outbounds"][0]["settings"]["redirect"], "127.0.0.1:25565");
    }

    #[test]
    fn rendering_is_deterministic() {
        let profile: Profile = server().into();
        let artifacts = EngineArtifacts::for_profile(Path::new("/tmp/run"), &profile.id());
        assert_eq!(
            render_engine_config(&profile, &artifacts).unwrap(),
            render_engine_config(&profile, &artifacts).unwrap()
        );
    }

    #[test]
    fn client_config_targets_record() {
        let server = server();
        let mut client = ClientProfile::from_domain("home", "example.com", 30000).unwrap();
        client.apply_resolution(server.discovery_record.clone());
        let profile: Profile = client.into();
        let artifacts = EngineArtifacts::for_profile(Path::new("/tmp/run"), &profile.id());
        let cfg = render_engine_config(&profile, &artifacts).unwrap();
        assert_eq!(cfg["inbounds"][0]["port"], 30000);
        let vnext = &cfg["outbounds"][0]["settings"]["vnext"][0];
        assert_eq!(vnext["address"], "example.com");
        assert_eq!(vnext["users"][0]["id"], server.credential.to_string());
    }

    #[test]
    fn unresolved_client_cannot_render() {
        let profile: Profile = ClientProfile::from_domain("home", "example.com", 30000).unwrap().into();
        let artifacts = EngineArtifacts::for_profile(Path::new("/tmp/run"), &profile.id());
        assert!(matches!(
            render_engine_config(&profile, &artifacts),
            Err(ProfileError::Unresolved(_))
        ));
    }
}
