use anyhow::{Context, bail};
use edge_core::{ClientProfile, ClientSource, DiscoveryRecord, Profile, ProfileId, ProfileKind};
use edge_dns::DiscoveryResolver;
use tokio::sync::watch;
use tracing::{info, warn};

use super::{App, format_time, run};

pub async fn add(
    app: &App,
    name: &str,
    domain: Option<&str>,
    link: Option<&str>,
    local_port: u16,
) -> anyhow::Result<()> {
    let mut client = match (domain, link) {
        (_, Some(link)) => ClientProfile::from_link(name, link, local_port).context("invalid link")?,
        (Some(domain), None) => {
            ClientProfile::from_domain(name, domain, local_port).context("invalid client profile")?
        }
        (None, None) => bail!("either --domain or --link is required"),
    };

    // Try the lookup right away so a bad domain shows up early; a failure
    // here still saves the profile for a later `client resolve`.
    if let Some(domain) = client.remote_domain().map(str::to_string) {
        match lookup(app, &domain).await {
            Ok(record) => client.apply_resolution(record),
            Err(e) => warn!(%domain, error = %format!("{e:#}"), "initial resolution failed"),
        }
    }

    app.insert(&client.clone().into())?;
    println!("✓ Added client profile '{}' on 127.0.0.1:{}", client.name, client.local_port);
    match &client.resolved_record {
        Some(record) => print_record(record),
        None => println!("  Not resolved yet; run `edgecli client resolve {}`.", client.name),
    }
    Ok(())
}

pub async fn resolve(app: &App, name: &str) -> anyhow::Result<()> {
    let mut client = load_client(app, name)?;
    let Some(domain) = client.remote_domain().map(str::to_string) else {
        println!("'{name}' was added from a link; nothing to resolve.");
        return Ok(());
    };
    let record = lookup(app, &domain).await?;
    client.apply_resolution(record);
    app.update(&client.clone().into())?;

    println!("✓ Resolved {domain}");
    if let Some(record) = &client.resolved_record {
        print_record(record);
    }
    Ok(())
}

pub fn list(app: &App) -> anyhow::Result<()> {
    let clients = app.store.list(ProfileKind::Client)?;
    if clients.is_empty() {
        println!("No client profiles.");
        return Ok(());
    }
    println!("{:<20} {:<32} {:>6}  RESOLVED", "NAME", "SOURCE", "LOCAL");
    for profile in clients {
        if let Profile::Client(c) = profile {
            let source = match &c.source {
                ClientSource::Domain(d) => d.clone(),
                ClientSource::Link(_) => "(link)".to_string(),
            };
            let resolved = match c.resolved_at {
                Some(at) => format_time(at as i64),
                None => "never".to_string(),
            };
            println!("{:<20} {:<32} {:>6}  {}", c.name, source, c.local_port, resolved);
        }
    }
    Ok(())
}

pub fn show(app: &App, name: &str) -> anyhow::Result<()> {
    let c = load_client(app, name)?;
    println!("Client profile '{}'", c.name);
    match &c.source {
        ClientSource::Domain(d) => println!("  source:       domain {d}"),
        ClientSource::Link(l) => println!("  source:       link {l}"),
    }
    println!("  local port:   {}", c.local_port);
    println!("  created:      {}", format_time(c.created_at as i64));
    match (&c.resolved_record, c.resolved_at) {
        (Some(record), Some(at)) => {
            println!("  resolved:     {}", format_time(at as i64));
            print_record(record);
        }
        _ => println!("  resolved:     never"),
    }
    Ok(())
}

pub fn delete(app: &App, name: &str) -> anyhow::Result<()> {
    let id = ProfileId::new(ProfileKind::Client, name);
    if !app.store.delete(&id)? {
        bail!("no client profile named '{name}'");
    }
    println!("✓ Deleted client profile '{name}'");
    Ok(())
}

/// Refresh a domain-backed client, then run its engine until Ctrl-C.
pub async fn start(app: &App, name: &str) -> anyhow::Result<()> {
    let mut client = load_client(app, name)?;
    if let Some(domain) = client.remote_domain().map(str::to_string) {
        match lookup(app, &domain).await {
            Ok(record) => {
                client.apply_resolution(record);
                app.update(&client.clone().into())?;
            }
            Err(e) if client.resolved_record.is_some() => {
                warn!(%domain, error = %format!("{e:#}"), "resolution failed, using cached record");
            }
            Err(e) => return Err(e),
        }
    }
    client.record().context("client has no connection details")?;
    run::foreground(&app.config, client.into()).await
}

/// Resolve `domain`, aborting on Ctrl-C.
async fn lookup(app: &App, domain: &str) -> anyhow::Result<DiscoveryRecord> {
    let resolver = DiscoveryResolver::from_config(&app.config.resolver);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling lookup");
            let _ = cancel_tx.send(true);
        }
    });
    let result = resolver.resolve_with_cancel(domain, cancel_rx).await;
    interrupt.abort();
    result.with_context(|| format!("failed to resolve {domain}"))
}

fn load_client(app: &App, name: &str) -> anyhow::Result<ClientProfile> {
    match app.load(&ProfileId::new(ProfileKind::Client, name))? {
        Profile::Client(c) => Ok(c),
        Profile::Server(_) => bail!("'{name}' is not a client profile"),
    }
}

fn print_record(record: &DiscoveryRecord) {
    println!("  server:       {}:{}", record.domain(), record.port());
    println!("  path:         {}", record.path());
    println!("  protocol:     {}", record.protocol().as_str());
    println!("  version:      {}", record.version().tag());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::test_app;
    use edge_core::{Credential, codec};

    fn link() -> String {
        let record = DiscoveryRecord::new(
            Credential::generate(),
            "example.com",
            edge_core::Protocol::Vless,
            443,
            "/mcproxy",
        )
        .unwrap();
        codec::encode_link(&record).unwrap()
    }

    #[tokio::test]
    async fn add_from_link_stores_resolved_profile() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path());

        add(&app, "home", None, Some(&link()), 30000).await.unwrap();
        let client = load_client(&app, "home").unwrap();
        assert_eq!(client.local_port, 30000);
        assert_eq!(client.record().unwrap().domain(), "example.com");

        // Link clients need no lookup.
        resolve(&app, "home").await.unwrap();
    }

    #[tokio::test]
    async fn bad_link_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path());
        assert!(add(&app, "home", None, Some("edge://%%%"), 30000).await.is_err());
        assert!(app.store.list(ProfileKind::Client).unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_client() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path());
        add(&app, "home", None, Some(&link()), 30000).await.unwrap();
        delete(&app, "home").unwrap();
        assert!(load_client(&app, "home").is_err());
        assert!(delete(&app, "home").is_err());
    }
}
