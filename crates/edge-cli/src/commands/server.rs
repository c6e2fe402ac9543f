use anyhow::{Context, bail};
use edge_core::{Profile, ProfileId, ProfileKind, ServerProfile, ServerProfileRequest, ShareBundle};

use super::{App, format_time, run};

pub fn create(
    app: &App,
    name: String,
    domain: String,
    backend: String,
    port: Option<u16>,
    path: Option<String>,
) -> anyhow::Result<()> {
    let server = ServerProfile::create(ServerProfileRequest {
        name,
        bind_domain: domain,
        backend_address: backend,
        port,
        path,
    })
    .context("invalid server profile")?;
    app.insert(&server.clone().into())?;

    println!("✓ Created server profile '{}'", server.name);
    println!();
    print_share(&share_bundle(app, &server)?);
    Ok(())
}

pub fn list(app: &App) -> anyhow::Result<()> {
    let servers = app.store.list(ProfileKind::Server)?;
    if servers.is_empty() {
        println!("No server profiles.");
        return Ok(());
    }
    println!("{:<20} {:<32} {:>6}  BACKEND", "NAME", "DOMAIN", "PORT");
    for profile in servers {
        if let Profile::Server(s) = profile {
            println!(
                "{:<20} {:<32} {:>6}  {}",
                s.name,
                s.bind_domain,
                s.listen_port(),
                s.backend_address
            );
        }
    }
    Ok(())
}

pub fn show(app: &App, name: &str) -> anyhow::Result<()> {
    let s = load_server(app, name)?;
    let record = &s.discovery_record;
    println!("Server profile '{}'", s.name);
    println!("  domain:       {}", s.bind_domain);
    println!("  listen port:  {}", s.listen_port());
    println!("  path:         {}", record.path());
    println!("  protocol:     {}", record.protocol().as_str());
    println!("  backend:      {}", s.backend_address);
    println!("  credential:   {}", s.credential);
    println!("  certificate:  sha256 {}", s.certificate.fingerprint);
    println!(
        "  valid:        {} to {}",
        format_time(s.certificate.not_before),
        format_time(s.certificate.not_after)
    );
    println!("  created:      {}", format_time(s.created_at as i64));
    println!("  updated:      {}", format_time(s.updated_at as i64));
    Ok(())
}

pub fn share(app: &App, name: &str, format: &str) -> anyhow::Result<()> {
    let server = load_server(app, name)?;
    let bundle = share_bundle(app, &server)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&bundle)?),
        _ => print_share(&bundle),
    }
    Ok(())
}

pub fn regenerate(app: &App, name: &str) -> anyhow::Result<()> {
    let mut server = load_server(app, name)?;
    server
        .regenerate_identity()
        .with_context(|| format!("failed to regenerate {}", server.id()))?;
    app.update(&server.clone().into())?;

    println!("✓ New credential and certificate for '{}'", server.name);
    println!("  Publish the updated record; previously shared details no longer work.");
    println!();
    print_share(&share_bundle(app, &server)?);
    Ok(())
}

pub fn delete(app: &App, name: &str) -> anyhow::Result<()> {
    let id = ProfileId::new(ProfileKind::Server, name);
    if !app.store.delete(&id)? {
        bail!("no server profile named '{name}'");
    }
    println!("✓ Deleted server profile '{name}'");
    Ok(())
}

pub async fn start(app: &App, name: &str) -> anyhow::Result<()> {
    let server = load_server(app, name)?;
    run::foreground(&app.config, server.into()).await
}

fn load_server(app: &App, name: &str) -> anyhow::Result<ServerProfile> {
    match app.load(&ProfileId::new(ProfileKind::Server, name))? {
        Profile::Server(s) => Ok(s),
        Profile::Client(_) => bail!("'{name}' is not a server profile"),
    }
}

fn share_bundle(app: &App, server: &ServerProfile) -> anyhow::Result<ShareBundle> {
    server
        .share(app.config.resolver.max_txt_strings)
        .with_context(|| format!("cannot render share data for {}", server.id()))
}

fn print_share(bundle: &ShareBundle) {
    let dns = &bundle.dns_record;
    println!("DNS record to publish:");
    println!("  type:   {}", dns.record_type);
    println!("  host:   {}", dns.host);
    println!("  ttl:    {}", dns.ttl);
    for value in &dns.values {
        println!("  value:  \"{value}\"");
    }
    println!();
    println!("Share link:");
    println!("  {}", bundle.link);
}
