//! Foreground supervision for `server start` and `client start`.

use anyhow::{Context, anyhow};
use edge_core::{EdgeConfig, Profile};
use edge_supervisor::{Phase, PhaseEvent, SupervisorRegistry, SupervisorSettings};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use super::format_time;

/// Run one profile's engine until Ctrl-C or until it fails for good.
pub async fn foreground(config: &EdgeConfig, profile: Profile) -> anyhow::Result<()> {
    let settings = SupervisorSettings::from_config(config);
    info!(
        binary = %settings.engine_binary.display(),
        run_dir = %settings.run_dir.display(),
        "starting supervisor"
    );
    let registry = SupervisorRegistry::with_process_launcher(settings);
    let mut events = registry.subscribe();
    let id = profile.id();
    let port = profile.designated_port();
    registry.register(profile).await?;

    if let Err(e) = registry.start(&id).await {
        drain(&mut events);
        registry.stop_all().await;
        return Err(e).with_context(|| format!("failed to start {id}"));
    }
    drain(&mut events);
    println!("{id} is running on port {port}; press Ctrl-C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let outcome = loop {
        tokio::select! {
            r = &mut ctrl_c => {
                if let Err(e) = r {
                    break Err(anyhow!(e).context("failed to listen for Ctrl-C"));
                }
                info!("shutdown signal received");
                break Ok(());
            }
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event);
                    if event.to == Phase::Failed {
                        let error = registry.status(&id).await.ok().and_then(|s| s.error);
                        break Err(match error {
                            Some(err) => anyhow!(err).context(format!("{id} failed")),
                            None => anyhow!("{id} failed"),
                        });
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "phase events dropped"),
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    registry.stop_all().await;
    drain(&mut events);
    outcome
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<PhaseEvent>) {
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }
}

fn print_event(event: &PhaseEvent) {
    let at = format_time(event.at as i64);
    match &event.detail {
        Some(detail) => println!("[{at}] {}: {} -> {} ({detail})", event.profile, event.from, event.to),
        None => println!("[{at}] {}: {} -> {}", event.profile, event.from, event.to),
    }
}
