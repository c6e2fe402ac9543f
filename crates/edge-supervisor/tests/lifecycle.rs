//! Supervisor state machine against the fake engine.

mod support;

use std::net::TcpListener;
use std::sync::Arc;
use std::time::{Duration, Instant};

use edge_supervisor::{Phase, PhaseEvent, ProcessError, ProfileSupervisor, SupervisorError, SupervisorSettings};
use support::{Behavior, FakeLauncher, client_profile, free_port, settings, wait_for_phase, wait_for_status};
use tokio::sync::broadcast;

fn supervisor(
    settings: SupervisorSettings,
    launcher: &Arc<FakeLauncher>,
    port: u16,
) -> (ProfileSupervisor, broadcast::Receiver<PhaseEvent>) {
    let (tx, rx) = broadcast::channel(64);
    let sup = ProfileSupervisor::new(client_profile("home", port), settings, launcher.clone(), tx);
    (sup, rx)
}

/// Target phases of the events received so far.
fn drain_phases(rx: &mut broadcast::Receiver<PhaseEvent>) -> Vec<Phase> {
    let mut phases = Vec::new();
    while let Ok(event) = rx.try_recv() {
        phases.push(event.to);
    }
    phases
}

#[tokio::test]
async fn start_reaches_running_and_stop_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(Behavior::Listen);
    let port = free_port();
    let (sup, mut events) = supervisor(settings(dir.path()), &launcher, port);

    sup.start().await.unwrap();
    let status = sup.status();
    assert_eq!(status.phase, Phase::Running);
    assert_eq!(status.pid, Some(launcher.latest().pid));
    assert_eq!(status.restart_count, 0);

    let artifact_dir = dir.path().join("client-home");
    let config: serde_json::Value =
        serde_json::from_slice(&std::fs::read(artifact_dir.join("engine.json")).unwrap()).unwrap();
    assert_eq!(config["inbounds"][0]["port"], port);
    assert_eq!(launcher.specs()[0].config_path, artifact_dir.join("engine.json"));

    sup.stop().await.unwrap();
    assert_eq!(sup.phase(), Phase::Stopped);
    assert_eq!(sup.status().pid, None);
    assert!(!artifact_dir.exists());
    assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
    assert_eq!(launcher.terminations(), 1);

    assert_eq!(
        drain_phases(&mut events),
        [Phase::Starting, Phase::Running, Phase::Stopping, Phase::Stopped]
    );

    // Second stop is a quiet no-op.
    sup.stop().await.unwrap();
    assert_eq!(launcher.terminations(), 1);
    assert!(drain_phases(&mut events).is_empty());
}

#[tokio::test]
async fn rendered_config_is_identical_across_starts() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(Behavior::Listen);
    let (sup, _events) = supervisor(settings(dir.path()), &launcher, free_port());
    let config_path = dir.path().join("client-home").join("engine.json");

    sup.start().await.unwrap();
    let first = std::fs::read(&config_path).unwrap();
    sup.stop().await.unwrap();
    sup.start().await.unwrap();
    assert_eq!(std::fs::read(&config_path).unwrap(), first);
    sup.stop().await.unwrap();
}

#[tokio::test]
async fn occupied_port_fails_without_launching() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(Behavior::Listen);
    let held = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = held.local_addr().unwrap().port();
    let (sup, mut events) = supervisor(settings(dir.path()), &launcher, port);

    let err = sup.start().await.unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::Process(ProcessError::PortInUse { port: p }) if p == port
    ));
    let status = sup.status();
    assert_eq!(status.phase, Phase::Failed);
    assert_eq!(status.error, Some(ProcessError::PortInUse { port }));
    assert_eq!(launcher.launches(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sup.phase(), Phase::Failed);
    assert_eq!(launcher.launches(), 0);
    assert_eq!(drain_phases(&mut events), [Phase::Starting, Phase::Failed]);

    // Failed needs an explicit reset before another start.
    assert!(matches!(
        sup.start().await,
        Err(SupervisorError::InvalidTransition { from: Phase::Failed, .. })
    ));
    sup.reset().await.unwrap();
    assert_eq!(sup.phase(), Phase::Stopped);
    assert_eq!(sup.status().error, None);

    drop(held);
    sup.start().await.unwrap();
    sup.stop().await.unwrap();
}

#[tokio::test]
async fn spawn_failure_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(Behavior::FailSpawn);
    let (sup, _events) = supervisor(settings(dir.path()), &launcher, free_port());

    let err = sup.start().await.unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::Process(ProcessError::SpawnFailure { ref binary, .. }) if binary == "fake-engine"
    ));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(launcher.launches(), 1);
    assert_eq!(sup.phase(), Phase::Failed);
    assert!(!dir.path().join("client-home").exists());
}

#[tokio::test]
async fn engine_that_never_listens_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(Behavior::NeverListen);
    let mut s = settings(dir.path());
    s.startup_timeout = Duration::from_millis(300);
    let (sup, _events) = supervisor(s, &launcher, free_port());

    let started = Instant::now();
    let err = sup.start().await.unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::Process(ProcessError::StartupTimeout { timeout }) if timeout == Duration::from_millis(300)
    ));
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(launcher.latest().has_exited(), "timed-out engine must be killed");
    assert_eq!(sup.phase(), Phase::Failed);
}

#[tokio::test]
async fn early_exit_reports_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(Behavior::ExitImmediately(3));
    let (sup, _events) = supervisor(settings(dir.path()), &launcher, free_port());

    match sup.start().await.unwrap_err() {
        SupervisorError::Process(ProcessError::EarlyExit { diagnostic }) => {
            assert!(diagnostic.contains("exit code 3"), "{diagnostic}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn crashed_engine_is_restarted() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(Behavior::Listen);
    let (sup, mut events) = supervisor(settings(dir.path()), &launcher, free_port());

    sup.start().await.unwrap();
    let first_pid = sup.status().pid;
    launcher.crash_latest();

    let status = wait_for_status(&sup, Duration::from_secs(5), |s| {
        s.phase == Phase::Running && s.pid != first_pid
    })
    .await;
    assert_eq!(status.restart_count, 1);
    assert_eq!(launcher.launches(), 2);
    assert!(status.diagnostic.unwrap_or_default().contains("exited"));

    assert_eq!(
        drain_phases(&mut events),
        [
            Phase::Starting,
            Phase::Running,
            Phase::Unhealthy,
            Phase::Restarting,
            Phase::Starting,
            Phase::Running,
        ]
    );
    sup.stop().await.unwrap();
}

#[tokio::test]
async fn crash_loop_ends_in_failed() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(Behavior::Listen);
    let (sup, _events) = supervisor(settings(dir.path()), &launcher, free_port());

    sup.start().await.unwrap();
    launcher.set_behavior(Behavior::ExitImmediately(1));
    launcher.crash_latest();

    let status = wait_for_phase(&sup, Phase::Failed, Duration::from_secs(5)).await;
    match status.error {
        Some(ProcessError::CrashLoopExceeded {
            failures,
            max_retries,
            last_diagnostic,
        }) => {
            assert_eq!(failures, 3);
            assert_eq!(max_retries, 2);
            assert!(last_diagnostic.contains("exit code 1"), "{last_diagnostic}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // One initial launch plus max_retries restarts.
    assert_eq!(launcher.launches(), 3);
    assert!(!dir.path().join("client-home").exists());

    sup.stop().await.unwrap();
    assert_eq!(sup.phase(), Phase::Stopped);
    assert_eq!(sup.status().restart_count, 0);
}

#[tokio::test]
async fn concurrent_stops_terminate_once() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(Behavior::Listen);
    let (sup, _events) = supervisor(settings(dir.path()), &launcher, free_port());
    sup.start().await.unwrap();

    let (a, b) = tokio::join!(sup.stop(), sup.stop());
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(launcher.terminations(), 1);
    assert_eq!(sup.phase(), Phase::Stopped);
}

#[tokio::test]
async fn stop_during_restart_backoff_cancels_restart() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(Behavior::Listen);
    let mut s = settings(dir.path());
    s.backoff_base = Duration::from_secs(10);
    s.backoff_max = Duration::from_secs(10);
    let (sup, _events) = supervisor(s, &launcher, free_port());

    sup.start().await.unwrap();
    launcher.crash_latest();
    wait_for_phase(&sup, Phase::Restarting, Duration::from_secs(5)).await;

    tokio::time::timeout(Duration::from_secs(2), sup.stop())
        .await
        .expect("stop must not wait for the backoff")
        .unwrap();
    assert_eq!(sup.phase(), Phase::Stopped);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(launcher.launches(), 1);
    assert_eq!(sup.phase(), Phase::Stopped);
}

#[tokio::test]
async fn stop_queued_behind_start_applies_after_it() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(Behavior::NeverListen);
    let mut s = settings(dir.path());
    s.startup_timeout = Duration::from_millis(400);
    let (sup, mut events) = supervisor(s, &launcher, free_port());

    let starter = sup.clone();
    let start = tokio::spawn(async move { starter.start().await });
    wait_for_phase(&sup, Phase::Starting, Duration::from_secs(1)).await;
    sup.stop().await.unwrap();

    assert!(matches!(
        start.await.unwrap(),
        Err(SupervisorError::Process(ProcessError::StartupTimeout { .. }))
    ));
    assert_eq!(sup.phase(), Phase::Stopped);
    assert_eq!(
        drain_phases(&mut events),
        [Phase::Starting, Phase::Failed, Phase::Stopped]
    );
}

#[tokio::test]
async fn stubborn_engine_is_killed_after_grace_period() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(Behavior::IgnoreTerminate);
    let (sup, _events) = supervisor(settings(dir.path()), &launcher, free_port());
    sup.start().await.unwrap();

    let started = Instant::now();
    sup.stop().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(launcher.terminations(), 1);
    assert!(launcher.latest().has_exited());
    assert_eq!(sup.phase(), Phase::Stopped);
}

#[tokio::test]
async fn restart_counter_clears_once_stable() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(Behavior::Listen);
    let mut s = settings(dir.path());
    s.stable_after = Duration::from_millis(200);
    let (sup, _events) = supervisor(s, &launcher, free_port());

    sup.start().await.unwrap();
    launcher.crash_latest();
    wait_for_status(&sup, Duration::from_secs(5), |s| {
        s.phase == Phase::Running && s.restart_count == 1
    })
    .await;
    wait_for_status(&sup, Duration::from_secs(5), |s| s.restart_count == 0).await;
    assert_eq!(sup.phase(), Phase::Running);
    sup.stop().await.unwrap();
}

#[tokio::test]
async fn status_is_readable_during_transition() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(Behavior::NeverListen);
    let mut s = settings(dir.path());
    s.startup_timeout = Duration::from_millis(400);
    let (sup, _events) = supervisor(s, &launcher, free_port());

    let starter = sup.clone();
    let start = tokio::spawn(async move { starter.start().await });
    wait_for_phase(&sup, Phase::Starting, Duration::from_secs(1)).await;

    // The transition lock is held by start(); status() must not wait for it.
    let t = Instant::now();
    let status = sup.status();
    assert_eq!(status.phase, Phase::Starting);
    assert!(t.elapsed() < Duration::from_millis(50));

    let _ = start.await.unwrap();
    sup.stop().await.unwrap();
}
