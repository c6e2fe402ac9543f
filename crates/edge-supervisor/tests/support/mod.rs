//! Shared fixtures: an in-process fake engine and fast settings.

#![allow(dead_code)]

use std::io;
use std::net::TcpListener;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use edge_core::{ClientProfile, Credential, DiscoveryRecord, Profile, Protocol, codec};
use edge_supervisor::engine::BoxFuture;
use edge_supervisor::{
    EngineHandle, EngineLauncher, ExitInfo, LaunchSpec, Phase, ProfileSupervisor, SupervisorSettings,
    SupervisorStatus,
};
use tokio::sync::watch;

/// What the next launched fake engine does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Listen on the designated port until stopped.
    Listen,
    /// Stay alive without ever opening the port.
    NeverListen,
    /// Be dead on arrival with this exit code.
    ExitImmediately(i32),
    /// Launch fails as if the binary were missing.
    FailSpawn,
    /// Listen, and ignore terminate requests.
    IgnoreTerminate,
}

/// Shared between the launcher (for test control) and the engine handle.
pub struct FakeControl {
    pub pid: u32,
    listener: Mutex<Option<TcpListener>>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
}

impl FakeControl {
    /// Mark the engine dead and close its port.
    pub fn exit(&self, code: Option<i32>) {
        self.listener.lock().unwrap().take();
        self.exit_tx.send_if_modified(|e| {
            if e.is_none() {
                *e = Some(ExitInfo { code });
                true
            } else {
                false
            }
        });
    }

    pub fn has_exited(&self) -> bool {
        self.exit_tx.borrow().is_some()
    }

    /// Accept and drop queued probe connections so the backlog never fills.
    fn drain(&self) {
        if let Some(listener) = self.listener.lock().unwrap().as_ref() {
            while listener.accept().is_ok() {}
        }
    }
}

pub struct FakeEngine {
    control: Arc<FakeControl>,
    behavior: Behavior,
    terminations: Arc<AtomicU32>,
}

impl EngineHandle for FakeEngine {
    fn pid(&self) -> Option<u32> {
        Some(self.control.pid)
    }

    fn try_exit(&mut self) -> Option<ExitInfo> {
        self.control.drain();
        *self.control.exit_tx.borrow()
    }

    fn terminate(&mut self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        if self.behavior != Behavior::IgnoreTerminate {
            self.control.exit(None);
        }
    }

    fn kill(&mut self) {
        self.control.exit(None);
    }

    fn wait(&mut self) -> BoxFuture<'_, Option<ExitInfo>> {
        let mut rx = self.control.exit_tx.subscribe();
        Box::pin(async move {
            let exit = rx.wait_for(|e| e.is_some()).await.ok().and_then(|e| *e);
            exit
        })
    }
}

pub struct FakeLauncher {
    behavior: Mutex<Behavior>,
    launches: AtomicU32,
    terminations: Arc<AtomicU32>,
    engines: Mutex<Vec<Arc<FakeControl>>>,
    specs: Mutex<Vec<LaunchSpec>>,
}

impl FakeLauncher {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            launches: AtomicU32::new(0),
            terminations: Arc::new(AtomicU32::new(0)),
            engines: Mutex::new(Vec::new()),
            specs: Mutex::new(Vec::new()),
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Launch attempts, including ones that failed to spawn.
    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> u32 {
        self.terminations.load(Ordering::SeqCst)
    }

    pub fn latest(&self) -> Arc<FakeControl> {
        Arc::clone(self.engines.lock().unwrap().last().expect("no engine launched"))
    }

    /// Simulate the most recent engine crashing.
    pub fn crash_latest(&self) {
        self.latest().exit(Some(1));
    }

    pub fn specs(&self) -> Vec<LaunchSpec> {
        self.specs.lock().unwrap().clone()
    }
}

impl EngineLauncher for FakeLauncher {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn EngineHandle>> {
        let n = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        self.specs.lock().unwrap().push(spec.clone());
        assert!(spec.config_path.exists(), "config must be written before launch");

        let behavior = *self.behavior.lock().unwrap();
        let (listener, exit) = match behavior {
            Behavior::FailSpawn => {
                return Err(io::Error::new(io::ErrorKind::NotFound, "fake engine binary missing"));
            }
            Behavior::Listen | Behavior::IgnoreTerminate => {
                let listener = TcpListener::bind(("127.0.0.1", spec.port))?;
                listener.set_nonblocking(true)?;
                (Some(listener), None)
            }
            Behavior::NeverListen => (None, None),
            Behavior::ExitImmediately(code) => (None, Some(ExitInfo { code: Some(code) })),
        };

        let (exit_tx, _) = watch::channel(exit);
        let control = Arc::new(FakeControl {
            pid: 40_000 + n,
            listener: Mutex::new(listener),
            exit_tx,
        });
        self.engines.lock().unwrap().push(Arc::clone(&control));
        Ok(Box::new(FakeEngine {
            control,
            behavior,
            terminations: Arc::clone(&self.terminations),
        }))
    }
}

/// Timings small enough for tests.
pub fn settings(run_dir: &Path) -> SupervisorSettings {
    SupervisorSettings {
        engine_binary: "fake-engine".into(),
        run_dir: run_dir.to_path_buf(),
        startup_timeout: Duration::from_secs(1),
        probe_interval: Duration::from_millis(50),
        probe_timeout: Duration::from_millis(200),
        grace_period: Duration::from_millis(200),
        max_retries: 2,
        backoff_base: Duration::from_millis(20),
        backoff_max: Duration::from_millis(80),
        stable_after: Duration::from_secs(60),
    }
}

pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// A resolved client profile listening on `port`.
pub fn client_profile(name: &str, port: u16) -> Profile {
    let record =
        DiscoveryRecord::new(Credential::generate(), "example.com", Protocol::Vless, 443, "/mcproxy").unwrap();
    let link = codec::encode_link(&record).unwrap();
    ClientProfile::from_link(name, &link, port).unwrap().into()
}

/// Wait until the supervisor reports `phase`, or panic with the last status.
pub async fn wait_for_phase(sup: &ProfileSupervisor, phase: Phase, within: Duration) -> SupervisorStatus {
    wait_for_status(sup, within, |s| s.phase == phase).await
}

pub async fn wait_for_status(
    sup: &ProfileSupervisor,
    within: Duration,
    pred: impl Fn(&SupervisorStatus) -> bool,
) -> SupervisorStatus {
    let mut rx = sup.watch();
    let reached = tokio::time::timeout(within, async {
        let status = rx.wait_for(|s| pred(s)).await.map(|s| s.clone());
        status
    })
    .await;
    match reached {
        Ok(Ok(status)) => status,
        _ => panic!("condition not reached in {within:?}; last status: {:?}", sup.status()),
    }
}
