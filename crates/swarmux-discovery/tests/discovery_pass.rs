use std::collections::HashMap;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use swarmux_core::status::{
    DONE_MARKER, LEGACY_WARNING_MARKER, NEW_SESSION_MARKER, WAITING_MARKER, WORKING_MARKER,
};
use swarmux_core::{EngineConfig, TokenCodec, WindowStatus};
use swarmux_discovery::{
    DiscoveredTask, DiscoveryService, DiscoverySnapshot, Multiplexer, MuxError, SessionTarget,
    WindowInfo,
};
use swarmux_storage::WorkspaceLayout;
use tempfile::TempDir;

const LIVE_CAPTURE: &str = "\
⏺ Update(src/auth.rs)
  ⎿  Updated src/auth.rs with 4 additions

✻ Patching… (esc to interrupt · 1m 12s · ↓ 3.4k tokens)
";

#[derive(Default, Clone)]
struct FakeSession {
    alive: bool,
    workspace: Option<PathBuf>,
    windows: Vec<WindowInfo>,
    captures: HashMap<String, String>,
    capture_delays: HashMap<String, Duration>,
    list_fails: bool,
}

#[derive(Default)]
struct FakeMux {
    sessions: Mutex<HashMap<String, FakeSession>>,
    captured: Mutex<Vec<String>>,
    capture_delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeMux {
    fn insert(&self, socket: &str, session: FakeSession) {
        self.sessions
            .lock()
            .expect("sessions")
            .insert(socket.to_string(), session);
    }

    fn session(&self, target: &SessionTarget) -> Option<FakeSession> {
        self.sessions
            .lock()
            .expect("sessions")
            .get(&target.socket)
            .cloned()
    }

    fn captured(&self) -> Vec<String> {
        self.captured.lock().expect("captured").clone()
    }

    fn set_list_fails(&self, socket: &str, fails: bool) {
        if let Some(session) = self.sessions.lock().expect("sessions").get_mut(socket) {
            session.list_fails = fails;
        }
    }
}

impl Multiplexer for FakeMux {
    fn has_session(&self, target: &SessionTarget) -> bool {
        self.session(target).map(|s| s.alive).unwrap_or(false)
    }

    fn list_windows(&self, target: &SessionTarget) -> Result<Vec<WindowInfo>, MuxError> {
        match self.session(target) {
            Some(session) if session.list_fails => Err(MuxError::CommandFailed {
                command: "list-windows".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "server busy".to_string(),
            }),
            Some(session) if session.alive => Ok(session.windows),
            _ => Err(MuxError::NoSession(target.session.clone())),
        }
    }

    fn capture_pane(
        &self,
        target: &SessionTarget,
        window_id: &str,
        _max_lines: usize,
    ) -> Result<String, MuxError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = self
            .session(target)
            .and_then(|session| session.capture_delays.get(window_id).copied())
            .or(self.capture_delay);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.captured
            .lock()
            .expect("captured")
            .push(format!("{}:{window_id}", target.session));
        self.session(target)
            .and_then(|session| session.captures.get(window_id).cloned())
            .ok_or_else(|| MuxError::CommandFailed {
                command: "capture-pane".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "can't find pane".to_string(),
            })
    }

    fn session_working_dir(&self, target: &SessionTarget) -> Result<PathBuf, MuxError> {
        self.session(target)
            .and_then(|session| session.workspace)
            .ok_or_else(|| MuxError::NoSession(target.session.clone()))
    }
}

struct Host {
    sockets: TempDir,
    _listeners: Vec<UnixListener>,
}

impl Host {
    fn new(socket_names: &[&str]) -> Self {
        let sockets = tempfile::tempdir().expect("socket dir");
        let listeners = socket_names
            .iter()
            .map(|name| UnixListener::bind(sockets.path().join(name)).expect("bind socket"))
            .collect();
        Self {
            sockets,
            _listeners: listeners,
        }
    }

    fn config(&self) -> EngineConfig {
        EngineConfig {
            socket_dir: self.sockets.path().to_path_buf(),
            ..EngineConfig::default()
        }
    }
}

fn window(id: &str, index: u32, name: String) -> WindowInfo {
    WindowInfo {
        id: id.to_string(),
        index,
        name,
        active: index == 0,
    }
}

fn names(tasks: &[DiscoveredTask]) -> Vec<&str> {
    tasks.iter().map(|task| task.name.as_str()).collect()
}

type Buckets = (Vec<DiscoveredTask>, Vec<DiscoveredTask>, Vec<DiscoveredTask>);

fn without_timestamps(snapshot: &DiscoverySnapshot) -> Buckets {
    (
        snapshot.working.clone(),
        snapshot.waiting.clone(),
        snapshot.done.clone(),
    )
}

fn alpha_workspace() -> TempDir {
    let dir = tempfile::tempdir().expect("workspace");
    let layout = WorkspaceLayout::new(dir.path());
    swarmux_storage::record(&layout, &TokenCodec::default(), "fix-login-bug").expect("record");
    std::fs::create_dir_all(layout.tasks_dir().join("add-retry")).expect("task dir");
    dir
}

fn alpha_session(workspace: &Path) -> FakeSession {
    let codec = TokenCodec::default();
    let mut captures = HashMap::new();
    captures.insert("@3".to_string(), LIVE_CAPTURE.to_string());
    captures.insert("@2".to_string(), "should never be captured".to_string());
    FakeSession {
        alive: true,
        workspace: Some(workspace.to_path_buf()),
        windows: vec![
            window("@0", 0, format!("{NEW_SESSION_MARKER}new")),
            window("@1", 1, "bash".to_string()),
            window("@5", 2, format!("{LEGACY_WARNING_MARKER}legacyTask")),
            window("@3", 3, format!("{WORKING_MARKER}{}", codec.encode("fix-login-bug"))),
            window("@2", 4, format!("{WAITING_MARKER}{}", codec.encode("add-retry"))),
            window("@4", 5, format!("{DONE_MARKER}docs")),
        ],
        captures,
        ..FakeSession::default()
    }
}

#[tokio::test]
async fn pass_buckets_tasks_and_scrapes_only_working_windows() {
    let host = Host::new(&["swarmux-alpha", "default"]);
    let workspace = alpha_workspace();
    let mux = Arc::new(FakeMux::default());
    mux.insert("swarmux-alpha", alpha_session(workspace.path()));
    let service = DiscoveryService::new(host.config(), mux.clone());

    let snapshot = service.discover_all().await;

    assert_eq!(names(&snapshot.working), vec!["fix-login-bug"]);
    let working = &snapshot.working[0];
    assert_eq!(working.session, "alpha");
    assert_eq!(working.window_id, "@3");
    assert_eq!(
        working.current_action,
        "Patching… (esc to interrupt · 1m 12s · ↓ 3.4k tokens)"
    );
    assert_eq!(working.duration, "1m 12s");
    assert_eq!(working.tokens, "↓ 3.4k");
    assert_eq!(working.preview.lines().count(), 3);

    // @2 before @5: window ids order first observation.
    assert_eq!(names(&snapshot.waiting), vec!["add-retry", "legacyTask"]);
    let legacy = &snapshot.waiting[1];
    assert_eq!(legacy.raw_status, WindowStatus::Warning);
    assert_eq!(legacy.status, WindowStatus::Waiting);
    assert!(legacy.preview.is_empty());

    assert_eq!(names(&snapshot.done), vec!["docs"]);
    assert_eq!(snapshot.len(), 4);
    assert_eq!(mux.captured(), vec!["alpha:@3".to_string()]);
}

#[tokio::test]
async fn session_killed_under_socket_is_invisible() {
    let workspace = alpha_workspace();

    let with_dead = Host::new(&["swarmux-alpha", "swarmux-beta"]);
    let mux = Arc::new(FakeMux::default());
    mux.insert("swarmux-alpha", alpha_session(workspace.path()));
    let mut dead = alpha_session(workspace.path());
    dead.alive = false;
    mux.insert("swarmux-beta", dead);
    let dead_snapshot = DiscoveryService::new(with_dead.config(), mux)
        .discover_all()
        .await;

    let without = Host::new(&["swarmux-alpha"]);
    let mux = Arc::new(FakeMux::default());
    mux.insert("swarmux-alpha", alpha_session(workspace.path()));
    let clean_snapshot = DiscoveryService::new(without.config(), mux)
        .discover_all()
        .await;

    assert_eq!(
        without_timestamps(&dead_snapshot),
        without_timestamps(&clean_snapshot)
    );
}

#[tokio::test]
async fn capture_failure_leaves_fields_empty() {
    let host = Host::new(&["swarmux-alpha"]);
    let workspace = alpha_workspace();
    let mut session = alpha_session(workspace.path());
    session.captures.clear();
    let mux = Arc::new(FakeMux::default());
    mux.insert("swarmux-alpha", session);

    let snapshot = DiscoveryService::new(host.config(), mux).discover_all().await;
    assert_eq!(snapshot.working.len(), 1);
    let working = &snapshot.working[0];
    assert_eq!(working.name, "fix-login-bug");
    assert!(working.preview.is_empty());
    assert!(working.current_action.is_empty());
    assert!(working.duration.is_empty());
    assert!(working.tokens.is_empty());
}

#[tokio::test]
async fn corrupt_map_falls_back_to_task_directories() {
    let host = Host::new(&["swarmux-alpha"]);
    let workspace = alpha_workspace();
    let layout = WorkspaceLayout::new(workspace.path());
    std::fs::write(layout.map_path(), "not json").expect("corrupt map");
    let mux = Arc::new(FakeMux::default());
    mux.insert("swarmux-alpha", alpha_session(workspace.path()));

    let snapshot = DiscoveryService::new(host.config(), mux).discover_all().await;
    // Map entry lost: the raw token stands in for the name.
    assert_eq!(names(&snapshot.working), vec!["fixLoginBug"]);
    assert_eq!(snapshot.waiting[0].name, "add-retry");
}

#[tokio::test]
async fn unresolved_workspace_uses_raw_tokens() {
    let host = Host::new(&["swarmux-alpha"]);
    let workspace = alpha_workspace();
    let mut session = alpha_session(workspace.path());
    session.workspace = None;
    let mux = Arc::new(FakeMux::default());
    mux.insert("swarmux-alpha", session);

    let snapshot = DiscoveryService::new(host.config(), mux).discover_all().await;
    assert_eq!(names(&snapshot.working), vec!["fixLoginBug"]);
    assert_eq!(names(&snapshot.waiting), vec!["addRetry", "legacyTask"]);
}

#[tokio::test]
async fn missing_socket_directory_yields_empty_snapshot() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = EngineConfig {
        socket_dir: dir.path().join("tmux-4242"),
        ..EngineConfig::default()
    };
    let snapshot = DiscoveryService::new(config, Arc::new(FakeMux::default()))
        .discover_all()
        .await;
    assert!(snapshot.is_empty());
}

#[tokio::test]
async fn earlier_observed_tasks_stay_first_across_passes() {
    let host = Host::new(&["swarmux-alpha", "swarmux-zeta"]);
    let mux = Arc::new(FakeMux::default());
    mux.insert(
        "swarmux-zeta",
        FakeSession {
            alive: true,
            windows: vec![window("@7", 0, format!("{WAITING_MARKER}zetaTask"))],
            ..FakeSession::default()
        },
    );
    let service = DiscoveryService::new(host.config(), mux.clone());

    let first = service.discover_all().await;
    assert_eq!(names(&first.waiting), vec!["zetaTask"]);

    mux.insert(
        "swarmux-alpha",
        FakeSession {
            alive: true,
            windows: vec![window("@1", 0, format!("{WAITING_MARKER}alphaTask"))],
            ..FakeSession::default()
        },
    );
    let second = service.discover_all().await;
    assert_eq!(names(&second.waiting), vec!["zetaTask", "alphaTask"]);
    assert!(second.waiting[0].observed_order < second.waiting[1].observed_order);
}

#[tokio::test]
async fn cancelled_pass_discards_results() {
    let host = Host::new(&["swarmux-alpha"]);
    let workspace = alpha_workspace();
    let mux = Arc::new(FakeMux {
        capture_delay: Some(Duration::from_millis(300)),
        ..FakeMux::default()
    });
    mux.insert("swarmux-alpha", alpha_session(workspace.path()));
    let service = DiscoveryService::new(host.config(), mux);

    let cancelled = service
        .discover_with_deadline(Duration::from_millis(20))
        .await;
    assert!(cancelled.is_none());

    let snapshot = service
        .discover_with_deadline(Duration::from_secs(10))
        .await
        .expect("pass completes");
    let mut orders: Vec<u64> = snapshot.tasks().map(|task| task.observed_order).collect();
    orders.sort();
    assert_eq!(orders, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn slow_capture_only_blanks_its_own_task() {
    let host = Host::new(&["swarmux-alpha"]);
    let codec = TokenCodec::default();
    let mut session = FakeSession {
        alive: true,
        windows: vec![
            window("@1", 0, format!("{WORKING_MARKER}{}", codec.encode("stuck-task"))),
            window("@2", 1, format!("{WORKING_MARKER}{}", codec.encode("live-task"))),
            window("@3", 2, format!("{WAITING_MARKER}{}", codec.encode("idle-task"))),
        ],
        ..FakeSession::default()
    };
    session.captures.insert("@1".to_string(), LIVE_CAPTURE.to_string());
    session.captures.insert("@2".to_string(), LIVE_CAPTURE.to_string());
    session
        .capture_delays
        .insert("@1".to_string(), Duration::from_millis(800));
    let mux = Arc::new(FakeMux::default());
    mux.insert("swarmux-alpha", session);
    let config = EngineConfig {
        command_timeout: Duration::from_millis(100),
        ..host.config()
    };
    let service = DiscoveryService::new(config, mux);

    let snapshot = service
        .discover_with_deadline(Duration::from_millis(600))
        .await
        .expect("pass completes despite the stalled capture");

    assert_eq!(names(&snapshot.working), vec!["stuckTask", "liveTask"]);
    let stuck = &snapshot.working[0];
    assert!(stuck.preview.is_empty());
    assert!(stuck.duration.is_empty());
    assert_eq!(snapshot.working[1].duration, "1m 12s");
    assert_eq!(names(&snapshot.waiting), vec!["idleTask"]);
}

#[tokio::test]
async fn failed_listing_keeps_tasks_in_their_place() {
    let host = Host::new(&["swarmux-alpha", "swarmux-zeta"]);
    let mux = Arc::new(FakeMux::default());
    mux.insert(
        "swarmux-alpha",
        FakeSession {
            alive: true,
            windows: vec![window("@1", 0, format!("{WAITING_MARKER}alphaOld"))],
            ..FakeSession::default()
        },
    );
    mux.insert(
        "swarmux-zeta",
        FakeSession {
            alive: true,
            windows: vec![window("@1", 0, format!("{WAITING_MARKER}zetaNew"))],
            ..FakeSession::default()
        },
    );
    let service = DiscoveryService::new(host.config(), mux.clone());

    let first = service.discover_all().await;
    assert_eq!(names(&first.waiting), vec!["alphaOld", "zetaNew"]);

    mux.set_list_fails("swarmux-alpha", true);
    let degraded = service.discover_all().await;
    assert_eq!(names(&degraded.waiting), vec!["zetaNew"]);

    mux.set_list_fails("swarmux-alpha", false);
    let recovered = service.discover_all().await;
    assert_eq!(names(&recovered.waiting), vec!["alphaOld", "zetaNew"]);
    assert_eq!(recovered.waiting[0].observed_order, 0);
    assert_eq!(recovered.waiting[1].observed_order, 1);
}

#[tokio::test]
async fn captures_never_exceed_worker_pool() {
    let host = Host::new(&["swarmux-alpha"]);
    let mut session = FakeSession {
        alive: true,
        ..FakeSession::default()
    };
    for id in 1..=6 {
        let window_id = format!("@{id}");
        session.windows.push(window(
            &window_id,
            id,
            format!("{WORKING_MARKER}task{id}"),
        ));
        session
            .captures
            .insert(window_id, LIVE_CAPTURE.to_string());
    }
    let mux = Arc::new(FakeMux {
        capture_delay: Some(Duration::from_millis(50)),
        ..FakeMux::default()
    });
    mux.insert("swarmux-alpha", session);
    let config = EngineConfig {
        capture_workers: 2,
        ..host.config()
    };
    let service = DiscoveryService::new(config, mux.clone());

    let snapshot = service.discover_all().await;

    assert_eq!(snapshot.working.len(), 6);
    assert!(snapshot.working.iter().all(|task| task.duration == "1m 12s"));
    assert_eq!(mux.captured().len(), 6);
    let peak = mux.peak_in_flight.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak captures in flight: {peak}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_passes_agree() {
    let host = Host::new(&["swarmux-alpha"]);
    let workspace = alpha_workspace();
    let mux = Arc::new(FakeMux {
        capture_delay: Some(Duration::from_millis(20)),
        ..FakeMux::default()
    });
    mux.insert("swarmux-alpha", alpha_session(workspace.path()));
    let service = DiscoveryService::new(host.config(), mux);

    let (left, right) = tokio::join!(service.discover_all(), service.discover_all());

    assert_eq!(without_timestamps(&left), without_timestamps(&right));
    assert_eq!(left.len(), 4);
}
