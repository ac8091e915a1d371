use crate::mux::{window_id_number, Multiplexer, SessionTarget};
use crate::sockets::{SocketEntry, SocketEnumerator};
use crate::tmux::TmuxCli;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swarmux_core::{classify_prefix, scrape_pane, EngineConfig, PaneSnapshot, TokenCodec, WindowStatus};
use swarmux_storage::{NameResolver, WorkspaceLayout};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Snapshot of one task window, rebuilt on every pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredTask {
    pub name: String,
    pub session: String,
    /// Display status; legacy warning windows show as waiting.
    pub status: WindowStatus,
    /// Status as decoded from the window name, before folding.
    pub raw_status: WindowStatus,
    pub window_id: String,
    pub preview: String,
    pub current_action: String,
    pub duration: String,
    pub tokens: String,
    pub observed_order: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoverySnapshot {
    pub working: Vec<DiscoveredTask>,
    pub waiting: Vec<DiscoveredTask>,
    pub done: Vec<DiscoveredTask>,
    pub captured_at: DateTime<Utc>,
}

impl DiscoverySnapshot {
    pub fn len(&self) -> usize {
        self.working.len() + self.waiting.len() + self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tasks(&self) -> impl Iterator<Item = &DiscoveredTask> {
        self.working
            .iter()
            .chain(self.waiting.iter())
            .chain(self.done.iter())
    }
}

#[derive(Debug, Clone)]
struct FoundWindow {
    target: SessionTarget,
    window_id: String,
    name: String,
    raw_status: WindowStatus,
    pane: PaneSnapshot,
}

impl FoundWindow {
    fn key(&self) -> (String, String) {
        (self.target.session.clone(), self.window_id.clone())
    }
}

/// Outcome of one socket's window scan.
enum SocketScan {
    Listed(Vec<FoundWindow>),
    /// The session is gone; its windows no longer exist.
    Gone,
    /// Listing failed; what the session holds is unknown this pass.
    Unlisted(String),
}

/// Windows found in one pass, plus sessions whose listing failed.
#[derive(Debug, Default)]
struct PassResult {
    found: Vec<FoundWindow>,
    unlisted: HashSet<String>,
}

/// Remembers when each `(session, window id)` was first seen. The multiplexer
/// exposes no creation time, so first observation stands in for it.
#[derive(Debug, Default)]
struct ObservationLedger {
    next: u64,
    seen: HashMap<(String, String), u64>,
}

impl ObservationLedger {
    /// Assigns orders to `keys` (new keys numbered in slice order). Keys that
    /// were not observed are forgotten unless their session is in `unlisted`.
    fn observe(&mut self, keys: &[(String, String)], unlisted: &HashSet<String>) -> Vec<u64> {
        let mut current = HashMap::with_capacity(keys.len());
        let mut orders = Vec::with_capacity(keys.len());
        for key in keys {
            let order = match self.seen.get(key) {
                Some(order) => *order,
                None => {
                    let order = self.next;
                    self.next += 1;
                    order
                }
            };
            current.insert(key.clone(), order);
            orders.push(order);
        }
        for (key, order) in self.seen.drain() {
            if unlisted.contains(&key.0) {
                current.entry(key).or_insert(order);
            }
        }
        self.seen = current;
        orders
    }
}

/// Reconstructs the state of every task window across all orchestrator
/// servers on the host.
pub struct DiscoveryService {
    config: EngineConfig,
    codec: TokenCodec,
    sockets: SocketEnumerator,
    mux: Arc<dyn Multiplexer>,
    ledger: Mutex<ObservationLedger>,
}

impl DiscoveryService {
    pub fn new(config: EngineConfig, mux: Arc<dyn Multiplexer>) -> Self {
        Self {
            codec: config.codec(),
            sockets: SocketEnumerator::from_config(&config),
            config,
            mux,
            ledger: Mutex::new(ObservationLedger::default()),
        }
    }

    pub fn with_tmux(config: EngineConfig) -> Self {
        let mux = Arc::new(TmuxCli::from_config(&config));
        Self::new(config, mux)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs one pass. Failures on individual sockets or windows only blank
    /// out the affected entries.
    pub async fn discover_all(&self) -> DiscoverySnapshot {
        let pass = self.collect().await;
        self.finish(pass)
    }

    /// Like `discover_all`, but gives up after `deadline`. A cancelled pass
    /// returns `None` and leaves no trace in the observation order.
    pub async fn discover_with_deadline(&self, deadline: Duration) -> Option<DiscoverySnapshot> {
        match tokio::time::timeout(deadline, self.collect()).await {
            Ok(pass) => Some(self.finish(pass)),
            Err(_) => {
                warn!(
                    event = "discovery_deadline_exceeded",
                    deadline_ms = deadline.as_millis() as u64
                );
                None
            }
        }
    }

    async fn collect(&self) -> PassResult {
        let enumerator = self.sockets.clone();
        let sockets = match tokio::task::spawn_blocking(move || enumerator.list()).await {
            Ok(Ok(sockets)) => sockets,
            Ok(Err(err)) => {
                warn!(event = "socket_scan_failed", error = %err);
                return PassResult::default();
            }
            Err(err) => {
                warn!(event = "socket_scan_join_failed", error = %err);
                return PassResult::default();
            }
        };

        let mut scans = JoinSet::new();
        for socket in sockets {
            let mux = Arc::clone(&self.mux);
            let codec = self.codec;
            scans.spawn_blocking(move || scan_socket(mux.as_ref(), codec, &socket));
        }
        let mut pass = PassResult::default();
        while let Some(joined) = scans.join_next().await {
            match joined {
                Ok(SocketScan::Listed(windows)) => pass.found.extend(windows),
                Ok(SocketScan::Gone) => {}
                Ok(SocketScan::Unlisted(session)) => {
                    pass.unlisted.insert(session);
                }
                Err(err) => warn!(event = "socket_worker_failed", error = %err),
            }
        }

        self.capture_working(&mut pass.found).await;
        pass
    }

    /// Scrapes the agent pane of every working task on a bounded pool.
    /// Waiting and done tasks are not captured. A capture that outlives the
    /// command timeout leaves its task's fields empty.
    async fn capture_working(&self, found: &mut [FoundWindow]) {
        let permits = Arc::new(Semaphore::new(self.config.capture_workers.max(1)));
        let max_lines = self.config.capture_lines;
        let command_timeout = self.config.command_timeout;
        let mut captures = JoinSet::new();
        for (slot, window) in found.iter().enumerate() {
            if window.raw_status != WindowStatus::Working {
                continue;
            }
            let permits = Arc::clone(&permits);
            let mux = Arc::clone(&self.mux);
            let target = window.target.clone();
            let window_id = window.window_id.clone();
            captures.spawn(async move {
                let permit = permits.acquire_owned().await.ok();
                // The permit lives as long as the blocking call, even past a timeout.
                let capture = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    mux.capture_pane(&target, &window_id, max_lines)
                });
                (slot, tokio::time::timeout(command_timeout, capture).await)
            });
        }

        while let Some(joined) = captures.join_next().await {
            let (slot, captured) = match joined {
                Ok(result) => result,
                Err(err) => {
                    warn!(event = "capture_worker_failed", error = %err);
                    continue;
                }
            };
            let window = &mut found[slot];
            match captured {
                Ok(Ok(Ok(text))) => window.pane = scrape_pane(&text),
                Ok(Ok(Err(err))) => debug!(
                    event = "pane_capture_failed",
                    session = %window.target.session,
                    window_id = %window.window_id,
                    error = %err
                ),
                Ok(Err(err)) => warn!(
                    event = "pane_capture_join_failed",
                    session = %window.target.session,
                    window_id = %window.window_id,
                    error = %err
                ),
                Err(_) => warn!(
                    event = "pane_capture_timed_out",
                    session = %window.target.session,
                    window_id = %window.window_id,
                    timeout_ms = command_timeout.as_millis() as u64
                ),
            }
        }
    }

    fn finish(&self, pass: PassResult) -> DiscoverySnapshot {
        let PassResult { mut found, unlisted } = pass;
        found.sort_by(|left, right| {
            left.target
                .socket
                .cmp(&right.target.socket)
                .then_with(|| {
                    let left_id = window_id_number(&left.window_id).unwrap_or(u64::MAX);
                    let right_id = window_id_number(&right.window_id).unwrap_or(u64::MAX);
                    left_id.cmp(&right_id)
                })
                .then_with(|| left.window_id.cmp(&right.window_id))
        });
        let keys: Vec<(String, String)> = found.iter().map(FoundWindow::key).collect();
        let orders = {
            let mut ledger = self
                .ledger
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            ledger.observe(&keys, &unlisted)
        };

        let mut tasks: Vec<DiscoveredTask> = found
            .into_iter()
            .zip(orders)
            .map(|(window, observed_order)| DiscoveredTask {
                name: window.name,
                session: window.target.session,
                status: window.raw_status.folded(),
                raw_status: window.raw_status,
                window_id: window.window_id,
                preview: window.pane.preview,
                current_action: window.pane.current_action,
                duration: window.pane.duration,
                tokens: window.pane.tokens,
                observed_order,
            })
            .collect();
        tasks.sort_by_key(|task| task.observed_order);

        let mut snapshot = DiscoverySnapshot {
            working: Vec::new(),
            waiting: Vec::new(),
            done: Vec::new(),
            captured_at: Utc::now(),
        };
        for task in tasks {
            match task.status {
                WindowStatus::Working => snapshot.working.push(task),
                WindowStatus::Done => snapshot.done.push(task),
                WindowStatus::Waiting | WindowStatus::Warning => snapshot.waiting.push(task),
            }
        }
        snapshot
    }
}

fn scan_socket(mux: &dyn Multiplexer, codec: TokenCodec, socket: &SocketEntry) -> SocketScan {
    let target = socket.target();
    // Sockets can outlive their session briefly during teardown.
    if !mux.has_session(&target) {
        debug!(event = "session_missing", socket = %socket.name);
        return SocketScan::Gone;
    }
    let resolver = load_resolver(mux, codec, &target);
    let windows = match mux.list_windows(&target) {
        Ok(windows) => windows,
        Err(err) => {
            warn!(event = "window_list_failed", socket = %socket.name, error = %err);
            return SocketScan::Unlisted(target.session);
        }
    };

    let mut found = Vec::new();
    for window in windows {
        let Some((token, raw_status)) = classify_prefix(&window.name) else {
            continue;
        };
        found.push(FoundWindow {
            target: target.clone(),
            name: resolver.display_name(token),
            raw_status,
            window_id: window.id,
            pane: PaneSnapshot::default(),
        });
    }
    SocketScan::Listed(found)
}

fn load_resolver(mux: &dyn Multiplexer, codec: TokenCodec, target: &SessionTarget) -> NameResolver {
    let workspace = match mux.session_working_dir(target) {
        Ok(workspace) => workspace,
        Err(err) => {
            debug!(event = "workspace_unresolved", session = %target.session, error = %err);
            return NameResolver::empty(codec);
        }
    };
    let layout = WorkspaceLayout::new(workspace);
    match NameResolver::load(&layout, codec) {
        Ok(resolver) => resolver,
        Err(err) => {
            warn!(event = "window_map_unreadable", session = %target.session, error = %err);
            NameResolver::fallback_only(&layout, codec)
        }
    }
}
