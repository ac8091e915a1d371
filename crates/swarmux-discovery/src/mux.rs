use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// One orchestrator session living on its own multiplexer server socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionTarget {
    pub socket: String,
    pub session: String,
}

impl SessionTarget {
    pub fn new(socket: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            socket: socket.into(),
            session: session.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: String,
    pub index: u32,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },
    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("unexpected {command} output: {detail}")]
    Parse { command: String, detail: String },
    #[error("{command} timed out after {}ms", .timeout.as_millis())]
    Timeout { command: String, timeout: Duration },
    #[error("session {0} not found")]
    NoSession(String),
}

/// Read-side capabilities the discovery pass needs from the multiplexer.
/// Implementations bound each command themselves and report an expired one
/// as `MuxError::Timeout`.
pub trait Multiplexer: Send + Sync {
    fn has_session(&self, target: &SessionTarget) -> bool;

    fn list_windows(&self, target: &SessionTarget) -> Result<Vec<WindowInfo>, MuxError>;

    /// Last `max_lines` lines of the window's primary (agent) pane.
    fn capture_pane(
        &self,
        target: &SessionTarget,
        window_id: &str,
        max_lines: usize,
    ) -> Result<String, MuxError>;

    fn session_working_dir(&self, target: &SessionTarget) -> Result<PathBuf, MuxError>;
}

/// Numeric part of a window id such as `@12`. Ids grow with creation order on
/// a server, which makes them a usable ordering hint.
pub fn window_id_number(window_id: &str) -> Option<u64> {
    window_id
        .trim()
        .trim_start_matches('@')
        .parse::<u64>()
        .ok()
}
