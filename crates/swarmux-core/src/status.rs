use serde::{Deserialize, Serialize};
use std::fmt;

pub const WORKING_MARKER: &str = "⚡";
pub const WAITING_MARKER: &str = "💬";
pub const DONE_MARKER: &str = "✅";
/// Older builds flagged stalled tasks with this marker. It is still decoded
/// but never written.
pub const LEGACY_WARNING_MARKER: &str = "⚠️";
/// Marks the scratch window a session opens for creating new tasks.
pub const NEW_SESSION_MARKER: &str = "🆕";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowStatus {
    Working,
    Waiting,
    Done,
    Warning,
}

/// Decode order. The bare warning sign (without the emoji variation selector)
/// comes after the full sequence so the longer prefix is stripped first.
pub const STATUS_PREFIXES: &[(&str, WindowStatus)] = &[
    (WORKING_MARKER, WindowStatus::Working),
    (WAITING_MARKER, WindowStatus::Waiting),
    (DONE_MARKER, WindowStatus::Done),
    (LEGACY_WARNING_MARKER, WindowStatus::Warning),
    ("\u{26a0}", WindowStatus::Warning),
];

impl WindowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowStatus::Working => "working",
            WindowStatus::Waiting => "waiting",
            WindowStatus::Done => "done",
            WindowStatus::Warning => "warning",
        }
    }

    /// Display status: the legacy warning state is shown as waiting.
    pub fn folded(self) -> Self {
        match self {
            WindowStatus::Warning => WindowStatus::Waiting,
            other => other,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, WindowStatus::Warning)
    }

    /// Marker written into new window names.
    pub fn marker(&self) -> &'static str {
        match self.folded() {
            WindowStatus::Working => WORKING_MARKER,
            WindowStatus::Done => DONE_MARKER,
            _ => WAITING_MARKER,
        }
    }
}

impl fmt::Display for WindowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Splits a window name into `(token, raw status)`. Returns `None` for
/// windows that are not task windows, including the new-session window.
pub fn classify_prefix(window_name: &str) -> Option<(&str, WindowStatus)> {
    STATUS_PREFIXES.iter().find_map(|(marker, status)| {
        window_name
            .strip_prefix(marker)
            .map(|token| (token, *status))
    })
}

pub fn window_name(status: WindowStatus, token: &str) -> String {
    format!("{}{token}", status.marker())
}
