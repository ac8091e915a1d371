use crate::token::{TokenCodec, DEFAULT_MAX_TOKEN_LEN};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SOCKET_PREFIX: &str = "swarmux-";
pub const DEFAULT_CAPTURE_LINES: usize = 50;
pub const DEFAULT_CAPTURE_WORKERS: usize = 4;
pub const DEFAULT_TMUX_BIN: &str = "tmux";
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 2_000;

/// Immutable engine settings shared by the codec, socket scan and discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub socket_prefix: String,
    pub socket_dir: PathBuf,
    pub max_token_len: usize,
    pub capture_lines: usize,
    pub capture_workers: usize,
    pub tmux_bin: PathBuf,
    /// Upper bound for a single multiplexer command.
    pub command_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            socket_prefix: DEFAULT_SOCKET_PREFIX.to_string(),
            socket_dir: PathBuf::from("/tmp").join(format!("tmux-{}", current_uid())),
            max_token_len: DEFAULT_MAX_TOKEN_LEN,
            capture_lines: DEFAULT_CAPTURE_LINES,
            capture_workers: DEFAULT_CAPTURE_WORKERS,
            tmux_bin: PathBuf::from(DEFAULT_TMUX_BIN),
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves settings through `lookup`; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let number = |key: &str, fallback: usize| {
            value(key)
                .and_then(|raw| raw.parse::<usize>().ok())
                .filter(|parsed| *parsed > 0)
                .unwrap_or(fallback)
        };

        let socket_dir = match value("SWARMUX_SOCKET_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let base = value("TMUX_TMPDIR").unwrap_or_else(|| "/tmp".to_string());
                let uid = value("UID")
                    .and_then(|raw| raw.parse::<u32>().ok())
                    .unwrap_or_else(current_uid);
                PathBuf::from(base).join(format!("tmux-{uid}"))
            }
        };

        Self {
            socket_prefix: value("SWARMUX_SOCKET_PREFIX")
                .unwrap_or_else(|| DEFAULT_SOCKET_PREFIX.to_string()),
            socket_dir,
            max_token_len: number("SWARMUX_MAX_TOKEN_LEN", DEFAULT_MAX_TOKEN_LEN),
            capture_lines: number("SWARMUX_CAPTURE_LINES", DEFAULT_CAPTURE_LINES),
            capture_workers: number("SWARMUX_CAPTURE_WORKERS", DEFAULT_CAPTURE_WORKERS),
            tmux_bin: value("SWARMUX_TMUX_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TMUX_BIN)),
            command_timeout: Duration::from_millis(
                number("SWARMUX_COMMAND_TIMEOUT_MS", DEFAULT_COMMAND_TIMEOUT_MS as usize) as u64,
            ),
        }
    }

    pub fn codec(&self) -> TokenCodec {
        TokenCodec::new(self.max_token_len)
    }

    /// Socket (server) name for an orchestrator session.
    pub fn socket_name(&self, session: &str) -> String {
        format!("{}{session}", self.socket_prefix)
    }
}

/// Real uid, the same one tmux puts in its default socket directory name.
#[cfg(unix)]
pub fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
pub fn current_uid() -> u32 {
    0
}
