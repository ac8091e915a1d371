use crate::mux::SessionTarget;
use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::PathBuf;
use swarmux_core::EngineConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEntry {
    pub name: String,
    pub session: String,
    pub path: PathBuf,
}

impl SocketEntry {
    pub fn target(&self) -> SessionTarget {
        SessionTarget::new(self.name.clone(), self.session.clone())
    }
}

/// Lists the multiplexer server sockets that belong to the orchestrator.
#[derive(Debug, Clone)]
pub struct SocketEnumerator {
    dir: PathBuf,
    prefix: String,
}

impl SocketEnumerator {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.socket_dir.clone(), config.socket_prefix.clone())
    }

    /// Sockets sorted by name. A missing socket directory means no server has
    /// started yet and yields an empty list.
    pub fn list(&self) -> io::Result<Vec<SocketEntry>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let mut sockets = Vec::new();
        for entry in entries.flatten() {
            let is_socket = entry
                .file_type()
                .map(|kind| kind.is_socket())
                .unwrap_or(false);
            if !is_socket {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(session) = name.strip_prefix(&self.prefix) else {
                continue;
            };
            if session.is_empty() {
                continue;
            }
            sockets.push(SocketEntry {
                session: session.to_string(),
                path: entry.path(),
                name,
            });
        }
        sockets.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(sockets)
    }
}
