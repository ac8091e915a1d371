use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use swarmux_core::TokenCodec;
use thiserror::Error;

pub const STATE_DIR: &str = ".swarmux";
pub const MAP_FILE: &str = "window-names.json";
pub const LOCK_FILE: &str = "window-names.lock";
pub const TASKS_DIR: &str = "worktrees";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt window-name map {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Where a workspace keeps its orchestrator state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn map_path(&self) -> PathBuf {
        self.state_dir().join(MAP_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    /// One directory per task, named by the full task name.
    pub fn tasks_dir(&self) -> PathBuf {
        self.state_dir().join(TASKS_DIR)
    }
}

/// Window token -> full task name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowNameMap {
    entries: BTreeMap<String, String>,
}

impl WindowNameMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.entries.get(token).map(String::as_str)
    }

    pub fn insert(&mut self, token: impl Into<String>, name: impl Into<String>) {
        self.entries.insert(token.into(), name.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(token, name)| (token.as_str(), name.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(String::as_str)
    }

    /// Adds entries from `fallback` whose token is not already mapped.
    pub fn merge_fallback(&mut self, fallback: &WindowNameMap) {
        for (token, name) in fallback.iter() {
            self.entries
                .entry(token.to_string())
                .or_insert_with(|| name.to_string());
        }
    }
}

/// Reads the persisted map. A missing file is an empty map; an unreadable or
/// malformed file is an error.
pub fn load(layout: &WorkspaceLayout) -> Result<WindowNameMap, StorageError> {
    let path = layout.map_path();
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(WindowNameMap::new()),
        Err(err) => return Err(StorageError::io(&path, err)),
    };
    serde_json::from_str(&content).map_err(|source| StorageError::Corrupt { path, source })
}

pub fn save(layout: &WorkspaceLayout, map: &WindowNameMap) -> Result<(), StorageError> {
    let path = layout.map_path();
    let state_dir = layout.state_dir();
    fs::create_dir_all(&state_dir).map_err(|err| StorageError::io(&state_dir, err))?;
    let payload = serde_json::to_string_pretty(map)
        .map_err(|err| StorageError::Serialization(err.to_string()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, payload).map_err(|err| StorageError::io(&tmp_path, err))?;
    fs::rename(&tmp_path, &path).map_err(|err| StorageError::io(&path, err))?;
    Ok(())
}

/// Records `task_name` under its current token and returns the token.
/// Called whenever a task window is created or renamed.
pub fn record(
    layout: &WorkspaceLayout,
    codec: &TokenCodec,
    task_name: &str,
) -> Result<String, StorageError> {
    let token = codec.encode(task_name);
    let _lock = MapLock::acquire(layout)?;
    let mut map = load(layout)?;
    map.insert(token.clone(), task_name);
    save(layout, &map)?;
    Ok(token)
}

/// Derives tokens for every task directory so windows created before the map
/// existed (or by another orchestrator sharing the workspace) still resolve.
pub fn build_fallback(layout: &WorkspaceLayout, codec: &TokenCodec) -> WindowNameMap {
    let mut map = WindowNameMap::new();
    let entries = match fs::read_dir(layout.tasks_dir()) {
        Ok(entries) => entries,
        Err(_) => return map,
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    for name in names {
        for token in [codec.encode(&name), codec.legacy_token(&name)] {
            map.entries.entry(token).or_insert_with(|| name.clone());
        }
    }
    map
}

/// Resolves window tokens to full task names: persisted map, then directory
/// fallback, then a generation-aware scan over every known name.
#[derive(Debug, Clone, Default)]
pub struct NameResolver {
    codec: TokenCodec,
    persisted: WindowNameMap,
    fallback: WindowNameMap,
}

impl NameResolver {
    pub fn new(codec: TokenCodec, persisted: WindowNameMap, fallback: WindowNameMap) -> Self {
        Self {
            codec,
            persisted,
            fallback,
        }
    }

    pub fn load(layout: &WorkspaceLayout, codec: TokenCodec) -> Result<Self, StorageError> {
        let persisted = load(layout)?;
        let fallback = build_fallback(layout, &codec);
        Ok(Self::new(codec, persisted, fallback))
    }

    pub fn fallback_only(layout: &WorkspaceLayout, codec: TokenCodec) -> Self {
        let fallback = build_fallback(layout, &codec);
        Self::new(codec, WindowNameMap::new(), fallback)
    }

    pub fn empty(codec: TokenCodec) -> Self {
        Self::new(codec, WindowNameMap::new(), WindowNameMap::new())
    }

    pub fn resolve(&self, token: &str) -> Option<&str> {
        self.persisted
            .get(token)
            .or_else(|| self.fallback.get(token))
            .or_else(|| {
                self.persisted
                    .names()
                    .chain(self.fallback.names())
                    .find(|name| self.codec.matches(token, name))
            })
    }

    /// Full task name if known, otherwise the token itself.
    pub fn display_name(&self, token: &str) -> String {
        self.resolve(token).unwrap_or(token).to_string()
    }

    /// Persisted entries with fallback entries filling the gaps.
    pub fn merged(&self) -> WindowNameMap {
        let mut merged = self.persisted.clone();
        merged.merge_fallback(&self.fallback);
        merged
    }
}

struct MapLock {
    file: File,
}

impl MapLock {
    fn acquire(layout: &WorkspaceLayout) -> Result<Self, StorageError> {
        let state_dir = layout.state_dir();
        fs::create_dir_all(&state_dir).map_err(|err| StorageError::io(&state_dir, err))?;
        let path = layout.lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| StorageError::io(&path, err))?;
        file.lock_exclusive()
            .map_err(|err| StorageError::io(&path, err))?;
        Ok(Self { file })
    }
}

impl Drop for MapLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
