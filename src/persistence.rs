//! Durable UI/session state
//!
//! One JSON entry under a fixed key holds the panel's minimized flag, the time
//! of the last announcement refresh and the announcements themselves. Loading
//! merges whatever is stored over hard-coded defaults so older or partial
//! entries still load; every mutation rewrites the whole entry.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constants::storage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("stored state is not valid JSON: {0}")]
    Decode(serde_json::Error),

    #[error("stored state is not a JSON object")]
    NotAnObject,

    #[error("failed to encode state: {0}")]
    Encode(serde_json::Error),
}

/// Operator announcement pulled from the remote feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub message: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub timestamp: String,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub is_minimized: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub announcements: Vec<Announcement>,

    /// Keys written by other versions, carried through saves untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PersistedState {
    /// Shallow-merge a stored JSON object over the defaults. Only invalid JSON
    /// or a non-object payload is an error; a known key holding the wrong
    /// shape falls back to that field's default alone.
    pub fn merge_over_defaults(raw: &str) -> Result<Self, StorageError> {
        let decoded: Value = serde_json::from_str(raw).map_err(StorageError::Decode)?;
        let Value::Object(mut decoded) = decoded else {
            return Err(StorageError::NotAnObject);
        };

        let defaults = Self::default();
        Ok(Self {
            is_minimized: take_field(&mut decoded, "isMinimized", defaults.is_minimized),
            last_update: take_field(&mut decoded, "lastUpdate", defaults.last_update),
            announcements: take_field(&mut decoded, "announcements", defaults.announcements),
            extra: decoded,
        })
    }
}

fn take_field<T: DeserializeOwned>(object: &mut Map<String, Value>, key: &str, default: T) -> T {
    let Some(value) = object.remove(key) else {
        return default;
    };
    serde_json::from_value(value).unwrap_or_else(|e| {
        warn!(key = key, error = %e, "Stored field has the wrong shape, using default");
        default
    })
}

/// Key-value storage the state store persists through
pub trait StateBackend: Send {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// One `<key>.json` file per entry under a directory
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{}", storage::FILE_EXTENSION))
    }
}

impl StateBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.entry_path(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Read { path, source }),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.entry_path(key);
        fs::create_dir_all(&self.dir).map_err(|source| StorageError::Write {
            path: self.dir.clone(),
            source,
        })?;
        fs::write(&path, value).map_err(|source| StorageError::Write { path, source })
    }
}

/// Process-local storage. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Sole owner and writer of [`PersistedState`]
pub struct StateStore {
    backend: Box<dyn StateBackend>,
    state: PersistedState,
}

impl StateStore {
    /// Open the store and load whatever is persisted
    pub fn open(backend: Box<dyn StateBackend>) -> Self {
        let mut store = Self {
            backend,
            state: PersistedState::default(),
        };
        store.state = store.load();
        store
    }

    /// Read the durable entry, merged over defaults. Never fails; problems are
    /// logged and the defaults returned.
    pub fn load(&self) -> PersistedState {
        let raw = match self.backend.read(storage::STATE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = storage::STATE_KEY, "No persisted state, using defaults");
                return PersistedState::default();
            }
            Err(e) => {
                warn!(error = %e, "Failed to load state");
                return PersistedState::default();
            }
        };

        match PersistedState::merge_over_defaults(&raw) {
            Ok(state) => {
                info!(
                    minimized = state.is_minimized,
                    announcements = state.announcements.len(),
                    "Loaded persisted state"
                );
                state
            }
            Err(e) => {
                warn!(error = %e, "Failed to load state");
                PersistedState::default()
            }
        }
    }

    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    /// Write the full state. Best effort: failures are logged, not retried.
    pub fn save(&self) {
        if let Err(e) = self.try_save() {
            warn!(error = %e, "Failed to save state");
        }
    }

    fn try_save(&self) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(&self.state).map_err(StorageError::Encode)?;
        self.backend.write(storage::STATE_KEY, &encoded)
    }

    pub fn toggle_minimized(&mut self) -> bool {
        self.state.is_minimized = !self.state.is_minimized;
        self.save();
        info!(minimized = self.state.is_minimized, "Toggled panel");
        self.state.is_minimized
    }

    pub fn update_announcements(&mut self, announcements: Vec<Announcement>) {
        self.state.announcements = announcements;
        self.state.last_update = Some(Utc::now());
        self.save();
        info!(count = self.state.announcements.len(), "Stored announcements");
    }
}
