//! Token stores
//!
//! Plain key/value storage for the bearer token and the last known role.
//! `MemoryTokenStore` is process-local; `FileTokenStore` survives restarts so
//! a relaunch with a still-valid token reconnects without logging in again,
//! and it notices tokens written to its file from outside the process.

use dashmap::DashMap;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::error::{LiveError, Result};

/// Key holding the bearer token.
pub const TOKEN_KEY: &str = "token";

/// Key holding the role string from the last login or refresh.
pub const ROLE_KEY: &str = "role";

/// Durable key/value storage shared by the channel and the auth flow.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: DashMap<String, String>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// JSON file store.
///
/// The whole map is rewritten on every change through a temporary file and a
/// rename, so a crash never leaves a half-written credential file.
///
/// The file is the source of truth. Reads check its modification time and
/// size and reload when either moved, so a token dropped in by another
/// process (or by hand) is picked up by the next `get`.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    cache: RwLock<Cached>,
}

#[derive(Debug, Default)]
struct Cached {
    entries: HashMap<String, String>,
    stamp: Option<FileStamp>,
}

/// What the cache was loaded from; `None` means the file did not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

fn file_stamp(path: &Path) -> Option<FileStamp> {
    let meta = std::fs::metadata(path).ok()?;
    Some(FileStamp {
        modified: meta.modified().ok()?,
        len: meta.len(),
    })
}

fn read_entries(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };
    if raw.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(serde_json::from_slice(&raw)?)
}

fn poisoned<T>(_: T) -> LiveError {
    LiveError::Store("token store lock poisoned".into())
}

impl FileTokenStore {
    /// Open the store at `path`, loading existing entries if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let stamp = file_stamp(&path);
        let entries = read_entries(&path)?;

        debug!(path = %path.display(), entries = entries.len(), "Opened token store");

        Ok(Self {
            path,
            cache: RwLock::new(Cached { entries, stamp }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload the cache if the file changed since it was last read or
    /// written. An unreadable file keeps the previous entries and is retried
    /// on the next call.
    fn reload_if_changed(&self) {
        let current = file_stamp(&self.path);
        match self.cache.read() {
            Ok(cache) if cache.stamp == current => return,
            Ok(_) => {}
            Err(_) => return,
        }

        let Ok(mut cache) = self.cache.write() else {
            return;
        };
        if cache.stamp == current {
            return;
        }
        match read_entries(&self.path) {
            Ok(entries) => {
                debug!(
                    path = %self.path.display(),
                    entries = entries.len(),
                    "Token file changed on disk, reloaded"
                );
                cache.entries = entries;
                cache.stamp = current;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable token file");
            }
        }
    }

    /// Apply `change` to a copy of the entries, write the copy, and only then
    /// make it current. `change` returns `false` when nothing changed.
    fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut HashMap<String, String>) -> bool,
    {
        self.reload_if_changed();

        let mut cache = self.cache.write().map_err(poisoned)?;
        let mut next = cache.entries.clone();
        if !change(&mut next) {
            return Ok(());
        }

        self.persist(&next)?;
        cache.entries = next;
        cache.stamp = file_stamp(&self.path);
        Ok(())
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        self.reload_if_changed();
        self.cache
            .read()
            .ok()
            .and_then(|cache| cache.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|entries| entries.remove(key).is_some())
    }
}
