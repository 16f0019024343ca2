//! Persistence collaborators for compacted stores.
//!
//! The engine only produces and consumes opaque compacted strings keyed by
//! store name. Where they live is up to the host:
//!
//! - [`MemoryBackend`]: a map behind a mutex, for tests and embedding.
//! - [`JsonFileBackend`]: one JSON object file `{ "stores": { name: data } }`,
//!   guarded with fs2 file locks (shared for read, exclusive for write).

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::store::lock_recover;

pub trait PersistenceBackend: Send + Sync {
    /// Compacted data of `name`, or `None` if nothing was saved yet.
    fn read(&self, name: &str) -> Option<String>;

    fn write(&self, name: &str, data: &str) -> Result<(), EngineError>;

    fn remove(&self, name: &str) -> Result<(), EngineError>;

    /// Write several stores at once. Backends with expensive writes override
    /// this to persist the batch in one go.
    fn write_batch(&self, entries: &BTreeMap<String, String>) -> Result<(), EngineError> {
        for (name, data) in entries {
            self.write(name, data)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock_recover(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PersistenceBackend for MemoryBackend {
    fn read(&self, name: &str) -> Option<String> {
        lock_recover(&self.entries).get(name).cloned()
    }

    fn write(&self, name: &str, data: &str) -> Result<(), EngineError> {
        lock_recover(&self.entries).insert(name.to_string(), data.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), EngineError> {
        lock_recover(&self.entries).remove(name);
        Ok(())
    }
}

/// On-disk schema of [`JsonFileBackend`].
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    pub stores: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.exists() => fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

fn parse_state(raw: &str) -> Result<StateFile, serde_json::Error> {
    let cleaned = raw.trim_start_matches('\0');
    if cleaned.trim().is_empty() {
        return Ok(StateFile::default());
    }
    serde_json::from_str(cleaned)
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whole file under a shared lock. A missing file is an empty state; an
    /// unreadable one is logged and treated as empty.
    pub fn load_state(&self) -> StateFile {
        let Ok(mut f) = fs::OpenOptions::new().read(true).open(&self.path) else {
            return StateFile::default();
        };
        let _ = f.lock_shared();
        let mut s = String::new();
        let read = f.read_to_string(&mut s);
        let _ = f.unlock();
        if let Err(e) = read {
            warn!("persistence: failed reading {:?}: {}", self.path, e);
            return StateFile::default();
        }
        parse_state(&s).unwrap_or_else(|e| {
            warn!("persistence: ignoring unparsable {:?}: {}", self.path, e);
            StateFile::default()
        })
    }

    /// Read-modify-write of the state file under an exclusive lock.
    fn update(&self, apply: impl FnOnce(&mut StateFile)) -> Result<(), EngineError> {
        ensure_parent(&self.path)?;
        let mut f = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;
        f.lock_exclusive()?;
        let result = (|| -> Result<(), EngineError> {
            let mut s = String::new();
            f.read_to_string(&mut s)?;
            let mut state = parse_state(&s).unwrap_or_else(|e| {
                warn!("persistence: rewriting unparsable {:?}: {}", self.path, e);
                StateFile::default()
            });
            apply(&mut state);
            let data = serde_json::to_string_pretty(&state)?;
            // Start at the beginning so a shorter file leaves no stale tail.
            f.seek(SeekFrom::Start(0))?;
            f.set_len(0)?;
            f.write_all(data.as_bytes())?;
            f.flush()?;
            f.sync_all()?;
            Ok(())
        })();
        let _ = f.unlock();
        result
    }
}

impl PersistenceBackend for JsonFileBackend {
    fn read(&self, name: &str) -> Option<String> {
        self.load_state().stores.remove(name)
    }

    fn write(&self, name: &str, data: &str) -> Result<(), EngineError> {
        self.update(|state| {
            state.stores.insert(name.to_string(), data.to_string());
        })
    }

    fn remove(&self, name: &str) -> Result<(), EngineError> {
        self.update(|state| {
            state.stores.remove(name);
        })
    }

    fn write_batch(&self, entries: &BTreeMap<String, String>) -> Result<(), EngineError> {
        self.update(|state| {
            for (name, data) in entries {
                state.stores.insert(name.clone(), data.clone());
            }
        })
    }
}
