//! Config store (`cfgdb`): a `cfg` key-value dictionary and the `cmd_history` collection.
//!
//! Both live in one JSON document on disk (`cfgdb.json`). The server and one-shot CLI commands
//! open the same file from different processes, so every operation re-reads the document under
//! an advisory lock on `cfgdb.json.lock` (shared for reads, exclusive for changes) and changes
//! are written back with tmp+rename before the lock is released. [`CfgDb::in_memory`] gives the
//! same behaviour without a file.

use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::command::CommandRunResult;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Key-value settings (`cfgdb.dict.cfg`).
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// Insertion-ordered command history (`cfgdb.collection.cmd_history`).
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a record; returns the store-assigned id.
    async fn insert(&self, result: &CommandRunResult) -> Result<String, StoreError>;
    /// All records, oldest first.
    async fn all(&self) -> Result<Vec<HistoryEntry>, StoreError>;
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
    async fn clear(&self) -> Result<(), StoreError>;
}

/// One persisted history record: store id plus the run result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub result: CommandRunResult,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    cfg: serde_json::Map<String, Value>,
    #[serde(default)]
    cmd_history: Vec<HistoryEntry>,
}

enum Backing {
    File(PathBuf),
    Memory(Mutex<Document>),
}

/// JSON-document store implementing both [`ConfigStore`] and [`HistoryStore`].
pub struct CfgDb {
    backing: Backing,
}

impl CfgDb {
    /// Open the store at `path`. Nothing is read until the first operation; a missing file
    /// reads as empty.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        Self {
            backing: Backing::File(path.as_ref().to_path_buf()),
        }
    }

    /// Store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            backing: Backing::Memory(Mutex::new(Document::default())),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File(path) => Some(path),
            Backing::Memory(_) => None,
        }
    }

    /// Read the current document.
    async fn read<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Document) -> R + Send + 'static,
        R: Send + 'static,
    {
        match &self.backing {
            Backing::Memory(doc) => Ok(f(&doc.lock().unwrap_or_else(|e| e.into_inner()))),
            Backing::File(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || read_locked(&path).map(|doc| f(&doc))).await?
            }
        }
    }

    /// Apply `f` to the current document and persist the result, holding the lock throughout.
    /// Nothing is written when `f` fails.
    async fn update<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Document) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        match &self.backing {
            Backing::Memory(doc) => f(&mut doc.lock().unwrap_or_else(|e| e.into_inner())),
            Backing::File(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || update_locked(&path, f)).await?
            }
        }
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn open_lock(path: &Path) -> Result<File, StoreError> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path(path))?)
}

fn read_locked(path: &Path) -> Result<Document, StoreError> {
    if !path.exists() {
        return Ok(Document::default());
    }
    let lock = open_lock(path)?;
    FileExt::lock_shared(&lock)?;
    let doc = match std::fs::read_to_string(path) {
        Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
            log::warn!("config store {} is invalid, reading as empty: {}", path.display(), e);
            Document::default()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
        Err(e) => return Err(e.into()),
    };
    FileExt::unlock(&lock)?;
    Ok(doc)
}

fn update_locked<R, F>(path: &Path, f: F) -> Result<R, StoreError>
where
    F: FnOnce(&mut Document) -> Result<R, StoreError>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let lock = open_lock(path)?;
    FileExt::lock_exclusive(&lock)?;
    let mut doc = match std::fs::read_to_string(path) {
        Ok(s) => match serde_json::from_str(&s) {
            Ok(doc) => doc,
            Err(e) => {
                let aside = quarantine(path)?;
                log::error!(
                    "config store {} is invalid ({}); moved it to {} and starting empty",
                    path.display(),
                    e,
                    aside.display()
                );
                Document::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
        Err(e) => return Err(e.into()),
    };
    let out = f(&mut doc)?;
    let json = serde_json::to_string_pretty(&doc)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    FileExt::unlock(&lock)?;
    Ok(out)
}

/// Move an unreadable store file aside so it is not overwritten.
fn quarantine(path: &Path) -> Result<PathBuf, StoreError> {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(
        ".corrupt-{}",
        chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
    ));
    let aside = PathBuf::from(name);
    std::fs::rename(path, &aside)?;
    Ok(aside)
}

#[async_trait]
impl ConfigStore for CfgDb {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let key = key.to_string();
        self.read(move |doc| doc.cfg.get(&key).cloned()).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let key = key.to_string();
        self.update(move |doc| {
            doc.cfg.insert(key, value);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl HistoryStore for CfgDb {
    async fn insert(&self, result: &CommandRunResult) -> Result<String, StoreError> {
        let entry = HistoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            result: result.clone(),
        };
        self.update(move |doc| {
            let id = entry.id.clone();
            doc.cmd_history.push(entry);
            Ok(id)
        })
        .await
    }

    async fn all(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        self.read(|doc| doc.cmd_history.clone()).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.update(move |doc| {
            let before = doc.cmd_history.len();
            doc.cmd_history.retain(|e| e.id != id);
            if doc.cmd_history.len() == before {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.update(|doc| {
            doc.cmd_history.clear();
            Ok(())
        })
        .await
    }
}

/// Non-blank string from a stored value, kept exactly as stored. Used for secrets.
pub fn secret_value(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Non-empty trimmed string from a stored value.
pub fn string_value(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Boolean from a stored value; accepts JSON booleans and "true"/"false" strings.
pub fn bool_value(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
