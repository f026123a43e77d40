//! Persistent deduplication ledgers
//!
//! Three plain-text, append-only files (one entry per line) record completed
//! catalog items, completed sub-items and forwarded file fingerprints. They
//! are loaded into memory sets on startup and never rewritten.

use crate::transport::Media;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

const ITEMS_FILE: &str = "completed_items.txt";
const SUB_ITEMS_FILE: &str = "completed_sub_items.txt";
const FINGERPRINTS_FILE: &str = "forwarded_files.txt";
const ID_PREFIX: &str = "id:";

/// Ledger I/O failure
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Reading or appending failed
    #[error("ledger I/O error at {path}: {source}")]
    Io {
        /// Ledger file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> LedgerError + '_ {
    move |source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Lowercase and strip apostrophes, periods, spaces, commas, hyphens and underscores
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '\'' | '.' | ' ' | ',' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Dedup key of a delivered file
///
/// Either key alone is enough to recognize a repeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    /// Service-wide unique file id
    pub unique_id: Option<String>,
    /// Original file name
    pub file_name: Option<String>,
}

impl FileFingerprint {
    /// Fingerprint of an attachment
    #[must_use]
    pub fn of(media: &Media) -> Self {
        Self {
            unique_id: media.file_unique_id.clone().filter(|id| !id.is_empty()),
            file_name: media.file_name.clone().filter(|name| !name.trim().is_empty()),
        }
    }

    fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.unique_id
            .iter()
            .map(|id| format!("{ID_PREFIX}{id}"))
            .chain(self.file_name.iter().map(|name| normalize_name(name)))
    }

    fn ledger_lines(&self) -> impl Iterator<Item = String> + '_ {
        self.unique_id
            .iter()
            .map(|id| format!("{ID_PREFIX}{id}"))
            .chain(self.file_name.iter().map(|name| name.trim().to_string()))
    }
}

/// Composite key of a sub-item
#[must_use]
pub fn sub_item_key(chat_id: i64, label: &str) -> String {
    format!("{chat_id}|{}", label.trim())
}

fn fingerprint_key(line: &str) -> String {
    if line.starts_with(ID_PREFIX) {
        line.to_string()
    } else {
        normalize_name(line)
    }
}

struct Ledger {
    path: PathBuf,
    entries: RwLock<HashSet<String>>,
    file: Mutex<Option<File>>,
}

impl Ledger {
    async fn load(path: PathBuf, key: fn(&str) -> String) -> Result<Self, LedgerError> {
        let entries = match fs::read_to_string(&path).await {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(key)
                .collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(io_error(&path)(e)),
        };

        debug!(path = %path.display(), entries = entries.len(), "Ledger loaded");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
            file: Mutex::new(None),
        })
    }

    async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains(key)
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Append `line` unless `key` is already present. Returns whether it was new.
    async fn insert(&self, key: String, line: &str) -> Result<bool, LedgerError> {
        let mut entries = self.entries.write().await;
        if entries.contains(&key) {
            return Ok(false);
        }

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(io_error(&self.path))?;
            *guard = Some(file);
        }
        if let Some(file) = guard.as_mut() {
            file.write_all(format!("{line}\n").as_bytes())
                .await
                .map_err(io_error(&self.path))?;
        }

        entries.insert(key);
        Ok(true)
    }

    async fn flush(&self) -> Result<(), LedgerError> {
        if let Some(file) = self.file.lock().await.as_mut() {
            file.flush().await.map_err(io_error(&self.path))?;
            file.sync_data().await.map_err(io_error(&self.path))?;
        }
        Ok(())
    }
}

/// Restart-surviving record of completed work
pub struct DedupStore {
    items: Ledger,
    sub_items: Ledger,
    fingerprints: Ledger,
}

impl std::fmt::Debug for DedupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupStore")
            .field("items", &self.items.path)
            .field("sub_items", &self.sub_items.path)
            .field("fingerprints", &self.fingerprints.path)
            .finish()
    }
}

impl DedupStore {
    /// Load all three ledgers from `dir`, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Io`] if the directory or a ledger cannot be read.
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await.map_err(io_error(dir))?;

        let store = Self {
            items: Ledger::load(dir.join(ITEMS_FILE), str::to_string).await?,
            sub_items: Ledger::load(dir.join(SUB_ITEMS_FILE), str::to_string).await?,
            fingerprints: Ledger::load(dir.join(FINGERPRINTS_FILE), fingerprint_key).await?,
        };

        info!(
            items = store.items.len().await,
            sub_items = store.sub_items.len().await,
            fingerprints = store.fingerprints.len().await,
            "Ledgers loaded"
        );
        Ok(store)
    }

    /// Whether the item with this normalized link is done
    pub async fn is_item_done(&self, url: &str) -> bool {
        self.items.contains(url).await
    }

    /// Mark an item done; repeated calls write nothing
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Io`] if the append fails.
    pub async fn mark_item_done(&self, url: &str) -> Result<(), LedgerError> {
        if self.items.insert(url.to_string(), url).await? {
            info!(item = %url, "Item marked done");
        }
        Ok(())
    }

    /// Whether the sub-item is done
    pub async fn is_sub_item_done(&self, chat_id: i64, label: &str) -> bool {
        self.sub_items.contains(&sub_item_key(chat_id, label)).await
    }

    /// Mark a sub-item done; repeated calls write nothing
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Io`] if the append fails.
    pub async fn mark_sub_item_done(&self, chat_id: i64, label: &str) -> Result<(), LedgerError> {
        let key = sub_item_key(chat_id, label);
        if self.sub_items.insert(key.clone(), &key).await? {
            debug!(sub_item = %key, "Sub-item marked done");
        }
        Ok(())
    }

    /// Whether either key of `fingerprint` was already forwarded
    pub async fn is_known(&self, fingerprint: &FileFingerprint) -> bool {
        for key in fingerprint.keys() {
            if self.fingerprints.contains(&key).await {
                return true;
            }
        }
        false
    }

    /// Record both keys of a forwarded file
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Io`] if the append fails.
    pub async fn record(&self, fingerprint: &FileFingerprint) -> Result<(), LedgerError> {
        for (key, line) in fingerprint.keys().zip(fingerprint.ledger_lines()) {
            self.fingerprints.insert(key, &line).await?;
        }
        Ok(())
    }

    /// Number of completed items
    pub async fn completed_items(&self) -> usize {
        self.items.len().await
    }

    /// Flush every open ledger to disk; safe to call repeatedly
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Io`] if syncing fails.
    pub async fn flush(&self) -> Result<(), LedgerError> {
        self.items.flush().await?;
        self.sub_items.flush().await?;
        self.fingerprints.flush().await
    }
}
