//! Content-addressed, resumable on-disk cache.
//!
//! Entries live at `<root>/<stage>/<key segments>.json.gz` and hold a gzip'd
//! JSON [`Envelope`]. An entry only becomes visible once its payload has been
//! fully written to a temp file in the same directory and renamed into place,
//! so readers never observe a partial write. While a computation runs, a
//! `.pending` marker sits next to the final path; a marker left behind by a
//! crash is never trusted and the work is redone on the next run.

mod key;

pub use key::CacheKey;

use crate::error::{PipelineError, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::future::Future;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const ENTRY_EXTENSION: &str = "json.gz";
const PENDING_EXTENSION: &str = "pending";
const TEMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Complete,
}

/// On-disk representation of a cache entry.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    stage: String,
    key: String,
    status: EntryStatus,
    payload: T,
}

/// Why a stored entry could not be used. Never leaves this module.
#[derive(Debug)]
enum Corruption {
    Unreadable(std::io::Error),
    Undecodable(serde_json::Error),
    Mismatch(String),
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Corruption::Unreadable(e) => write!(f, "unreadable: {e}"),
            Corruption::Undecodable(e) => write!(f, "undecodable: {e}"),
            Corruption::Mismatch(m) => write!(f, "mismatch: {m}"),
        }
    }
}

/// Shared handle to the cache directory. Cheap to share behind an `Arc`.
pub struct CacheStore {
    root: PathBuf,
    inflight: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl CacheStore {
    /// Opens (creating if needed) a cache rooted at `root`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::CacheUnwritable`] if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| PipelineError::CacheUnwritable {
            path: root.clone(),
            source,
        })?;

        let stale = count_files_with_extension(&root, PENDING_EXTENSION);
        if stale > 0 {
            info!(
                stale,
                root = %root.display(),
                "Found pending entries from an interrupted run; they will be recomputed"
            );
        }

        Ok(Self {
            root,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, stage: &str, key: &CacheKey) -> PathBuf {
        key.to_path(&self.root.join(stage), ENTRY_EXTENSION)
    }

    fn pending_path(&self, stage: &str, key: &CacheKey) -> PathBuf {
        key.to_path(&self.root.join(stage), PENDING_EXTENSION)
    }

    /// Returns the payload of a complete entry, or `None` on a miss.
    ///
    /// Corrupt entries are logged, removed, and reported as a miss.
    pub fn lookup<T: DeserializeOwned>(&self, stage: &str, key: &CacheKey) -> Option<T> {
        let path = self.entry_path(stage, key);
        if !path.exists() {
            return None;
        }

        match read_envelope::<T>(&path, stage, key) {
            Ok(payload) => Some(payload),
            Err(corruption) => {
                warn!(
                    stage,
                    key = %key,
                    path = %path.display(),
                    reason = %corruption,
                    "Cache entry corrupt, recomputing"
                );
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    /// Returns `true` if a complete, readable entry exists.
    pub fn contains(&self, stage: &str, key: &CacheKey) -> bool {
        self.lookup::<serde_json::Value>(stage, key).is_some()
    }

    /// Atomically writes a complete entry, replacing any previous one.
    ///
    /// # Errors
    ///
    /// [`PipelineError::CacheUnwritable`] if the entry cannot be persisted.
    pub fn put<T: Serialize>(&self, stage: &str, key: &CacheKey, payload: &T) -> Result<()> {
        let path = self.entry_path(stage, key);
        let unwritable = |source: std::io::Error| PipelineError::CacheUnwritable {
            path: path.clone(),
            source,
        };

        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(unwritable)?;

        let envelope = Envelope {
            stage: stage.to_string(),
            key: key.to_string(),
            status: EntryStatus::Complete,
            payload,
        };

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer(&mut encoder, &envelope)
            .map_err(|e| unwritable(std::io::Error::other(e)))?;
        let bytes = encoder.finish().map_err(unwritable)?;

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(dir)
            .map_err(unwritable)?;
        temp.write_all(&bytes).map_err(unwritable)?;
        temp.as_file().sync_all().map_err(unwritable)?;
        temp.persist(&path).map_err(|e| unwritable(e.error))?;

        debug!(stage, key = %key, bytes = bytes.len(), "Cache entry written");
        Ok(())
    }

    /// Returns the cached payload for `(stage, key)`, computing and persisting
    /// it first if no complete entry exists.
    ///
    /// `compute` is never called when a complete entry is present. If it
    /// fails, or the returned future is dropped before finishing, nothing is
    /// promoted to complete and the next call computes again. Concurrent
    /// callers for the same key within this process wait for the first one
    /// instead of recomputing.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        stage: &str,
        key: &CacheKey,
        compute: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<PipelineError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let entry_path = self.entry_path(stage, key);
        let lock = self.key_lock(&entry_path);
        let guard = lock.lock().await;

        let result = self.compute_locked(stage, key, compute).await;

        drop(guard);
        self.release_key_lock(&entry_path, lock);
        result
    }

    async fn compute_locked<T, E, F, Fut>(
        &self,
        stage: &str,
        key: &CacheKey,
        compute: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<PipelineError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if let Some(payload) = self.lookup(stage, key) {
            debug!(stage, key = %key, "Cache hit");
            return Ok(payload);
        }

        let pending = self.pending_path(stage, key);
        self.mark_pending(&pending)?;

        match compute().await {
            Ok(payload) => {
                self.put(stage, key, &payload)?;
                let _ = fs::remove_file(&pending);
                Ok(payload)
            }
            Err(e) => {
                let _ = fs::remove_file(&pending);
                Err(e)
            }
        }
    }

    fn mark_pending(&self, pending: &Path) -> Result<()> {
        let unwritable = |source| PipelineError::CacheUnwritable {
            path: pending.to_path_buf(),
            source,
        };
        if let Some(dir) = pending.parent() {
            fs::create_dir_all(dir).map_err(unwritable)?;
        }
        fs::write(pending, b"").map_err(unwritable)
    }

    fn key_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        inflight.entry(path.to_path_buf()).or_default().clone()
    }

    fn release_key_lock(&self, path: &Path, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map and this caller hold it: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            inflight.remove(path);
        }
        drop(lock);
    }

    /// Lists the keys of all complete entries of `stage` under `prefix`,
    /// sorted. Pending markers and temp files are never listed.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from walking the stage directory.
    pub fn keys(&self, stage: &str, prefix: &CacheKey) -> anyhow::Result<Vec<CacheKey>> {
        let stage_dir = self.root.join(stage);
        let start = prefix.to_dir(&stage_dir);
        let mut keys = Vec::new();
        if start.is_dir() {
            collect_keys(&stage_dir, &start, &mut keys)?;
        }
        keys.sort();
        Ok(keys)
    }
}

fn read_envelope<T: DeserializeOwned>(
    path: &Path,
    stage: &str,
    key: &CacheKey,
) -> std::result::Result<T, Corruption> {
    let file = File::open(path).map_err(Corruption::Unreadable)?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let envelope: Envelope<T> = serde_json::from_reader(decoder).map_err(Corruption::Undecodable)?;

    if envelope.status != EntryStatus::Complete {
        return Err(Corruption::Mismatch(format!("status {:?}", envelope.status)));
    }
    if envelope.stage != stage || envelope.key != key.to_string() {
        return Err(Corruption::Mismatch(format!(
            "entry belongs to {}/{}",
            envelope.stage, envelope.key
        )));
    }
    Ok(envelope.payload)
}

fn collect_keys(stage_dir: &Path, dir: &Path, keys: &mut Vec<CacheKey>) -> anyhow::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_keys(stage_dir, &path, keys)?;
            continue;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with(TEMP_PREFIX) {
            continue;
        }
        let Some(stem) = name.strip_suffix(&format!(".{ENTRY_EXTENSION}")) else {
            continue;
        };

        let relative = path.parent().and_then(|p| p.strip_prefix(stage_dir).ok());
        let mut segments: Vec<String> = relative
            .map(|r| {
                r.components()
                    .filter_map(|c| c.as_os_str().to_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        segments.push(stem.to_string());
        keys.push(CacheKey::from_encoded(segments));
    }
    Ok(())
}

fn count_files_with_extension(dir: &Path, extension: &str) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files_with_extension(&path, extension)
            } else if path.extension().and_then(|e| e.to_str()) == Some(extension) {
                1
            } else {
                0
            }
        })
        .sum()
}
