//! Persisted task records.
//!
//! The engine never reads these records: resume is driven by the bytes
//! already on disk. Records exist so that callers (the CLI, a UI) can show
//! what happened to each URL. [`persist_transitions`] bridges the two by
//! writing one record update per observed status change.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use segfetch::store::{persist_transitions, JsonTaskStore, TaskStore};
//!
//! let store: Arc<dyn TaskStore> = Arc::new(JsonTaskStore::new("/tmp/tasks.json"));
//! let watcher = tokio::spawn(persist_transitions(engine.status(), store, request.clone()));
//! engine.start(request).await;
//! let last = watcher.await??;
//! ```

use std::collections::BTreeMap;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::download::{DownloadRequest, DownloadStatus};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from reading or writing task records.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on task store {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid task store {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Last known state of one download, keyed by URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub url: String,
    pub file_name: String,
    pub save_path: PathBuf,
    /// Total size in bytes, `-1` when unknown.
    pub total_bytes: i64,
    pub downloaded_bytes: u64,
    /// Status tag, see [`DownloadStatus::tag`].
    pub status: String,
    /// Fraction complete in `[0.0, 1.0]`.
    pub progress: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Fresh record for a request that has not started.
    pub fn new(request: &DownloadRequest) -> Self {
        Self {
            url: request.url.clone(),
            file_name: request.file_name.clone(),
            save_path: request.destination(),
            total_bytes: -1,
            downloaded_bytes: 0,
            status: DownloadStatus::Idle.tag().to_string(),
            progress: 0.0,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Fold a status into the record.
    ///
    /// Byte counts are only carried by `Downloading`; other statuses keep
    /// the last known counts. `Success` fills them in from the file on disk.
    pub fn apply(&mut self, status: &DownloadStatus) {
        self.status = status.tag().to_string();
        self.updated_at = Utc::now();

        match status {
            DownloadStatus::Downloading {
                progress,
                downloaded_bytes,
                total_bytes,
                ..
            } => {
                self.progress = *progress;
                self.downloaded_bytes = *downloaded_bytes;
                self.total_bytes = i64::try_from(*total_bytes).unwrap_or(i64::MAX);
                self.error = None;
            }
            DownloadStatus::Paused {
                downloaded_bytes,
                total_bytes,
            } => {
                self.downloaded_bytes = *downloaded_bytes;
                self.total_bytes = i64::try_from(*total_bytes).unwrap_or(i64::MAX);
            }
            DownloadStatus::Success { file } => {
                if let Ok(metadata) = std::fs::metadata(file) {
                    self.downloaded_bytes = metadata.len();
                    self.total_bytes = i64::try_from(metadata.len()).unwrap_or(i64::MAX);
                }
                self.progress = 1.0;
                self.error = None;
            }
            DownloadStatus::Error { message, .. } => {
                self.error = Some(message.clone());
            }
            DownloadStatus::Pending => {
                self.error = None;
            }
            DownloadStatus::Idle => {}
        }
    }

    /// Record for `request` after applying `status`.
    pub fn from_status(request: &DownloadRequest, status: &DownloadStatus) -> Self {
        let mut record = Self::new(request);
        record.apply(status);
        record
    }
}

/// Storage for task records.
pub trait TaskStore: Send + Sync {
    /// Insert or replace the record for `record.url`.
    fn upsert(&self, record: &TaskRecord) -> StoreResult<()>;

    /// Record for a URL, if any.
    fn get(&self, url: &str) -> StoreResult<Option<TaskRecord>>;

    /// All records, ordered by URL.
    fn list(&self) -> StoreResult<Vec<TaskRecord>>;

    /// Remove a record. Returns whether it existed.
    fn remove(&self, url: &str) -> StoreResult<bool>;
}

/// In-process store, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    records: Mutex<BTreeMap<String, TaskRecord>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryTaskStore {
    fn upsert(&self, record: &TaskRecord) -> StoreResult<()> {
        self.records
            .lock()
            .insert(record.url.clone(), record.clone());
        Ok(())
    }

    fn get(&self, url: &str) -> StoreResult<Option<TaskRecord>> {
        Ok(self.records.lock().get(url).cloned())
    }

    fn list(&self) -> StoreResult<Vec<TaskRecord>> {
        Ok(self.records.lock().values().cloned().collect())
    }

    fn remove(&self, url: &str) -> StoreResult<bool> {
        Ok(self.records.lock().remove(url).is_some())
    }
}

/// Store backed by a single JSON document mapping URL to record.
///
/// Every write rewrites the whole document through a temporary file and a
/// rename, so readers never observe a half-written store.
#[derive(Debug)]
pub struct JsonTaskStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonTaskStore {
    /// Open a store at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StoreResult<BTreeMap<String, TaskRecord>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_reader(BufReader::new(file)).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, records: &BTreeMap<String, TaskRecord>) -> StoreResult<()> {
        let io_err = |source: io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let file = std::fs::File::create(&temp_path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, records).map_err(|source| StoreError::Json {
            path: temp_path.clone(),
            source,
        })?;
        writer.flush().map_err(io_err)?;
        drop(writer);

        std::fs::rename(&temp_path, &self.path).map_err(io_err)
    }

    fn modify<F, T>(&self, change: F) -> StoreResult<T>
    where
        F: FnOnce(&mut BTreeMap<String, TaskRecord>) -> T,
    {
        let _guard = self.write_lock.lock();
        let mut records = self.load()?;
        let result = change(&mut records);
        self.save(&records)?;
        Ok(result)
    }
}

impl TaskStore for JsonTaskStore {
    fn upsert(&self, record: &TaskRecord) -> StoreResult<()> {
        self.modify(|records| {
            records.insert(record.url.clone(), record.clone());
        })
    }

    fn get(&self, url: &str) -> StoreResult<Option<TaskRecord>> {
        Ok(self.load()?.remove(url))
    }

    fn list(&self) -> StoreResult<Vec<TaskRecord>> {
        Ok(self.load()?.into_values().collect())
    }

    fn remove(&self, url: &str) -> StoreResult<bool> {
        self.modify(|records| records.remove(url).is_some())
    }
}

/// Write a record update for every status change of one attempt.
///
/// Only changes published after `status` was subscribed are written.
/// Returns the last record written once a terminal status or `Idle` is
/// observed, or when the engine goes away. Store failures are logged and do
/// not stop the loop.
///
/// Store calls run on the blocking pool, so a slow disk never stalls the
/// runtime driving the download.
pub async fn persist_transitions(
    mut status: watch::Receiver<DownloadStatus>,
    store: Arc<dyn TaskStore>,
    request: DownloadRequest,
) -> StoreResult<Option<TaskRecord>> {
    let lookup = {
        let store = Arc::clone(&store);
        let url = request.url.clone();
        tokio::task::spawn_blocking(move || store.get(&url)).await
    };
    let mut record = match lookup {
        Ok(Ok(Some(existing))) => existing,
        Ok(Ok(None)) => TaskRecord::new(&request),
        Ok(Err(e)) => {
            warn!(url = %request.url, error = %e, "Could not read task record");
            TaskRecord::new(&request)
        }
        Err(e) => {
            warn!(url = %request.url, error = %e, "Task record lookup did not finish");
            TaskRecord::new(&request)
        }
    };
    record.file_name = request.file_name.clone();
    record.save_path = request.destination();

    let mut last = None;

    while status.changed().await.is_ok() {
        let current = status.borrow_and_update().clone();
        record.apply(&current);

        let snapshot = record.clone();
        let writer = Arc::clone(&store);
        match tokio::task::spawn_blocking(move || writer.upsert(&snapshot)).await {
            Ok(Ok(())) => {
                debug!(url = %record.url, status = %record.status, "Task record updated");
                last = Some(record.clone());
            }
            Ok(Err(e)) => warn!(url = %record.url, error = %e, "Could not persist task record"),
            Err(e) => warn!(url = %record.url, error = %e, "Task record write did not finish"),
        }

        if current.is_terminal() || current == DownloadStatus::Idle {
            break;
        }
    }

    Ok(last)
}
