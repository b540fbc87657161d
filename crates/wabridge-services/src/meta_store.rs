//! Session metadata — last known status per owner, kept outside the
//! auth-state files.
//!
//! When constructed with a `persist_path`, records are reloaded on startup
//! and written back after every mutation, so `/sessions` still reports
//! owners whose session is not live. Inside a tokio runtime the write runs
//! on the blocking pool and bursts of mutations share one write.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use wabridge_core::{ConnectionStatus, OwnerKey, OwnerType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub owner_id: String,
    pub owner_type: OwnerType,
    pub status: ConnectionStatus,
    #[serde(default)]
    pub phone_number: Option<String>,
    /// Unix seconds.
    pub updated_at: u64,
    #[serde(default)]
    pub last_connected_at: Option<u64>,
}

#[derive(Clone)]
pub struct SessionMetaStore {
    records: Arc<DashMap<OwnerKey, SessionRecord>>,
    persist_path: Arc<Option<PathBuf>>,
    write_lock: Arc<Mutex<()>>,
    write_pending: Arc<AtomicBool>,
}

impl Default for SessionMetaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMetaStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            persist_path: Arc::new(None),
            write_lock: Arc::new(Mutex::new(())),
            write_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a store that persists records to the given file path.
    /// Loads existing records from disk if the file exists.
    pub fn with_persistence(path: PathBuf) -> Self {
        let store = Self {
            records: Arc::new(DashMap::new()),
            persist_path: Arc::new(Some(path)),
            write_lock: Arc::new(Mutex::new(())),
            write_pending: Arc::new(AtomicBool::new(false)),
        };
        store.load_from_disk();
        store
    }

    /// Record a status transition.
    pub fn record(&self, key: &OwnerKey, status: ConnectionStatus, phone_number: Option<&str>) {
        let now = unix_now();
        {
            let mut entry = self
                .records
                .entry(key.clone())
                .or_insert_with(|| SessionRecord {
                    owner_id: key.owner_id().to_string(),
                    owner_type: key.owner_type(),
                    status,
                    phone_number: None,
                    updated_at: now,
                    last_connected_at: None,
                });
            entry.status = status;
            entry.updated_at = now;
            if let Some(phone) = phone_number {
                entry.phone_number = Some(phone.to_string());
            }
            if status == ConnectionStatus::Connected {
                entry.last_connected_at = Some(now);
            }
        }
        self.save_to_disk();
    }

    pub fn get(&self, key: &OwnerKey) -> Option<SessionRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    pub fn remove(&self, key: &OwnerKey) {
        if self.records.remove(key).is_some() {
            self.save_to_disk();
        }
    }

    pub fn list(&self) -> Vec<SessionRecord> {
        let mut all: Vec<SessionRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| (a.owner_type, &a.owner_id).cmp(&(b.owner_type, &b.owner_id)));
        all
    }
}

impl SessionMetaStore {
    /// Write the current records now and wait for the write to finish.
    pub async fn flush(&self) {
        if self.persist_path.is_none() {
            return;
        }
        let store = self.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || store.write_snapshot()).await {
            tracing::warn!(error = %e, "session record flush did not complete");
        }
    }

    /// Schedule a write of all records. At most one scheduled write is
    /// outstanding; it snapshots the records when it runs.
    fn save_to_disk(&self) {
        if self.persist_path.is_none() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                if self.write_pending.swap(true, Ordering::AcqRel) {
                    return;
                }
                let store = self.clone();
                runtime.spawn_blocking(move || {
                    store.write_pending.store(false, Ordering::Release);
                    store.write_snapshot();
                });
            }
            Err(_) => self.write_snapshot(),
        }
    }

    /// Serialize all records to disk as JSON. Best-effort, logs on failure.
    fn write_snapshot(&self) {
        let path = match self.persist_path.as_ref() {
            Some(p) => p,
            None => return,
        };
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.list();
        let json = match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize session records");
                return;
            }
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(error = %e, path = %parent.display(), "failed to create metadata dir");
                return;
            }
        }
        let tmp = path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp, json).and_then(|_| std::fs::rename(&tmp, path)) {
            tracing::warn!(error = %e, path = %path.display(), "failed to persist session records");
        }
    }

    /// Load records from disk. Called once during construction.
    fn load_from_disk(&self) {
        let path = match self.persist_path.as_ref() {
            Some(p) => p,
            None => return,
        };
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to read session records");
                return;
            }
        };
        let records: Vec<SessionRecord> = match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to parse session records");
                return;
            }
        };
        let mut loaded = 0usize;
        for record in records {
            match OwnerKey::new(record.owner_id.clone(), record.owner_type) {
                Ok(key) => {
                    self.records.insert(key, record);
                    loaded += 1;
                }
                Err(e) => tracing::warn!(error = %e, "skipping invalid session record"),
            }
        }
        if loaded > 0 {
            tracing::info!(count = loaded, path = %path.display(), "loaded session records");
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
