//! Session registry — the single owner→session table.
//!
//! Injectable, not global: every component that needs it gets a clone.
//! Mutations for one owner are serialized through a per-key async mutex so a
//! second initialize waits for the first instead of racing it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use wabridge_core::OwnerKey;

use crate::session::SessionHandle;

#[derive(Clone, Default)]
pub struct SessionRegistry {
    entries: Arc<DashMap<OwnerKey, SessionHandle>>,
    locks: Arc<DashMap<OwnerKey, Arc<Mutex<()>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access to one owner's entry for the guard's lifetime.
    pub async fn lock(&self, key: &OwnerKey) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        lock.lock_owned().await
    }

    /// Forget the owner's lock once nobody holds or waits on it and the
    /// owner has no entry. Call after dropping the guard.
    pub fn release(&self, key: &OwnerKey) {
        self.locks.remove_if(key, |_, lock| {
            Arc::strong_count(lock) == 1 && !self.entries.contains_key(key)
        });
    }

    /// Owners with a lock currently tracked.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    pub fn get(&self, key: &OwnerKey) -> Option<SessionHandle> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Insert or replace. The previous handle is returned so the caller can
    /// stop it; the registry never holds two handles for one owner.
    pub fn upsert(&self, key: OwnerKey, handle: SessionHandle) -> Option<SessionHandle> {
        self.entries.insert(key, handle)
    }

    /// Drop the entry. Auth state is untouched; purging is explicit.
    pub fn remove(&self, key: &OwnerKey) -> Option<SessionHandle> {
        self.entries.remove(key).map(|(_, handle)| handle)
    }

    pub fn list(&self) -> Vec<SessionHandle> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sessions not in a terminal state.
    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.value().is_active()).count()
    }

    /// Remove failed/closed entries idle for longer than `max_age`.
    pub fn remove_terminal_older_than(&self, max_age: Duration) -> usize {
        let mut removed = Vec::new();
        self.entries.retain(|key, handle| {
            let snap = handle.snapshot();
            let stale = snap.status.is_terminal() && snap.last_activity_at.elapsed() > max_age;
            if stale {
                removed.push(key.clone());
            }
            !stale
        });
        for key in &removed {
            self.release(key);
        }
        removed.len()
    }
}
