/// At-most-once dispatch per (workflow, caller key)
///
/// Maps a caller-supplied idempotency key to the execution it started. While
/// the entry is live, every caller presenting the same key gets the same
/// execution id back instead of starting a new run. Expiry is checked lazily
/// on lookup; the optional reaper only reclaims memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Result of `IdempotencyStore::acquire`
///
/// `Existing` is the documented "already running/ran" path, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// The caller won the slot and owns this new execution id
    New(Uuid),
    /// A live entry already exists for the key
    Existing(Uuid),
}

impl Acquisition {
    pub fn execution_id(self) -> Uuid {
        match self {
            Self::New(id) | Self::Existing(id) => id,
        }
    }

    pub fn already_exists(self) -> bool {
        matches!(self, Self::Existing(_))
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    execution_id: Uuid,
    expires_at: Instant,
}

/// Mutex-guarded key table shared by all coordinators in the process
#[derive(Debug, Default)]
pub struct IdempotencyStore {
    entries: Mutex<HashMap<(String, String), Entry>>,
}

impl IdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, String), Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomic check-and-insert
    ///
    /// Without a key every call is unique and gets a fresh id.
    pub fn acquire(&self, workflow_id: &str, key: Option<&str>, ttl: Duration) -> Acquisition {
        self.acquire_with(workflow_id, key, ttl, |_| {})
    }

    /// Like `acquire`, but runs `on_insert` with the new id while the table
    /// is still locked
    ///
    /// Lets the caller publish state for the new execution before any racing
    /// caller can observe the entry. `on_insert` must not call back into the store.
    pub fn acquire_with<F>(&self, workflow_id: &str, key: Option<&str>, ttl: Duration, on_insert: F) -> Acquisition
    where
        F: FnOnce(Uuid),
    {
        let Some(key) = key else {
            let id = Uuid::new_v4();
            on_insert(id);
            return Acquisition::New(id);
        };

        let now = Instant::now();
        let mut entries = self.lock();
        let slot = (workflow_id.to_string(), key.to_string());

        if let Some(entry) = entries.get(&slot) {
            if entry.expires_at > now {
                tracing::debug!("♻️ Idempotency hit for {}/{} -> {}", workflow_id, key, entry.execution_id);
                return Acquisition::Existing(entry.execution_id);
            }
            tracing::debug!("⌛ Idempotency entry for {}/{} expired, replacing", workflow_id, key);
        }

        let id = Uuid::new_v4();
        entries.insert(slot, Entry { execution_id: id, expires_at: now + ttl });
        on_insert(id);
        Acquisition::New(id)
    }

    /// Drop expired entries; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Periodically purge expired entries until `cancel` fires
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = store.purge_expired();
                        if removed > 0 {
                            tracing::debug!("🧹 Reaped {} expired idempotency entries", removed);
                        }
                    }
                }
            }
        })
    }
}
