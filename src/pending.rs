//! Pending request table with per-entry timeouts
//!
//! Each outbound request parks a oneshot sender here until the matching
//! response arrives. Every entry owns an independent timer task; when it fires
//! the entry is removed and the caller sees `REQUEST_TIMEOUT`. A response that
//! arrives after that finds no entry and is dropped by the caller.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::error::RpcError;

/// Default time an outbound request waits for its response
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome delivered to a waiting caller
pub type CallResult = Result<Value, RpcError>;

type Entries<K> = Arc<Mutex<HashMap<K, PendingEntry>>>;

struct PendingEntry {
    seq: u64,
    tx: oneshot::Sender<CallResult>,
    timer: AbortHandle,
}

/// Outstanding requests keyed by correlation key
pub struct PendingRequests<K> {
    entries: Entries<K>,
    timeout: Duration,
    next_seq: AtomicU64,
}

impl<K> PendingRequests<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            timeout,
            next_seq: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Park a new request and start its timer
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the key is already pending
    pub fn register(&self, key: K) -> Result<oneshot::Receiver<CallResult>, RpcError> {
        let mut entries = lock(&self.entries);
        if entries.contains_key(&key) {
            return Err(RpcError::internal(format!(
                "request {key:?} is already pending"
            )));
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let timer = spawn_timer(Arc::clone(&self.entries), key.clone(), seq, self.timeout);
        entries.insert(key, PendingEntry { seq, tx, timer });

        Ok(rx)
    }

    /// Complete a pending request
    ///
    /// Returns true if the key was pending
    pub fn resolve(&self, key: &K, result: CallResult) -> bool {
        let entry = lock(&self.entries).remove(key);
        entry.is_some_and(|entry| {
            entry.timer.abort();
            // Receiver may already be gone if the caller stopped waiting
            let _ = entry.tx.send(result);
            true
        })
    }

    /// Drop a pending request without completing it
    pub fn remove(&self, key: &K) -> bool {
        let entry = lock(&self.entries).remove(key);
        entry.is_some_and(|entry| {
            entry.timer.abort();
            true
        })
    }

    /// Reject every pending request whose key matches
    ///
    /// Returns the number of rejected requests
    pub fn reject_where(&self, matches: impl Fn(&K) -> bool, error: &RpcError) -> usize {
        let rejected: Vec<PendingEntry> = {
            let mut entries = lock(&self.entries);
            let keys: Vec<K> = entries.keys().filter(|k| matches(k)).cloned().collect();
            keys.iter().filter_map(|k| entries.remove(k)).collect()
        };

        let count = rejected.len();
        for entry in rejected {
            entry.timer.abort();
            let _ = entry.tx.send(Err(error.clone()));
        }
        count
    }

    /// Reject every pending request
    pub fn reject_all(&self, error: &RpcError) -> usize {
        self.reject_where(|_| true, error)
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        lock(&self.entries).contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for a registered request to complete
    ///
    /// # Errors
    ///
    /// Returns the rejection, or `PEER_DISCONNECTED` if the entry was dropped
    /// without an outcome
    pub async fn wait(rx: oneshot::Receiver<CallResult>) -> CallResult {
        rx.await
            .unwrap_or_else(|_| Err(RpcError::peer_disconnected("request was abandoned")))
    }
}

impl<K> Drop for PendingRequests<K> {
    fn drop(&mut self) {
        for entry in lock(&self.entries).values() {
            entry.timer.abort();
        }
    }
}

fn spawn_timer<K>(entries: Entries<K>, key: K, seq: u64, timeout: Duration) -> AbortHandle
where
    K: Eq + Hash + Debug + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;

        let expired = {
            let mut map = lock(&entries);
            // Only expire the registration this timer was started for
            if map.get(&key).is_some_and(|e| e.seq == seq) {
                map.remove(&key)
            } else {
                None
            }
        };

        if let Some(entry) = expired {
            tracing::debug!(key = ?key, timeout_ms = timeout.as_millis(), "pending request timed out");
            let _ = entry.tx.send(Err(RpcError::timeout(timeout)));
        }
    })
    .abort_handle()
}

/// Lock a std mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
