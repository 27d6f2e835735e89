//! Pending correlation registry
//!
//! Holds one entry per caller flow that is waiting for a transaction to start.
//! Each entry carries the business key a notification is matched on
//! (charge box, id tag, optional connector) and a settle-once cell that hands
//! the transaction id to the waiting flow.
//!
//! The map lock is only held for the duration of a single operation and never
//! across an `.await`, so flows never serialize on each other while waiting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::WaitError;
use crate::types::{ConnectorId, RemoteStartParams, TransactionId, TransactionStarted, WaitKey};

/// A flow waiting for its transaction to start
#[derive(Debug)]
pub struct PendingTransaction {
    charge_box_id: String,
    id_tag: String,
    connector_id: Option<ConnectorId>,
    settle: Mutex<Option<oneshot::Sender<TransactionId>>>,
}

impl PendingTransaction {
    /// Create an entry and the receiver its owning flow awaits
    pub fn new(params: &RemoteStartParams) -> (Arc<Self>, oneshot::Receiver<TransactionId>) {
        let (tx, rx) = oneshot::channel();
        let pending = Arc::new(Self {
            charge_box_id: params.charge_box_id.clone(),
            id_tag: params.id_tag.clone(),
            connector_id: params.connector_id,
            settle: Mutex::new(Some(tx)),
        });
        (pending, rx)
    }

    pub fn charge_box_id(&self) -> &str {
        &self.charge_box_id
    }

    pub fn id_tag(&self) -> &str {
        &self.id_tag
    }

    pub fn connector_id(&self) -> Option<ConnectorId> {
        self.connector_id
    }

    /// Business-key match against a transaction-started notification
    ///
    /// An entry without a connector matches any connector of its charge box.
    pub fn matches(&self, event: &TransactionStarted) -> bool {
        self.charge_box_id == event.charge_box_id
            && self.id_tag == event.id_tag
            && match self.connector_id {
                None => true,
                Some(connector) => event.connector_id == Some(connector),
            }
    }

    /// Settle with a transaction id. Returns false if already settled.
    ///
    /// A receiver that went away still counts as settled.
    pub fn complete(&self, transaction_id: TransactionId) -> bool {
        match self.settle.lock().take() {
            Some(tx) => {
                let _ = tx.send(transaction_id);
                true
            }
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settle.lock().is_none()
    }
}

/// Concurrent table of pending correlations
#[derive(Debug, Default)]
pub struct PendingRegistry {
    entries: Mutex<HashMap<WaitKey, Arc<PendingTransaction>>>,
    next_placeholder: AtomicU64,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a placeholder key no other flow will receive
    pub fn next_placeholder(&self) -> WaitKey {
        WaitKey::Placeholder(self.next_placeholder.fetch_add(1, Ordering::Relaxed))
    }

    /// Register an entry; fails if the key already holds one
    pub fn insert(&self, key: WaitKey, entry: Arc<PendingTransaction>) -> Result<(), WaitError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return Err(WaitError::DuplicateWait(key));
        }
        entries.insert(key, entry);
        Ok(())
    }

    pub fn get(&self, key: &WaitKey) -> Option<Arc<PendingTransaction>> {
        self.entries.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &WaitKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Remove whatever is stored under the key. Idempotent.
    pub fn remove(&self, key: &WaitKey) -> Option<Arc<PendingTransaction>> {
        self.entries.lock().remove(key)
    }

    /// Remove every key that holds this exact entry, wherever it is stored
    pub fn remove_entry(&self, entry: &Arc<PendingTransaction>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !Arc::ptr_eq(e, entry));
        before - entries.len()
    }

    /// Atomically remove all entries matching the predicate
    ///
    /// The predicate runs under the map lock, so an entry is seen by at most
    /// one scan; a predicate that settles the entry settles it exactly once.
    pub fn remove_if<F>(&self, mut predicate: F) -> Vec<(WaitKey, Arc<PendingTransaction>)>
    where
        F: FnMut(&WaitKey, &PendingTransaction) -> bool,
    {
        let mut entries = self.entries.lock();
        let matched: Vec<WaitKey> = entries
            .iter()
            .filter(|&(key, entry)| predicate(key, &**entry))
            .map(|(key, _)| *key)
            .collect();

        matched
            .into_iter()
            .filter_map(|key| entries.remove(&key).map(|entry| (key, entry)))
            .collect()
    }

    /// Move an entry from one key to another in one step
    ///
    /// Returns `Ok(false)` when the entry is no longer stored under `from`:
    /// it was already matched and removed, and must not be re-registered.
    pub fn rekey(
        &self,
        from: &WaitKey,
        to: WaitKey,
        entry: &Arc<PendingTransaction>,
    ) -> Result<bool, WaitError> {
        let mut entries = self.entries.lock();

        match entries.get(from) {
            Some(current) if Arc::ptr_eq(current, entry) => {}
            _ => {
                debug!("Entry no longer under {}, not moving it to {}", from, to);
                return Ok(false);
            }
        }

        if entries.contains_key(&to) {
            return Err(WaitError::DuplicateWait(to));
        }

        entries.remove(from);
        entries.insert(to, entry.clone());
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Keys and business keys of all entries, for diagnostics
    pub fn snapshot(&self) -> Vec<(WaitKey, String, String, Option<ConnectorId>)> {
        self.entries
            .lock()
            .iter()
            .map(|(key, e)| (*key, e.charge_box_id.clone(), e.id_tag.clone(), e.connector_id))
            .collect()
    }
}

/// Removes its entry from the registry when dropped
///
/// Held by a waiting flow for its whole lifetime, so success, error and
/// cancellation of the flow's future all leave the registry clean.
pub struct CleanupGuard<'a> {
    registry: &'a PendingRegistry,
    entry: Arc<PendingTransaction>,
}

impl<'a> CleanupGuard<'a> {
    pub fn new(registry: &'a PendingRegistry, entry: Arc<PendingTransaction>) -> Self {
        Self { registry, entry }
    }
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        let removed = self.registry.remove_entry(&self.entry);
        if removed > 0 {
            debug!(
                "Cleaned up pending wait for {} / {}",
                self.entry.charge_box_id, self.entry.id_tag
            );
        }
    }
}
