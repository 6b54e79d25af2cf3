//! # Mempool
//!
//! A priority-ordered pool of pending transactions awaiting inclusion in a
//! block. Reads (selection, lookups) vastly outnumber writes on the hot
//! path, so the pool is guarded by `parking_lot::RwLock` rather than a
//! `tokio::Mutex` — readers never block each other and there is no async
//! runtime overhead on the selection path the producer calls every round.

use crate::model::{Event, Transaction};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction {0:x?} is already present in the mempool")]
    Duplicate([u8; 32]),
    #[error("mempool is full ({0} entries)")]
    Full(usize),
}

#[derive(Debug, Clone)]
struct Entry {
    tx: Transaction,
    inserted_at: Instant,
}

#[derive(Debug, Clone, Copy)]
pub struct MempoolConfig {
    pub max_size: usize,
    /// Entries older than this are evicted by `reap_expired`.
    pub max_age: Duration,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            max_age: Duration::from_secs(300),
        }
    }
}

struct Inner {
    entries: HashMap<[u8; 32], Entry>,
    config: MempoolConfig,
    event_bus: Option<crate::event_bus::EventBus>,
}

/// Thread-safe, fee-priority transaction pool.
#[derive(Clone)]
pub struct Mempool {
    inner: Arc<RwLock<Inner>>,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                entries: HashMap::new(),
                config,
                event_bus: None,
            })),
        }
    }

    pub fn with_event_bus(self, bus: crate::event_bus::EventBus) -> Self {
        self.inner.write().event_bus = Some(bus);
        self
    }

    /// Admits a transaction. Rejects exact duplicates (by id) and rejects
    /// new admissions once `max_size` is reached — the caller decides
    /// whether to retry after the next reap or drop the transaction.
    pub fn insert(&self, tx: Transaction) -> Result<(), MempoolError> {
        let id = tx.id();
        let mut inner = self.inner.write();
        if inner.entries.contains_key(&id) {
            return Err(MempoolError::Duplicate(id));
        }
        if inner.entries.len() >= inner.config.max_size {
            return Err(MempoolError::Full(inner.config.max_size));
        }
        inner.entries.insert(
            id,
            Entry {
                tx: tx.clone(),
                inserted_at: Instant::now(),
            },
        );
        if let Some(bus) = &inner.event_bus {
            let _ = bus.notify(Event::AddTxToTxPool { tx });
        }
        Ok(())
    }

    pub fn contains(&self, id: &[u8; 32]) -> bool {
        self.inner.read().entries.contains_key(id)
    }

    pub fn size(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Removes a batch of transactions by id, typically after they have
    /// been committed in a block.
    pub fn remove_batch(&self, ids: &[[u8; 32]]) {
        let mut inner = self.inner.write();
        for id in ids {
            inner.entries.remove(id);
        }
    }

    /// Selects up to `max_txs` pending transactions ordered by descending
    /// fee, with insertion order breaking ties (oldest first). Does not
    /// remove them — removal only happens once they are actually committed,
    /// so a failed block production attempt loses nothing.
    pub fn select(&self, max_txs: usize) -> Vec<Transaction> {
        let inner = self.inner.read();
        let mut entries: Vec<&Entry> = inner.entries.values().collect();
        entries.sort_by(|a, b| {
            b.tx.fee
                .cmp(&a.tx.fee)
                .then_with(|| a.inserted_at.cmp(&b.inserted_at))
        });
        entries
            .into_iter()
            .take(max_txs)
            .map(|e| e.tx.clone())
            .collect()
    }

    /// Evicts entries older than the configured `max_age`. Intended to be
    /// driven by a background task on a timer; exposed here as a plain
    /// synchronous call so tests can drive it deterministically without an
    /// async runtime.
    pub fn reap_expired(&self) -> usize {
        let mut inner = self.inner.write();
        let max_age = inner.config.max_age;
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.inserted_at.elapsed() < max_age);
        before - inner.entries.len()
    }

    /// Spawns a background task that calls [`reap_expired`](Self::reap_expired)
    /// on a fixed interval until `shutdown` signals `true`.
    pub fn spawn_reaper(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = pool.reap_expired();
                        if evicted > 0 {
                            tracing::debug!(evicted, "reaped expired mempool entries");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
