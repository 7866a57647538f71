//! Application of externally sourced zone changes.
//!
//! Record values marked `consul` are owned by an external key-value store.
//! A [`ChangeSource`] yields batches of [`ZoneChange`]s for it, and the
//! [`Synchronizer`] applies each batch to the matching [`Domain`] through the
//! same mutators the protocol handlers use. A batch is applied atomically:
//! either every change lands and the zone's last-update moves forward, or the
//! zone is left untouched.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Domain, Key, KeyUpdate, Record, Result, Store};

/// A single mutation of a zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ZoneChange {
    /// Append a record under an owner name.
    AddRecord {
        /// Owner name (trailing dot).
        owner: String,
        /// The record to add.
        record: Record,
    },
    /// Replace the values of a metadata kind.
    SetMetadata {
        /// Metadata kind.
        kind: String,
        /// New values.
        values: Vec<String>,
    },
    /// Append a key.
    AddKey {
        /// The key to add.
        key: Key,
    },
    /// Partially update the key at a position.
    UpdateKey {
        /// Key id.
        id: usize,
        /// Fields to overwrite.
        update: KeyUpdate,
    },
    /// Remove the key at a position.
    RemoveKey {
        /// Key id.
        id: usize,
    },
}

/// A batch of changes for one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneChanges {
    /// Zone name.
    pub zone: String,
    /// Changes, applied in order.
    pub changes: Vec<ZoneChange>,
}

impl Domain {
    /// Applies `changes` atomically and returns how many were applied.
    ///
    /// The changes run against a copy of the zone state under the zone's
    /// write lock; the copy replaces the live state only if all succeed.
    /// An empty batch leaves the zone, including its serial, untouched.
    pub fn apply_changes(&self, changes: &[ZoneChange]) -> Result<usize> {
        if changes.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.write();
        let mut next = state.clone();

        for change in changes {
            match change.clone() {
                ZoneChange::AddRecord { owner, record } => {
                    Self::add_record_locked(&mut next, self.defaults, &owner, record)?;
                }
                ZoneChange::SetMetadata { kind, values } => {
                    Self::set_metadata_locked(&mut next, &self.name, kind, values);
                }
                ZoneChange::AddKey { key } => next.keys.push(key),
                ZoneChange::UpdateKey { id, update } => {
                    Self::update_key_locked(&mut next, &self.name, id, update)?;
                }
                ZoneChange::RemoveKey { id } => {
                    Self::remove_key_locked(&mut next, &self.name, id)?;
                }
            }
        }

        next.last_update = Utc::now();
        *state = next;
        Ok(changes.len())
    }
}

/// Source of pending zone changes.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Returns the batches that arrived since the last poll.
    async fn poll(&self) -> Result<Vec<ZoneChanges>>;
}

/// In-process queue of change batches.
///
/// Producers push batches; the synchronizer drains them on each poll.
#[derive(Debug, Default)]
pub struct QueuedSource {
    pending: Mutex<VecDeque<ZoneChanges>>,
}

impl QueuedSource {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a batch.
    pub fn push(&self, batch: ZoneChanges) {
        self.pending.lock().push_back(batch);
    }

    /// Returns the number of queued batches.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[async_trait]
impl ChangeSource for QueuedSource {
    async fn poll(&self) -> Result<Vec<ZoneChanges>> {
        Ok(self.pending.lock().drain(..).collect())
    }
}

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Batches applied.
    pub applied: usize,
    /// Batches rejected (unknown zone or failing change).
    pub rejected: usize,
    /// Individual changes applied.
    pub changes: usize,
}

/// Applies changes from a [`ChangeSource`] to a [`Store`].
pub struct Synchronizer {
    store: Arc<Store>,
    source: Arc<dyn ChangeSource>,
}

impl Synchronizer {
    /// Creates a synchronizer.
    pub fn new(store: Arc<Store>, source: Arc<dyn ChangeSource>) -> Self {
        Self { store, source }
    }

    /// Applies one batch to its zone.
    pub fn apply(&self, batch: &ZoneChanges) -> Result<usize> {
        let (_, domain) = self.store.domain_by_name(&batch.zone)?;
        domain.apply_changes(&batch.changes)
    }

    /// Polls the source once and applies everything it returned.
    pub async fn sync_once(&self) -> Result<SyncReport> {
        let batches = self.source.poll().await?;
        let mut report = SyncReport::default();

        for batch in &batches {
            match self.apply(batch) {
                Ok(n) => {
                    debug!(zone = %batch.zone, changes = n, "applied zone changes");
                    report.applied += 1;
                    report.changes += n;
                }
                Err(e) => {
                    warn!(zone = %batch.zone, error = %e, "rejected zone changes");
                    report.rejected += 1;
                }
            }
        }

        Ok(report)
    }

    /// Polls on `interval` until `shutdown` is cancelled.
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        info!(interval_ms = interval.as_millis() as u64, "zone synchronizer started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_once().await {
                        warn!(error = %e, "zone synchronization failed");
                    }
                }
            }
        }

        info!("zone synchronizer stopped");
    }
}
