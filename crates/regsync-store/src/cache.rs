//! Write-through checkpoint cache with bounded staleness.
//!
//! Checkpoints are single hot keys written once per sync iteration and read
//! back at the start of the next. Wrapping the store with this cache cuts
//! that steady-state read/write amplification: a durable write is skipped
//! while the previous durable write is younger than the TTL *and* the height
//! advanced less than the drift bound, and reads within the TTL are served
//! from the cached value. After a crash the durable checkpoint lags by at
//! most that window, which at-least-once replay absorbs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use regsync_core::error::SyncError;
use regsync_core::store::{CheckpointStore, EventLog, PendingLog, StateStore};
use regsync_core::types::{
    DedupKey, EntityKey, EntitySnapshot, RegistryEvent, SyncProcess,
};

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    /// Latest height observed (may be cache-only).
    height: u64,
    /// Height of the last durable write.
    durable_height: u64,
    /// When the last durable write (or durable read) happened.
    written_at: Instant,
}

/// Checkpoint-caching wrapper around a store.
///
/// All non-checkpoint operations delegate to the inner store unchanged.
pub struct CheckpointCache<S> {
    inner: S,
    ttl: Duration,
    max_drift: u64,
    entries: Mutex<HashMap<(SyncProcess, String), CacheEntry>>,
}

impl<S> CheckpointCache<S> {
    /// Wrap `inner`; skip durable checkpoint writes while the last durable
    /// write is younger than `ttl` and the height advanced less than
    /// `max_drift` blocks.
    pub fn new(inner: S, ttl: Duration, max_drift: u64) -> Self {
        Self {
            inner,
            ttl,
            max_drift,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: CheckpointStore> CheckpointCache<S> {
    /// Durably persist every cached height that is ahead of its last durable
    /// write (call on shutdown).
    pub async fn flush(&self) -> Result<(), SyncError> {
        let dirty: Vec<((SyncProcess, String), u64)> = {
            let entries = self.entries.lock().unwrap();
            entries
                .iter()
                .filter(|(_, e)| e.height > e.durable_height)
                .map(|(k, e)| (k.clone(), e.height))
                .collect()
        };
        for ((process, contract), height) in dirty {
            self.inner.set_checkpoint(process, &contract, height).await?;
            tracing::debug!(%process, contract, height, "cached checkpoint flushed");
            let mut entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get_mut(&(process, contract)) {
                entry.durable_height = entry.durable_height.max(height);
                entry.written_at = Instant::now();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<S: CheckpointStore> CheckpointStore for CheckpointCache<S> {
    async fn checkpoint(&self, process: SyncProcess, contract: &str) -> Result<u64, SyncError> {
        {
            let entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get(&(process, contract.to_string())) {
                if entry.written_at.elapsed() < self.ttl {
                    return Ok(entry.height);
                }
            }
        }
        let durable = self.inner.checkpoint(process, contract).await?;
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .entry((process, contract.to_string()))
            .or_insert(CacheEntry {
                height: durable,
                durable_height: durable,
                written_at: Instant::now(),
            });
        // A dirty height whose durable write was skipped survives the
        // re-read: reads through one handle never go backwards, and the
        // height stays flushable.
        entry.height = entry.height.max(durable);
        entry.durable_height = entry.durable_height.max(durable);
        entry.written_at = Instant::now();
        Ok(entry.height)
    }

    async fn set_checkpoint(
        &self,
        process: SyncProcess,
        contract: &str,
        height: u64,
    ) -> Result<(), SyncError> {
        let key = (process, contract.to_string());
        let cache_only = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get_mut(&key) {
                Some(entry)
                    if entry.written_at.elapsed() < self.ttl
                        && height.saturating_sub(entry.durable_height) < self.max_drift =>
                {
                    entry.height = height;
                    true
                }
                _ => false,
            }
        };
        if cache_only {
            return Ok(());
        }

        self.inner.set_checkpoint(process, contract, height).await?;
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key,
            CacheEntry {
                height,
                durable_height: height,
                written_at: Instant::now(),
            },
        );
        Ok(())
    }
}

// ─── Delegation for the remaining store traits ───────────────────────────────

#[async_trait]
impl<S: EventLog> EventLog for CheckpointCache<S> {
    async fn put(&self, event: RegistryEvent) -> Result<(), SyncError> {
        self.inner.put(event).await
    }

    async fn range_by_block(
        &self,
        contract: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<RegistryEvent>, SyncError> {
        self.inner.range_by_block(contract, from, to).await
    }

    async fn first_event(&self, contract: &str) -> Result<Option<RegistryEvent>, SyncError> {
        self.inner.first_event(contract).await
    }
}

#[async_trait]
impl<S: PendingLog> PendingLog for CheckpointCache<S> {
    async fn put_pending(&self, event: RegistryEvent) -> Result<(), SyncError> {
        self.inner.put_pending(event).await
    }

    async fn delete_pending(&self, contract: &str, key: DedupKey) -> Result<(), SyncError> {
        self.inner.delete_pending(contract, key).await
    }

    async fn delete_pending_onboarding_except(
        &self,
        entity: &EntityKey,
        keep: DedupKey,
    ) -> Result<(), SyncError> {
        self.inner.delete_pending_onboarding_except(entity, keep).await
    }

    async fn purge_pending_below(&self, contract: &str, height: u64) -> Result<u64, SyncError> {
        self.inner.purge_pending_below(contract, height).await
    }

    async fn pending_for_entity(
        &self,
        entity: &EntityKey,
    ) -> Result<Vec<RegistryEvent>, SyncError> {
        self.inner.pending_for_entity(entity).await
    }
}

#[async_trait]
impl<S: StateStore> StateStore for CheckpointCache<S> {
    async fn upsert_state(&self, snapshot: EntitySnapshot) -> Result<(), SyncError> {
        self.inner.upsert_state(snapshot).await
    }

    async fn delete_state(&self, entity: &EntityKey) -> Result<(), SyncError> {
        self.inner.delete_state(entity).await
    }

    async fn state(&self, entity: &EntityKey) -> Result<Option<EntitySnapshot>, SyncError> {
        self.inner.state(entity).await
    }

    async fn append_history(&self, snapshot: EntitySnapshot) -> Result<(), SyncError> {
        self.inner.append_history(snapshot).await
    }

    async fn latest_before(
        &self,
        entity: &EntityKey,
        time: i64,
        key: DedupKey,
    ) -> Result<Option<EntitySnapshot>, SyncError> {
        self.inner.latest_before(entity, time, key).await
    }

    async fn as_of(
        &self,
        entity: &EntityKey,
        time: i64,
    ) -> Result<Option<EntitySnapshot>, SyncError> {
        self.inner.as_of(entity, time).await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
