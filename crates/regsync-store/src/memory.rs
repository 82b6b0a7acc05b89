//! In-memory storage backend.
//!
//! Holds the confirmed event log (sharded across synthetic partitions, as a
//! hot-key-hostile backend would have to), pending events, checkpoints,
//! current state, and history in RAM. Useful for tests and ephemeral runs;
//! all data is lost when the process exits.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Included};
use std::sync::Mutex;

use regsync_core::error::SyncError;
use regsync_core::store::{CheckpointStore, EventLog, PendingLog, StateStore};
use regsync_core::types::{
    DedupKey, EntityKey, EntitySnapshot, EventKind, RegistryEvent, SyncProcess,
};

use crate::partition::{merge_by_dedup, shard_of, DEFAULT_SHARDS};

const MAX_DEDUP: DedupKey = DedupKey {
    block_number: u64::MAX,
    tx_index: u32::MAX,
    log_index: u32::MAX,
};

/// In-memory registry store.
pub struct MemoryStore {
    /// Confirmed event log, one ordered map per synthetic partition.
    shards: Vec<Mutex<BTreeMap<(String, DedupKey), RegistryEvent>>>,
    pending: Mutex<BTreeMap<(String, DedupKey), RegistryEvent>>,
    checkpoints: Mutex<HashMap<(SyncProcess, String), u64>>,
    states: Mutex<HashMap<EntityKey, EntitySnapshot>>,
    history: Mutex<BTreeMap<(EntityKey, i64, DedupKey), EntitySnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Construct with a specific synthetic partition count (tests use small
    /// counts to exercise the fan-out path cheaply).
    pub fn with_shards(shards: usize) -> Self {
        assert!(shards > 0, "at least one shard required");
        Self {
            shards: (0..shards).map(|_| Mutex::new(BTreeMap::new())).collect(),
            pending: Mutex::new(BTreeMap::new()),
            checkpoints: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            history: Mutex::new(BTreeMap::new()),
        }
    }

    /// Total confirmed events across all shards.
    pub fn event_count(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap().len()).sum()
    }

    /// Total pending events.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Total history rows (across all entities).
    pub fn history_count(&self) -> usize {
        self.history.lock().unwrap().len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for MemoryStore {
    async fn put(&self, event: RegistryEvent) -> Result<(), SyncError> {
        let shard = shard_of(&event.tx_hash, self.shards.len());
        let key = (event.contract.clone(), event.dedup);
        // Last write wins; identical re-writes are no-ops by construction.
        self.shards[shard].lock().unwrap().insert(key, event);
        Ok(())
    }

    async fn range_by_block(
        &self,
        contract: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<RegistryEvent>, SyncError> {
        let lo = (contract.to_string(), DedupKey::block_floor(from));
        let hi = (contract.to_string(), DedupKey::block_ceil(to));
        let parts: Vec<Vec<RegistryEvent>> = self
            .shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .unwrap()
                    .range(lo.clone()..=hi.clone())
                    .map(|(_, event)| event.clone())
                    .collect()
            })
            .collect();
        Ok(merge_by_dedup(parts))
    }

    async fn first_event(&self, contract: &str) -> Result<Option<RegistryEvent>, SyncError> {
        let lo = (contract.to_string(), DedupKey::default());
        let hi = (contract.to_string(), MAX_DEDUP);
        let mut first: Option<RegistryEvent> = None;
        for shard in &self.shards {
            let guard = shard.lock().unwrap();
            if let Some((_, event)) = guard.range(lo.clone()..=hi.clone()).next() {
                match &first {
                    Some(best) if best.dedup <= event.dedup => {}
                    _ => first = Some(event.clone()),
                }
            }
        }
        Ok(first)
    }
}

#[async_trait]
impl PendingLog for MemoryStore {
    async fn put_pending(&self, event: RegistryEvent) -> Result<(), SyncError> {
        let key = (event.contract.clone(), event.dedup);
        self.pending.lock().unwrap().insert(key, event);
        Ok(())
    }

    async fn delete_pending(&self, contract: &str, key: DedupKey) -> Result<(), SyncError> {
        self.pending
            .lock()
            .unwrap()
            .remove(&(contract.to_string(), key));
        Ok(())
    }

    async fn delete_pending_onboarding_except(
        &self,
        entity: &EntityKey,
        keep: DedupKey,
    ) -> Result<(), SyncError> {
        self.pending.lock().unwrap().retain(|(_, key), event| {
            !(event.entity == *entity && event.kind == EventKind::Onboarded && *key != keep)
        });
        Ok(())
    }

    async fn purge_pending_below(&self, contract: &str, height: u64) -> Result<u64, SyncError> {
        let mut pending = self.pending.lock().unwrap();
        let before = pending.len();
        pending.retain(|(c, key), _| c != contract || key.block_number >= height);
        Ok((before - pending.len()) as u64)
    }

    async fn pending_for_entity(
        &self,
        entity: &EntityKey,
    ) -> Result<Vec<RegistryEvent>, SyncError> {
        Ok(self
            .pending
            .lock()
            .unwrap()
            .values()
            .filter(|event| event.entity == *entity)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn checkpoint(&self, process: SyncProcess, contract: &str) -> Result<u64, SyncError> {
        Ok(*self
            .checkpoints
            .lock()
            .unwrap()
            .get(&(process, contract.to_string()))
            .unwrap_or(&0))
    }

    async fn set_checkpoint(
        &self,
        process: SyncProcess,
        contract: &str,
        height: u64,
    ) -> Result<(), SyncError> {
        self.checkpoints
            .lock()
            .unwrap()
            .insert((process, contract.to_string()), height);
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn upsert_state(&self, snapshot: EntitySnapshot) -> Result<(), SyncError> {
        self.states.lock().unwrap().insert(snapshot.entity, snapshot);
        Ok(())
    }

    async fn delete_state(&self, entity: &EntityKey) -> Result<(), SyncError> {
        self.states.lock().unwrap().remove(entity);
        Ok(())
    }

    async fn state(&self, entity: &EntityKey) -> Result<Option<EntitySnapshot>, SyncError> {
        Ok(self.states.lock().unwrap().get(entity).cloned())
    }

    async fn append_history(&self, snapshot: EntitySnapshot) -> Result<(), SyncError> {
        let key = (snapshot.entity, snapshot.applied_at, snapshot.dedup);
        self.history.lock().unwrap().insert(key, snapshot);
        Ok(())
    }

    async fn latest_before(
        &self,
        entity: &EntityKey,
        time: i64,
        key: DedupKey,
    ) -> Result<Option<EntitySnapshot>, SyncError> {
        let lo = (*entity, i64::MIN, DedupKey::default());
        let hi = (*entity, time, key);
        Ok(self
            .history
            .lock()
            .unwrap()
            .range((Included(lo), Excluded(hi)))
            .next_back()
            .map(|(_, snapshot)| snapshot.clone()))
    }

    async fn as_of(
        &self,
        entity: &EntityKey,
        time: i64,
    ) -> Result<Option<EntitySnapshot>, SyncError> {
        let lo = (*entity, i64::MIN, DedupKey::default());
        let hi = (*entity, time, MAX_DEDUP);
        Ok(self
            .history
            .lock()
            .unwrap()
            .range(lo..=hi)
            .next_back()
            .map(|(_, snapshot)| snapshot.clone()))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
