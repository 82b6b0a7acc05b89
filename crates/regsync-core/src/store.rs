//! Abstract store operations the sync engine requires of its persistence
//! substrate. Backends live in `regsync-store`.

use async_trait::async_trait;

use crate::error::SyncError;
use crate::types::{DedupKey, EntityKey, EntitySnapshot, RegistryEvent, SyncProcess};

// ─── Confirmed event log ─────────────────────────────────────────────────────

/// The durable, append-only log of confirmed registry events.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Idempotent upsert keyed by the event's dedup key — writing the same
    /// event twice leaves the store unchanged.
    async fn put(&self, event: RegistryEvent) -> Result<(), SyncError>;

    /// All events for `contract` in `[from, to]` (inclusive), ordered by
    /// (block number, tx index, log index). The aggregator's reduction is
    /// only correct if this order holds.
    async fn range_by_block(
        &self,
        contract: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<RegistryEvent>, SyncError>;

    /// The earliest stored event for `contract`, if any (aggregator
    /// bootstrap).
    async fn first_event(&self, contract: &str) -> Result<Option<RegistryEvent>, SyncError>;
}

// ─── Pending event log ───────────────────────────────────────────────────────

/// Best-effort store of as-yet-unconfirmed observations.
#[async_trait]
pub trait PendingLog: Send + Sync {
    /// Upsert a pending event (same dedup-key identity as confirmed events).
    async fn put_pending(&self, event: RegistryEvent) -> Result<(), SyncError>;

    /// Delete the pending event with this key, if present.
    async fn delete_pending(&self, contract: &str, key: DedupKey) -> Result<(), SyncError>;

    /// Delete every pending onboarding record for `entity` except the one
    /// keyed `keep` (at most one outstanding onboarding intent per entity).
    async fn delete_pending_onboarding_except(
        &self,
        entity: &EntityKey,
        keep: DedupKey,
    ) -> Result<(), SyncError>;

    /// Purge pending events below `height`; returns how many were removed.
    async fn purge_pending_below(&self, contract: &str, height: u64) -> Result<u64, SyncError>;

    /// Pending events for one entity, in dedup-key order.
    async fn pending_for_entity(
        &self,
        entity: &EntityKey,
    ) -> Result<Vec<RegistryEvent>, SyncError>;
}

// ─── Checkpoints ─────────────────────────────────────────────────────────────

/// Per-(process, contract) last-fully-processed block heights.
///
/// A height of 0 means "never synced". Each checkpoint is mutated only by
/// its owning process.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn checkpoint(&self, process: SyncProcess, contract: &str) -> Result<u64, SyncError>;

    async fn set_checkpoint(
        &self,
        process: SyncProcess,
        contract: &str,
        height: u64,
    ) -> Result<(), SyncError>;
}

// ─── Entity state + history ──────────────────────────────────────────────────

/// Materialized current state and append-only per-entity history.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Upsert the current-state row for a (still existing) entity.
    async fn upsert_state(&self, snapshot: EntitySnapshot) -> Result<(), SyncError>;

    /// Delete the current-state row; absence is the deleted state.
    async fn delete_state(&self, entity: &EntityKey) -> Result<(), SyncError>;

    /// The current-state row, or `None` if the entity does not exist.
    async fn state(&self, entity: &EntityKey) -> Result<Option<EntitySnapshot>, SyncError>;

    /// Append one immutable history row. Rows are never mutated or deleted.
    async fn append_history(&self, snapshot: EntitySnapshot) -> Result<(), SyncError>;

    /// The most recent history row strictly before `(time, key)` in
    /// (applied-at, dedup-key) order — the simultaneous record itself is
    /// excluded, an earlier event in the same block is not.
    async fn latest_before(
        &self,
        entity: &EntityKey,
        time: i64,
        key: DedupKey,
    ) -> Result<Option<EntitySnapshot>, SyncError>;

    /// The entity's snapshot as of `time` (latest row with
    /// `applied_at <= time`), for point-in-time queries.
    async fn as_of(&self, entity: &EntityKey, time: i64)
        -> Result<Option<EntitySnapshot>, SyncError>;
}

// ─── Aggregate store ─────────────────────────────────────────────────────────

/// Everything the Ingestor and Aggregator need from one backend.
pub trait RegistryStore: EventLog + PendingLog + CheckpointStore + StateStore {}

impl<T: EventLog + PendingLog + CheckpointStore + StateStore> RegistryStore for T {}
