//! SQLite storage backend.
//!
//! Persists the confirmed event log, pending events, checkpoints, current
//! state, and history to a single SQLite file. Uses `sqlx` with WAL mode.
//! SQLite keeps a native ordered index on the dedup key, so this backend
//! needs no synthetic partitioning (see `partition` for backends that do).
//!
//! # Usage
//! ```rust,no_run
//! use regsync_store::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./regsync.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use regsync_core::error::SyncError;
use regsync_core::store::{CheckpointStore, EventLog, PendingLog, StateStore};
use regsync_core::types::{
    DedupKey, EntityKey, EntitySnapshot, RegistryEvent, SyncProcess,
};

/// SQLite-backed registry store.
pub struct SqliteStore {
    pool: SqlitePool,
}

fn storage_err(e: impl std::fmt::Display) -> SyncError {
    SyncError::Storage(e.to_string())
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./regsync.db"`) or a full
    /// SQLite URL (`"sqlite:./regsync.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, SyncError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database (single connection, so all queries
    /// see the same database). Ideal for tests.
    pub async fn in_memory() -> Result<Self, SyncError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), SyncError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS reg_events (
                contract     TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                tx_index     INTEGER NOT NULL,
                log_index    INTEGER NOT NULL,
                entity       TEXT    NOT NULL,
                kind         TEXT    NOT NULL,
                body         TEXT    NOT NULL,
                PRIMARY KEY (contract, block_number, tx_index, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pending_events (
                contract     TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                tx_index     INTEGER NOT NULL,
                log_index    INTEGER NOT NULL,
                entity       TEXT    NOT NULL,
                kind         TEXT    NOT NULL,
                body         TEXT    NOT NULL,
                PRIMARY KEY (contract, block_number, tx_index, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_pending_entity
             ON pending_events (entity, kind);",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                process      TEXT    NOT NULL,
                contract     TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL,
                PRIMARY KEY (process, contract)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entity_states (
                entity TEXT PRIMARY KEY,
                body   TEXT NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entity_history (
                entity       TEXT    NOT NULL,
                applied_at   INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                tx_index     INTEGER NOT NULL,
                log_index    INTEGER NOT NULL,
                body         TEXT    NOT NULL,
                PRIMARY KEY (entity, applied_at, block_number, tx_index, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    fn event_body(event: &RegistryEvent) -> Result<String, SyncError> {
        serde_json::to_string(event).map_err(storage_err)
    }

    fn event_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<RegistryEvent, SyncError> {
        let body: String = row.get("body");
        serde_json::from_str(&body).map_err(storage_err)
    }

    fn snapshot_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<EntitySnapshot, SyncError> {
        let body: String = row.get("body");
        serde_json::from_str(&body).map_err(storage_err)
    }
}

#[async_trait]
impl EventLog for SqliteStore {
    async fn put(&self, event: RegistryEvent) -> Result<(), SyncError> {
        // OR IGNORE — events are immutable, the first write wins and
        // re-scanned duplicates are dropped.
        sqlx::query(
            "INSERT OR IGNORE INTO reg_events
             (contract, block_number, tx_index, log_index, entity, kind, body)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.contract)
        .bind(event.dedup.block_number as i64)
        .bind(event.dedup.tx_index as i64)
        .bind(event.dedup.log_index as i64)
        .bind(event.entity.to_hex())
        .bind(event.kind.as_str())
        .bind(Self::event_body(&event)?)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(kind = %event.kind, block = event.block_number(), "event stored");
        Ok(())
    }

    async fn range_by_block(
        &self,
        contract: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<RegistryEvent>, SyncError> {
        let rows = sqlx::query(
            "SELECT body FROM reg_events
             WHERE contract = ? AND block_number BETWEEN ? AND ?
             ORDER BY block_number, tx_index, log_index",
        )
        .bind(contract)
        .bind(from as i64)
        .bind(to as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(Self::event_from_row).collect()
    }

    async fn first_event(&self, contract: &str) -> Result<Option<RegistryEvent>, SyncError> {
        let row = sqlx::query(
            "SELECT body FROM reg_events WHERE contract = ?
             ORDER BY block_number, tx_index, log_index LIMIT 1",
        )
        .bind(contract)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.as_ref().map(Self::event_from_row).transpose()
    }
}

#[async_trait]
impl PendingLog for SqliteStore {
    async fn put_pending(&self, event: RegistryEvent) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT OR REPLACE INTO pending_events
             (contract, block_number, tx_index, log_index, entity, kind, body)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.contract)
        .bind(event.dedup.block_number as i64)
        .bind(event.dedup.tx_index as i64)
        .bind(event.dedup.log_index as i64)
        .bind(event.entity.to_hex())
        .bind(event.kind.as_str())
        .bind(Self::event_body(&event)?)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_pending(&self, contract: &str, key: DedupKey) -> Result<(), SyncError> {
        sqlx::query(
            "DELETE FROM pending_events
             WHERE contract = ? AND block_number = ? AND tx_index = ? AND log_index = ?",
        )
        .bind(contract)
        .bind(key.block_number as i64)
        .bind(key.tx_index as i64)
        .bind(key.log_index as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_pending_onboarding_except(
        &self,
        entity: &EntityKey,
        keep: DedupKey,
    ) -> Result<(), SyncError> {
        sqlx::query(
            "DELETE FROM pending_events
             WHERE entity = ? AND kind = 'onboarded'
               AND NOT (block_number = ? AND tx_index = ? AND log_index = ?)",
        )
        .bind(entity.to_hex())
        .bind(keep.block_number as i64)
        .bind(keep.tx_index as i64)
        .bind(keep.log_index as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn purge_pending_below(&self, contract: &str, height: u64) -> Result<u64, SyncError> {
        let result = sqlx::query(
            "DELETE FROM pending_events WHERE contract = ? AND block_number < ?",
        )
        .bind(contract)
        .bind(height as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(contract, height, purged = result.rows_affected(), "stale pending purged");
        Ok(result.rows_affected())
    }

    async fn pending_for_entity(
        &self,
        entity: &EntityKey,
    ) -> Result<Vec<RegistryEvent>, SyncError> {
        let rows = sqlx::query(
            "SELECT body FROM pending_events WHERE entity = ?
             ORDER BY block_number, tx_index, log_index",
        )
        .bind(entity.to_hex())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(Self::event_from_row).collect()
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn checkpoint(&self, process: SyncProcess, contract: &str) -> Result<u64, SyncError> {
        let row = sqlx::query(
            "SELECT block_number FROM checkpoints WHERE process = ? AND contract = ?",
        )
        .bind(process.as_str())
        .bind(contract)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.map(|r| r.get::<i64, _>("block_number") as u64).unwrap_or(0))
    }

    async fn set_checkpoint(
        &self,
        process: SyncProcess,
        contract: &str,
        height: u64,
    ) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints (process, contract, block_number, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(process.as_str())
        .bind(contract)
        .bind(height as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(%process, contract, height, "checkpoint saved");
        Ok(())
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn upsert_state(&self, snapshot: EntitySnapshot) -> Result<(), SyncError> {
        sqlx::query("INSERT OR REPLACE INTO entity_states (entity, body) VALUES (?, ?)")
            .bind(snapshot.entity.to_hex())
            .bind(serde_json::to_string(&snapshot).map_err(storage_err)?)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_state(&self, entity: &EntityKey) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM entity_states WHERE entity = ?")
            .bind(entity.to_hex())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn state(&self, entity: &EntityKey) -> Result<Option<EntitySnapshot>, SyncError> {
        let row = sqlx::query("SELECT body FROM entity_states WHERE entity = ?")
            .bind(entity.to_hex())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.as_ref().map(Self::snapshot_from_row).transpose()
    }

    async fn append_history(&self, snapshot: EntitySnapshot) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT OR IGNORE INTO entity_history
             (entity, applied_at, block_number, tx_index, log_index, body)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(snapshot.entity.to_hex())
        .bind(snapshot.applied_at)
        .bind(snapshot.dedup.block_number as i64)
        .bind(snapshot.dedup.tx_index as i64)
        .bind(snapshot.dedup.log_index as i64)
        .bind(serde_json::to_string(&snapshot).map_err(storage_err)?)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn latest_before(
        &self,
        entity: &EntityKey,
        time: i64,
        key: DedupKey,
    ) -> Result<Option<EntitySnapshot>, SyncError> {
        let row = sqlx::query(
            "SELECT body FROM entity_history
             WHERE entity = ?
               AND (applied_at, block_number, tx_index, log_index) < (?, ?, ?, ?)
             ORDER BY applied_at DESC, block_number DESC, tx_index DESC, log_index DESC
             LIMIT 1",
        )
        .bind(entity.to_hex())
        .bind(time)
        .bind(key.block_number as i64)
        .bind(key.tx_index as i64)
        .bind(key.log_index as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.as_ref().map(Self::snapshot_from_row).transpose()
    }

    async fn as_of(
        &self,
        entity: &EntityKey,
        time: i64,
    ) -> Result<Option<EntitySnapshot>, SyncError> {
        let row = sqlx::query(
            "SELECT body FROM entity_history
             WHERE entity = ? AND applied_at <= ?
             ORDER BY applied_at DESC, block_number DESC, tx_index DESC, log_index DESC
             LIMIT 1",
        )
        .bind(entity.to_hex())
        .bind(time)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.as_ref().map(Self::snapshot_from_row).transpose()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use regsync_core::types::{EventFields, EventKind};

    const CONTRACT: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn ev(block: u64, tx: u32, log: u32, kind: EventKind) -> RegistryEvent {
        RegistryEvent {
            contract: CONTRACT.into(),
            block_hash: format!("0xb{block:x}"),
            tx_hash: format!("0xt{block:x}{tx:x}"),
            dedup: DedupKey::new(block, tx, log),
            kind,
            entity: EntityKey([5; 32]),
            before: EventFields::default(),
            after: EventFields {
                owner: Some("0x1111111111111111111111111111111111111111".into()),
                ..Default::default()
            },
            block_time: (block * 10) as i64,
        }
    }

    fn snap(time: i64, block: u64, owner: &str) -> EntitySnapshot {
        EntitySnapshot {
            entity: EntityKey([5; 32]),
            owner: Some(owner.into()),
            location: None,
            frequency_plan: None,
            params: None,
            tx_hash: "0xtx".into(),
            dedup: DedupKey::new(block, 0, 0),
            applied_at: time,
        }
    }

    #[tokio::test]
    async fn event_upsert_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.put(ev(100, 0, 0, EventKind::Onboarded)).await.unwrap();
        store.put(ev(100, 0, 0, EventKind::Onboarded)).await.unwrap();

        let events = store.range_by_block(CONTRACT, 0, 1_000).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn range_scan_ordered_and_inclusive() {
        let store = SqliteStore::in_memory().await.unwrap();
        for (b, t, l) in [(200u64, 0u32, 0u32), (100, 1, 0), (100, 0, 3), (150, 0, 0)] {
            store.put(ev(b, t, l, EventKind::Updated)).await.unwrap();
        }
        let events = store.range_by_block(CONTRACT, 100, 200).await.unwrap();
        let keys: Vec<_> = events.iter().map(|e| e.dedup).collect();
        assert_eq!(
            keys,
            vec![
                DedupKey::new(100, 0, 3),
                DedupKey::new(100, 1, 0),
                DedupKey::new(150, 0, 0),
                DedupKey::new(200, 0, 0),
            ]
        );
    }

    #[tokio::test]
    async fn first_event_and_checkpoints() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.first_event(CONTRACT).await.unwrap().is_none());
        assert_eq!(store.checkpoint(SyncProcess::Ingestor, CONTRACT).await.unwrap(), 0);

        store.put(ev(300, 0, 0, EventKind::Onboarded)).await.unwrap();
        store.put(ev(100, 0, 0, EventKind::Onboarded)).await.unwrap();
        assert_eq!(
            store.first_event(CONTRACT).await.unwrap().unwrap().block_number(),
            100
        );

        store.set_checkpoint(SyncProcess::Ingestor, CONTRACT, 300).await.unwrap();
        store.set_checkpoint(SyncProcess::Ingestor, CONTRACT, 400).await.unwrap();
        assert_eq!(
            store.checkpoint(SyncProcess::Ingestor, CONTRACT).await.unwrap(),
            400
        );
    }

    #[tokio::test]
    async fn pending_lifecycle() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.put_pending(ev(10, 0, 0, EventKind::Onboarded)).await.unwrap();
        store.put_pending(ev(12, 0, 0, EventKind::Onboarded)).await.unwrap();
        store.put_pending(ev(15, 0, 0, EventKind::Transferred)).await.unwrap();

        // Keep only the newest onboarding intent.
        store
            .delete_pending_onboarding_except(&EntityKey([5; 32]), DedupKey::new(12, 0, 0))
            .await
            .unwrap();
        let left = store.pending_for_entity(&EntityKey([5; 32])).await.unwrap();
        assert_eq!(left.len(), 2); // onboarding @12 + transfer @15

        // Confirmed counterpart retracts by dedup key.
        store.delete_pending(CONTRACT, DedupKey::new(12, 0, 0)).await.unwrap();

        // Purge below height 16 clears the rest.
        let purged = store.purge_pending_below(CONTRACT, 16).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store
            .pending_for_entity(&EntityKey([5; 32]))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn state_and_history_queries() {
        let store = SqliteStore::in_memory().await.unwrap();
        let entity = EntityKey([5; 32]);

        store.append_history(snap(100, 10, "0xa")).await.unwrap();
        store.append_history(snap(200, 20, "0xb")).await.unwrap();
        store.upsert_state(snap(200, 20, "0xb")).await.unwrap();

        assert_eq!(
            store.state(&entity).await.unwrap().unwrap().owner.as_deref(),
            Some("0xb")
        );
        assert_eq!(
            store.as_of(&entity, 150).await.unwrap().unwrap().owner.as_deref(),
            Some("0xa")
        );
        let prior = store
            .latest_before(&entity, 200, DedupKey::new(20, 0, 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(prior.owner.as_deref(), Some("0xa"));

        store.delete_state(&entity).await.unwrap();
        assert!(store.state(&entity).await.unwrap().is_none());
        // History survives current-state deletion.
        assert!(store.as_of(&entity, 250).await.unwrap().is_some());
    }
}
