//! Ingestor — durable persistence of decoded events.
//!
//! Confirmed events land in the event log with idempotent upserts, retract
//! their pending counterparts, and advance the Ingestor checkpoint. Pending
//! events land in the pending log as best-effort previews. Stale pending
//! rows are purged on a coarse stride rather than every window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use regsync_core::error::SyncError;
use regsync_core::policy::RegistryPolicy;
use regsync_core::store::RegistryStore;
use regsync_core::types::{RegistryEvent, SyncProcess};

/// Purge pending rows at most once every this many confirmed blocks.
pub const PENDING_PURGE_STRIDE: u64 = 10_000;

/// Writes decoded events through to the store for one registry contract.
///
/// Shared by the confirmed and pending syncers; the purge watermark is an
/// atomic so both paths see one stride.
pub struct Ingestor {
    store: Arc<dyn RegistryStore>,
    policy: Arc<dyn RegistryPolicy>,
    contract: String,
    last_purge: AtomicU64,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        policy: Arc<dyn RegistryPolicy>,
        contract: impl Into<String>,
    ) -> Self {
        Self {
            store,
            policy,
            contract: contract.into(),
            last_purge: AtomicU64::new(0),
        }
    }

    /// Persist one fully-scanned confirmed window and advance the checkpoint
    /// to its end.
    ///
    /// Events must already be sorted by dedup key. Re-ingesting a window is
    /// harmless: the upserts are keyed by dedup key and the checkpoint only
    /// moves forward. The checkpoint is written only after every event in
    /// the window landed, so a failure mid-window replays the whole window.
    pub async fn record_window(
        &self,
        events: Vec<RegistryEvent>,
        window_end: u64,
    ) -> Result<(), SyncError> {
        let count = events.len();
        for event in events {
            self.record_confirmed(event).await?;
        }
        self.store
            .set_checkpoint(SyncProcess::Ingestor, &self.contract, window_end)
            .await?;
        tracing::debug!(
            contract = %self.contract,
            window_end,
            events = count,
            "confirmed window recorded"
        );
        self.maybe_purge_pending(window_end).await
    }

    /// Persist one confirmed event and retract its pending preview.
    ///
    /// A confirmed onboarding additionally retracts every other pending
    /// onboarding intent for the entity; whichever onboarding confirmed wins.
    async fn record_confirmed(&self, event: RegistryEvent) -> Result<(), SyncError> {
        let key = event.dedup;
        let entity = event.entity;
        let onboarding = self.policy.is_onboarding(event.kind);
        self.store.put(event).await?;
        self.store.delete_pending(&self.contract, key).await?;
        if onboarding {
            self.store
                .delete_pending_onboarding_except(&entity, key)
                .await?;
        }
        Ok(())
    }

    /// Persist one live (unconfirmed) event preview.
    ///
    /// A pending onboarding displaces earlier pending onboarding intents for
    /// the same entity — at most one is outstanding at a time.
    pub async fn record_pending(&self, event: RegistryEvent) -> Result<(), SyncError> {
        let key = event.dedup;
        let entity = event.entity;
        let onboarding = self.policy.is_onboarding(event.kind);
        self.store.put_pending(event).await?;
        if onboarding {
            self.store
                .delete_pending_onboarding_except(&entity, key)
                .await?;
        }
        Ok(())
    }

    /// Purge pending rows below the confirmed height, at most once per
    /// stride. Anything pending below the Ingestor checkpoint either
    /// confirmed (and was retracted) or never will.
    async fn maybe_purge_pending(&self, confirmed_height: u64) -> Result<(), SyncError> {
        let last = self.last_purge.load(Ordering::SeqCst);
        if confirmed_height < last.saturating_add(PENDING_PURGE_STRIDE) {
            return Ok(());
        }
        if self
            .last_purge
            .compare_exchange(last, confirmed_height, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(()); // another path already purged this stride
        }
        let removed = self
            .store
            .purge_pending_below(&self.contract, confirmed_height)
            .await?;
        if removed > 0 {
            tracing::info!(
                contract = %self.contract,
                below = confirmed_height,
                removed,
                "purged stale pending events"
            );
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
