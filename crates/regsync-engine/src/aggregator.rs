//! Aggregator — reduces the confirmed event log into entity state and
//! history.
//!
//! Replays confirmed events in dedup-key order from its own checkpoint up to
//! the Ingestor's, never past it. Each event is applied against the latest
//! history row strictly before it, appended as a new immutable history row,
//! and reflected into the current-state table — or deleted from it, when the
//! policy says the entity no longer exists. Replaying a window twice writes
//! the same history rows again, which the idempotent append absorbs.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use regsync_core::error::SyncError;
use regsync_core::policy::RegistryPolicy;
use regsync_core::retry::RetryPolicy;
use regsync_core::store::RegistryStore;
use regsync_core::types::{EntitySnapshot, RegistryEvent, SyncProcess};

use crate::confirmed::Progress;
use crate::oracle::ScanRange;

pub struct Aggregator {
    store: Arc<dyn RegistryStore>,
    policy: Arc<dyn RegistryPolicy>,
    contract: String,
    max_span: u64,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl Aggregator {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        policy: Arc<dyn RegistryPolicy>,
        contract: impl Into<String>,
        max_span: u64,
        poll_interval: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            policy,
            contract: contract.into(),
            max_span,
            poll_interval,
            retry,
        }
    }

    /// The next replay window, bounded by the Ingestor's checkpoint, or
    /// `None` when aggregation is caught up — including the never-synced
    /// case where both checkpoints are still zero and events may already be
    /// sitting in the log ahead of a crashed Ingestor's checkpoint write.
    ///
    /// The race check compares the two checkpoints only: an Aggregator
    /// checkpoint ahead of the Ingestor's means the event log this state was
    /// derived from is gone or rolled back; deriving further would compound
    /// the corruption, so that is fatal.
    async fn next_window(&self) -> Result<Option<ScanRange>, SyncError> {
        let aggregated = self
            .store
            .checkpoint(SyncProcess::Aggregator, &self.contract)
            .await?;
        let ingested = self
            .store
            .checkpoint(SyncProcess::Ingestor, &self.contract)
            .await?;
        if aggregated > ingested {
            return Err(SyncError::CheckpointRace {
                ingestor: ingested,
                aggregator: aggregated,
            });
        }
        if aggregated == ingested {
            return Ok(None);
        }

        let from = if aggregated != 0 {
            aggregated
        } else {
            // Fresh aggregator: start just below the earliest stored event
            // so the first event's own block is replayed, clamped to the
            // ingested height for a log whose tail outran its checkpoint.
            self.store
                .first_event(&self.contract)
                .await?
                .map(|event| event.block_number().saturating_sub(1))
                .unwrap_or(0)
                .min(ingested)
        };
        let to = (from + self.max_span).min(ingested);
        Ok(Some(ScanRange {
            from,
            to,
            capped: to < ingested,
        }))
    }

    /// One replay iteration: apply a window of confirmed events and advance
    /// the checkpoint. Any error leaves the checkpoint untouched; the window
    /// replays in full next time.
    pub async fn aggregate_once(&self) -> Result<Progress, SyncError> {
        let Some(range) = self.next_window().await? else {
            return Ok(Progress::Idle);
        };

        let events = self
            .store
            .range_by_block(&self.contract, range.from, range.to)
            .await?;
        let count = events.len();
        for event in events {
            self.apply_event(event).await?;
        }
        self.store
            .set_checkpoint(SyncProcess::Aggregator, &self.contract, range.to)
            .await?;
        tracing::debug!(
            contract = %self.contract,
            from = range.from,
            to = range.to,
            events = count,
            "window aggregated"
        );

        Ok(if range.capped {
            Progress::Capped(range.to)
        } else {
            Progress::Synced(range.to)
        })
    }

    /// Apply one event: fold it into the latest prior snapshot, append the
    /// result to history, and mirror it into (or out of) current state.
    async fn apply_event(&self, event: RegistryEvent) -> Result<(), SyncError> {
        let mut snapshot = self
            .store
            .latest_before(&event.entity, event.block_time, event.dedup)
            .await?
            .unwrap_or_else(|| EntitySnapshot::seed(event.entity));

        self.policy.apply(&mut snapshot, &event);
        snapshot.tx_hash = event.tx_hash.clone();
        snapshot.dedup = event.dedup;
        snapshot.applied_at = event.block_time;

        self.store.append_history(snapshot.clone()).await?;
        if self.policy.exists(&snapshot) {
            self.store.upsert_state(snapshot).await?;
        } else {
            self.store.delete_state(&event.entity).await?;
        }
        Ok(())
    }

    /// Poll until cancelled or a fatal error, mirroring the confirmed
    /// syncer's cadence: capped windows chain immediately, everything else
    /// sleeps one poll interval.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SyncError> {
        let mut backoff = self.retry.backoff();
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let started = tokio::time::Instant::now();
            match self.aggregate_once().await {
                Ok(Progress::Capped(to)) => {
                    backoff.on_success(started);
                    tracing::debug!(contract = %self.contract, to, "aggregation catching up");
                }
                Ok(_) => {
                    backoff.on_success(started);
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(err) if err.is_retryable() => {
                    tracing::warn!(contract = %self.contract, error = %err, "aggregation failed");
                    if !backoff.wait(&cancel).await {
                        return Ok(());
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
