//! Confirmed syncer — polls finalized history behind the confirmation depth.
//!
//! Each iteration reconnects the client, asks the oracle for the next scan
//! window, fetches and decodes that window's logs, and hands them to the
//! ingestor as one unit. A capped window means the syncer is catching up and
//! the next iteration follows immediately; an uncapped or empty window means
//! it is at the confirmed frontier and sleeps one poll interval.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use regsync_core::error::SyncError;
use regsync_core::policy::RegistryPolicy;
use regsync_core::retry::RetryPolicy;

use crate::client::ChainClient;
use crate::decoder::EventDecoder;
use crate::ingestor::Ingestor;
use crate::oracle::BlockRangeOracle;

/// Outcome of one confirmed sync iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Nothing confirmed left to scan; sleep until the next poll.
    Idle,
    /// Scanned up to the confirmed frontier.
    Synced(u64),
    /// Scanned a max-span window with more history behind it; continue
    /// immediately.
    Capped(u64),
}

pub struct ConfirmedSyncer<C> {
    client: Arc<C>,
    oracle: BlockRangeOracle<C>,
    decoder: Arc<EventDecoder<C>>,
    ingestor: Arc<Ingestor>,
    policy: Arc<dyn RegistryPolicy>,
    contract: String,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl<C: ChainClient> ConfirmedSyncer<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<C>,
        oracle: BlockRangeOracle<C>,
        decoder: Arc<EventDecoder<C>>,
        ingestor: Arc<Ingestor>,
        policy: Arc<dyn RegistryPolicy>,
        contract: impl Into<String>,
        poll_interval: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            oracle,
            decoder,
            ingestor,
            policy,
            contract: contract.into(),
            poll_interval,
            retry,
        }
    }

    /// One sync iteration. The checkpoint only advances when the whole
    /// window recorded; any error leaves it untouched and the window is
    /// re-scanned next time.
    pub async fn sync_once(&self) -> Result<Progress, SyncError> {
        self.client.reconnect().await?;

        let from = self.oracle.sync_from_block().await?;
        let Some(range) = self.oracle.sync_to_block(from).await? else {
            return Ok(Progress::Idle);
        };

        let logs = self
            .client
            .logs(&self.contract, &self.policy.topics(), range.from, range.to)
            .await?;
        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            if let Some(event) = self.decoder.decode(log, true).await? {
                events.push(event);
            }
        }
        // eth_getLogs order is not contractual; reduction order is.
        events.sort_by_key(|e| e.dedup);

        tracing::info!(
            contract = %self.contract,
            from = range.from,
            to = range.to,
            events = events.len(),
            capped = range.capped,
            "confirmed window scanned"
        );
        self.ingestor.record_window(events, range.to).await?;

        Ok(if range.capped {
            Progress::Capped(range.to)
        } else {
            Progress::Synced(range.to)
        })
    }

    /// Poll until cancelled or a fatal error. Retryable errors back off and
    /// re-enter the loop; capped windows chain without sleeping.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SyncError> {
        let mut backoff = self.retry.backoff();
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let started = tokio::time::Instant::now();
            match self.sync_once().await {
                Ok(Progress::Capped(to)) => {
                    backoff.on_success(started);
                    tracing::debug!(contract = %self.contract, to, "catching up");
                }
                Ok(_) => {
                    backoff.on_success(started);
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(err) if err.is_retryable() => {
                    tracing::warn!(contract = %self.contract, error = %err, "confirmed sync failed");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockChain;
    use regsync_core::registries::GatewayRegistry;
    use regsync_core::store::{CheckpointStore, EventLog};
    use regsync_core::types::{EventKind, RawLog, SyncProcess};
    use regsync_store::MemoryStore;

    const CONTRACT: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn topic_for(kind: EventKind) -> String {
        GatewayRegistry
            .topic_table()
            .iter()
            .find(|(_, k)| *k == kind)
            .map(|(sig, _)| (*sig).to_string())
            .unwrap()
    }

    fn onboard_log(entity_byte: u8, block: u64, log_index: u32) -> RawLog {
        RawLog {
            address: CONTRACT.into(),
            topics: vec![
                topic_for(EventKind::Onboarded),
                format!("0x{}", format!("{entity_byte:02x}").repeat(32)),
                format!("0x{}{}", "00".repeat(12), "ab".repeat(20)),
            ],
            data: "0x".into(),
            block_number: block,
            block_hash: format!("0xb{block:x}"),
            tx_hash: format!("0xt{block:x}{log_index:x}"),
            tx_index: 0,
            log_index,
        }
    }

    fn syncer(
        chain: &Arc<MockChain>,
        store: &Arc<MemoryStore>,
        confirmations: u64,
        max_span: u64,
    ) -> ConfirmedSyncer<MockChain> {
        let policy: Arc<dyn RegistryPolicy> = Arc::new(GatewayRegistry);
        let store: Arc<dyn regsync_core::store::RegistryStore> = store.clone();
        ConfirmedSyncer::new(
            chain.clone(),
            BlockRangeOracle::new(chain.clone(), store.clone(), CONTRACT, confirmations, max_span),
            Arc::new(EventDecoder::new(chain.clone(), policy.clone(), CONTRACT, 64)),
            Arc::new(Ingestor::new(store, policy.clone(), CONTRACT)),
            policy,
            CONTRACT,
            Duration::from_secs(10),
            RetryPolicy::default(),
        )
    }

    #[tokio::test]
    async fn scans_window_and_advances_checkpoint() {
        let chain = Arc::new(MockChain::new(112));
        chain.set_code_from(CONTRACT, 1);
        chain.push_log(onboard_log(1, 50, 0));
        chain.push_log(onboard_log(2, 60, 0));
        let store = Arc::new(MemoryStore::with_shards(4));

        let s = syncer(&chain, &store, 12, 1_000);
        assert_eq!(s.sync_once().await.unwrap(), Progress::Synced(100));
        assert_eq!(store.event_count(), 2);
        assert_eq!(
            store.checkpoint(SyncProcess::Ingestor, CONTRACT).await.unwrap(),
            100
        );

        // At the frontier now.
        assert_eq!(s.sync_once().await.unwrap(), Progress::Idle);

        // The chain grows; the next poll picks up from the checkpoint.
        chain.set_head(212);
        assert_eq!(s.sync_once().await.unwrap(), Progress::Synced(200));
    }

    #[tokio::test]
    async fn capped_catch_up_chains_windows() {
        let chain = Arc::new(MockChain::new(500_012));
        chain.set_code_from(CONTRACT, 0);
        let store = Arc::new(MemoryStore::with_shards(4));

        let s = syncer(&chain, &store, 12, 100_000);
        let mut progress = Vec::new();
        loop {
            match s.sync_once().await.unwrap() {
                Progress::Idle => break,
                p => progress.push(p),
            }
        }
        assert_eq!(
            progress,
            vec![
                Progress::Capped(100_000),
                Progress::Capped(200_000),
                Progress::Capped(300_000),
                Progress::Capped(400_000),
                Progress::Synced(500_000),
            ]
        );
        // One log fetch per window, never per block.
        assert_eq!(chain.log_queries(), 5);
    }

    #[tokio::test]
    async fn overlapping_windows_do_not_duplicate_events() {
        let chain = Arc::new(MockChain::new(312));
        chain.set_code_from(CONTRACT, 1);
        // An event exactly on the window boundary gets scanned twice.
        chain.push_log(onboard_log(1, 100, 0));
        let store = Arc::new(MemoryStore::with_shards(4));

        let s = syncer(&chain, &store, 12, 100);
        // [0, 100] then [100, 200] then [200, 300].
        while s.sync_once().await.unwrap() != Progress::Idle {}

        assert_eq!(store.event_count(), 1);
        let events = store.range_by_block(CONTRACT, 0, 300).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].block_number(), 100);
    }

    #[tokio::test]
    async fn error_leaves_checkpoint_untouched() {
        // Head below the confirmation depth: sync_once fails retryably and
        // the checkpoint stays at its sentinel.
        let chain = Arc::new(MockChain::new(5));
        chain.set_code_from(CONTRACT, 1);
        let store = Arc::new(MemoryStore::with_shards(4));

        let s = syncer(&chain, &store, 12, 1_000);
        let err = s.sync_once().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            store.checkpoint(SyncProcess::Ingestor, CONTRACT).await.unwrap(),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_observes_cancellation() {
        let chain = Arc::new(MockChain::new(112));
        chain.set_code_from(CONTRACT, 1);
        let store = Arc::new(MemoryStore::with_shards(4));

        let s = Arc::new(syncer(&chain, &store, 12, 1_000));
        let cancel = CancellationToken::new();
        let handle = {
            let s = s.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { s.run(cancel).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }
}
