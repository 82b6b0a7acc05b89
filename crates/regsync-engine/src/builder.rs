//! Engine assembly — one builder wiring client, store, and policy into the
//! three sync processes for a registry contract.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use regsync_core::error::SyncError;
use regsync_core::policy::RegistryPolicy;
use regsync_core::retry::RetryPolicy;
use regsync_core::store::RegistryStore;

use crate::aggregator::Aggregator;
use crate::client::ChainClient;
use crate::confirmed::ConfirmedSyncer;
use crate::decoder::{EventDecoder, DEFAULT_BLOCK_TIME_CACHE};
use crate::ingestor::Ingestor;
use crate::oracle::BlockRangeOracle;
use crate::pending::PendingSyncer;
use crate::supervisor::Supervisor;

/// Tunables for one registry engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Registry contract address (`0x…`).
    pub contract: String,
    /// Blocks behind the head treated as confirmed. 0 disables the pending
    /// syncer.
    pub confirmations: u64,
    /// Largest scan/replay window per iteration.
    pub max_span: u64,
    /// Sleep between iterations once caught up.
    pub poll_interval: Duration,
    /// Entries in the decoder's block-time cache.
    pub block_time_cache: usize,
    /// Backoff for retryable failures and lost subscriptions.
    pub retry: RetryPolicy,
}

impl EngineConfig {
    pub fn new(contract: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            confirmations: 12,
            max_span: 10_000,
            poll_interval: Duration::from_secs(10),
            block_time_cache: DEFAULT_BLOCK_TIME_CACHE,
            retry: RetryPolicy::default(),
        }
    }
}

/// Fluent builder for a [`RegistryEngine`].
pub struct EngineBuilder<C> {
    client: Arc<C>,
    store: Arc<dyn RegistryStore>,
    policy: Arc<dyn RegistryPolicy>,
    config: EngineConfig,
}

impl<C: ChainClient + 'static> EngineBuilder<C> {
    pub fn new(
        client: Arc<C>,
        store: Arc<dyn RegistryStore>,
        policy: Arc<dyn RegistryPolicy>,
        contract: impl Into<String>,
    ) -> Self {
        Self {
            client,
            store,
            policy,
            config: EngineConfig::new(contract),
        }
    }

    pub fn confirmations(mut self, confirmations: u64) -> Self {
        self.config.confirmations = confirmations;
        self
    }

    pub fn max_span(mut self, max_span: u64) -> Self {
        self.config.max_span = max_span;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn block_time_cache(mut self, entries: usize) -> Self {
        self.config.block_time_cache = entries;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn build(self) -> RegistryEngine<C> {
        let Self {
            client,
            store,
            policy,
            config,
        } = self;

        let oracle = BlockRangeOracle::new(
            client.clone(),
            store.clone(),
            config.contract.clone(),
            config.confirmations,
            config.max_span,
        );
        let decoder = Arc::new(EventDecoder::new(
            client.clone(),
            policy.clone(),
            config.contract.clone(),
            config.block_time_cache,
        ));
        let ingestor = Arc::new(Ingestor::new(
            store.clone(),
            policy.clone(),
            config.contract.clone(),
        ));

        let confirmed = Arc::new(ConfirmedSyncer::new(
            client.clone(),
            oracle,
            decoder.clone(),
            ingestor.clone(),
            policy.clone(),
            config.contract.clone(),
            config.poll_interval,
            config.retry,
        ));
        let pending = Arc::new(PendingSyncer::new(
            client,
            decoder,
            ingestor,
            policy.clone(),
            config.contract.clone(),
            config.confirmations,
            config.retry,
        ));
        let aggregator = Arc::new(Aggregator::new(
            store,
            policy.clone(),
            config.contract,
            config.max_span,
            config.poll_interval,
            config.retry,
        ));

        RegistryEngine {
            registry: policy.registry(),
            confirmed,
            pending,
            aggregator,
        }
    }
}

/// The assembled sync processes for one registry contract.
pub struct RegistryEngine<C> {
    registry: &'static str,
    confirmed: Arc<ConfirmedSyncer<C>>,
    pending: Arc<PendingSyncer<C>>,
    aggregator: Arc<Aggregator>,
}

impl<C: ChainClient + 'static> RegistryEngine<C> {
    pub fn builder(
        client: Arc<C>,
        store: Arc<dyn RegistryStore>,
        policy: Arc<dyn RegistryPolicy>,
        contract: impl Into<String>,
    ) -> EngineBuilder<C> {
        EngineBuilder::new(client, store, policy, contract)
    }

    pub fn registry(&self) -> &'static str {
        self.registry
    }

    /// Register this engine's three loops with a supervisor. Engines for
    /// several registries can share one supervisor and fail together.
    pub fn spawn_into(&self, supervisor: &mut Supervisor) {
        let cancel = supervisor.cancel_token();
        let confirmed = self.confirmed.clone();
        supervisor.spawn("confirmed-syncer", {
            let cancel = cancel.clone();
            async move { confirmed.run(cancel).await }
        });
        let pending = self.pending.clone();
        supervisor.spawn("pending-syncer", {
            let cancel = cancel.clone();
            async move { pending.run(cancel).await }
        });
        let aggregator = self.aggregator.clone();
        supervisor.spawn("aggregator", async move { aggregator.run(cancel).await });
    }

    /// Run all three loops until `cancel` fires or one fails fatally.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SyncError> {
        let mut supervisor = Supervisor::new();
        self.spawn_into(&mut supervisor);
        let inner = supervisor.cancel_token();
        let forward = tokio::spawn(async move {
            cancel.cancelled().await;
            inner.cancel();
        });
        let result = supervisor.join().await;
        forward.abort();
        result
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockChain;
    use regsync_core::registries::GatewayRegistry;
    use regsync_core::store::{CheckpointStore, StateStore};
    use regsync_core::types::{EntityKey, EventKind, RawLog, SyncProcess};
    use regsync_store::MemoryStore;

    const CONTRACT: &str = "0x7777777777777777777777777777777777777777";

    fn onboard_log(entity_byte: u8, block: u64) -> RawLog {
        let topic = GatewayRegistry
            .topic_table()
            .iter()
            .find(|(_, k)| *k == EventKind::Onboarded)
            .map(|(sig, _)| (*sig).to_string())
            .unwrap();
        RawLog {
            address: CONTRACT.into(),
            topics: vec![
                topic,
                format!("0x{}", format!("{entity_byte:02x}").repeat(32)),
                format!("0x{}{}", "00".repeat(12), "ab".repeat(20)),
            ],
            data: "0x".into(),
            block_number: block,
            block_hash: format!("0xb{block:x}"),
            tx_hash: format!("0xt{block:x}"),
            tx_index: 0,
            log_index: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn engine_materializes_state_end_to_end() {
        let chain = Arc::new(MockChain::new(112));
        chain.set_code_from(CONTRACT, 1);
        chain.push_log(onboard_log(1, 50));
        let store = Arc::new(MemoryStore::with_shards(4));

        let engine = RegistryEngine::builder(
            chain.clone(),
            store.clone(),
            Arc::new(GatewayRegistry),
            CONTRACT,
        )
        .confirmations(12)
        .poll_interval(Duration::from_millis(100))
        .build();
        assert_eq!(engine.registry(), "gateway");

        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.run(cancel).await })
        };

        // Confirmed pass lands the event, the aggregator's next poll folds
        // it into state.
        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(
            store.checkpoint(SyncProcess::Ingestor, CONTRACT).await.unwrap(),
            100
        );
        assert_eq!(
            store
                .checkpoint(SyncProcess::Aggregator, CONTRACT)
                .await
                .unwrap(),
            100
        );
        let state = store.state(&EntityKey([1; 32])).await.unwrap().unwrap();
        assert_eq!(state.owner.as_deref(), Some(&*format!("0x{}", "ab".repeat(20))));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_stops_the_whole_engine() {
        let chain = Arc::new(MockChain::new(112));
        chain.set_code_from(CONTRACT, 1);
        let store = Arc::new(MemoryStore::with_shards(4));
        // Poisoned checkpoints: the aggregator is ahead of the ingestor.
        store
            .set_checkpoint(SyncProcess::Ingestor, CONTRACT, 100)
            .await
            .unwrap();
        store
            .set_checkpoint(SyncProcess::Aggregator, CONTRACT, 150)
            .await
            .unwrap();

        let engine = RegistryEngine::builder(
            chain,
            store,
            Arc::new(GatewayRegistry),
            CONTRACT,
        )
        .poll_interval(Duration::from_millis(100))
        .build();

        let err = engine.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, regsync_core::error::SyncError::CheckpointRace { .. }));
    }
}
