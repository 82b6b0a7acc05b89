//! Block-range oracle — decides which block window to scan next.

use std::sync::Arc;

use regsync_core::error::SyncError;
use regsync_core::store::RegistryStore;
use regsync_core::types::SyncProcess;

use crate::client::ChainClient;

/// A scan window computed by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    /// First block to scan (inclusive). Deliberately re-includes the last
    /// synced block; the duplicate events this causes are absorbed by the
    /// idempotent event upsert, guaranteeing no block is silently skipped.
    pub from: u64,
    /// Last block to scan (inclusive).
    pub to: u64,
    /// `true` when the window was truncated to the max span and further
    /// catch-up iterations should follow without sleeping.
    pub capped: bool,
}

/// Computes `[from, to]` scan windows behind the confirmation depth, and
/// discovers a contract's deployment block when no checkpoint exists yet.
pub struct BlockRangeOracle<C> {
    client: Arc<C>,
    store: Arc<dyn RegistryStore>,
    contract: String,
    confirmations: u64,
    max_span: u64,
}

impl<C: ChainClient> BlockRangeOracle<C> {
    pub fn new(
        client: Arc<C>,
        store: Arc<dyn RegistryStore>,
        contract: impl Into<String>,
        confirmations: u64,
        max_span: u64,
    ) -> Self {
        Self {
            client,
            store,
            contract: contract.into(),
            confirmations,
            max_span,
        }
    }

    /// The height to resume scanning from: the Ingestor checkpoint, or — on
    /// a fresh deployment with no checkpoint — the contract's deployment
    /// block, found by binary search.
    pub async fn sync_from_block(&self) -> Result<u64, SyncError> {
        let checkpoint = self
            .store
            .checkpoint(SyncProcess::Ingestor, &self.contract)
            .await?;
        if checkpoint != 0 {
            return Ok(checkpoint);
        }
        self.find_deployment_block().await
    }

    /// Binary search `[0, head]` for the `no code → code` boundary.
    ///
    /// Converges in `O(log head)` code-presence queries; the window collapses
    /// to adjacent blocks and the lower bound — one block below the
    /// deployment — is returned, so the first scan window covers the
    /// deployment block itself. Runs once per fresh deployment only.
    pub async fn find_deployment_block(&self) -> Result<u64, SyncError> {
        let head = self.client.latest_header().await?.number;
        let mut lo = 0u64;
        let mut hi = head;
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.client.has_code(&self.contract, mid).await? {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        tracing::info!(
            contract = %self.contract,
            deployed_at = lo,
            "deployment block discovered"
        );
        Ok(lo)
    }

    /// The next scan window starting at `from`, or `None` when there is
    /// nothing confirmed to scan yet.
    ///
    /// Fails retryably while the chain is shorter than the confirmation
    /// depth.
    pub async fn sync_to_block(&self, from: u64) -> Result<Option<ScanRange>, SyncError> {
        let head = self.client.latest_header().await?.number;
        if head < self.confirmations {
            return Err(SyncError::InsufficientConfirmations {
                head,
                confirmations: self.confirmations,
            });
        }
        let max_block = head - self.confirmations;
        if from >= max_block {
            return Ok(None);
        }
        let to = (from + self.max_span).min(max_block);
        Ok(Some(ScanRange {
            from,
            to,
            capped: to < max_block,
        }))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockChain;
    use regsync_core::store::CheckpointStore;
    use regsync_store::MemoryStore;

    const CONTRACT: &str = "0xdddddddddddddddddddddddddddddddddddddddd";

    fn oracle(chain: Arc<MockChain>, confirmations: u64, max_span: u64) -> BlockRangeOracle<MockChain> {
        BlockRangeOracle::new(
            chain,
            Arc::new(MemoryStore::with_shards(2)),
            CONTRACT,
            confirmations,
            max_span,
        )
    }

    #[tokio::test]
    async fn deployment_search_converges_in_log_calls() {
        let chain = Arc::new(MockChain::new(1_000_000));
        chain.set_code_from(CONTRACT, 777);

        let oracle = oracle(chain.clone(), 12, 1_000);
        let found = oracle.find_deployment_block().await.unwrap();
        // One block below the deployment, never past it.
        assert_eq!(found, 776);

        // log2(1_000_000) ≈ 20 — allow slack but forbid a linear scan.
        assert!(chain.code_queries() <= 25, "{} queries", chain.code_queries());
    }

    #[tokio::test]
    async fn sync_from_uses_checkpoint_when_present() {
        let chain = Arc::new(MockChain::new(10_000));
        chain.set_code_from(CONTRACT, 777);
        let store = Arc::new(MemoryStore::with_shards(2));
        store
            .set_checkpoint(SyncProcess::Ingestor, CONTRACT, 5_000)
            .await
            .unwrap();

        let oracle =
            BlockRangeOracle::new(chain.clone(), store, CONTRACT, 12, 1_000);
        assert_eq!(oracle.sync_from_block().await.unwrap(), 5_000);
        assert_eq!(chain.code_queries(), 0); // no discovery needed
    }

    #[tokio::test]
    async fn insufficient_confirmations_is_retryable() {
        let chain = Arc::new(MockChain::new(5));
        let oracle = oracle(chain, 12, 1_000);
        let err = oracle.sync_to_block(0).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn nothing_to_do_when_caught_up() {
        let chain = Arc::new(MockChain::new(112));
        let oracle = oracle(chain, 12, 1_000);
        // max_block = 100; from == max_block means fully synced.
        assert!(oracle.sync_to_block(100).await.unwrap().is_none());
        assert!(oracle.sync_to_block(150).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn window_capped_at_max_span() {
        let chain = Arc::new(MockChain::new(1_000_012));
        let oracle = oracle(chain, 12, 100_000);

        let range = oracle.sync_to_block(0).await.unwrap().unwrap();
        assert_eq!(range.to, 100_000);
        assert!(range.capped);

        let range = oracle.sync_to_block(950_000).await.unwrap().unwrap();
        assert_eq!(range.to, 1_000_000);
        assert!(!range.capped);
    }
}
