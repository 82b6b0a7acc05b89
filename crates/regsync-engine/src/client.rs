//! The chain-client seam.
//!
//! The engine assumes an underlying chain client capable of: returning the
//! latest header, checking code presence at a height, filtering logs by
//! address/topic/range, subscribing to live logs, and making historical
//! contract-state reads pinned to a block height. Everything else (transport,
//! retries below the RPC surface, endpoint selection) is the embedder's
//! concern.

use async_trait::async_trait;
use futures::stream::BoxStream;

use regsync_core::error::SyncError;
use regsync_core::types::{EntityKey, EventFields, RawLog};

/// A minimal block header — enough for range computation and timestamping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block number.
    pub number: u64,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
}

/// Live log stream handed out by [`ChainClient::subscribe_logs`].
pub type LogStream = BoxStream<'static, Result<RawLog, SyncError>>;

/// Trait for fetching chain data from a node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The current chain head.
    async fn latest_header(&self) -> Result<BlockHeader, SyncError>;

    /// The header of a specific block, or `None` if unknown to the node.
    async fn header_by_number(&self, number: u64) -> Result<Option<BlockHeader>, SyncError>;

    /// Whether contract code exists at `address` as of `block`.
    async fn has_code(&self, address: &str, block: u64) -> Result<bool, SyncError>;

    /// All logs emitted by `address` with a topic 0 in `topics`, within
    /// `[from, to]` inclusive.
    async fn logs(
        &self,
        address: &str,
        topics: &[String],
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, SyncError>;

    /// Subscribe to live (not yet confirmed) logs for `address`/`topics`.
    async fn subscribe_logs(
        &self,
        address: &str,
        topics: &[String],
    ) -> Result<LogStream, SyncError>;

    /// Historical contract-state read pinned to `block`: the registry's
    /// record for `entity` as of that height. `None` for an entity the
    /// contract did not know at that height (a normal result, not an error).
    async fn entity_at(
        &self,
        contract: &str,
        entity: &EntityKey,
        block: u64,
    ) -> Result<Option<EventFields>, SyncError>;

    /// Re-establish the underlying connection. Called once per confirmed
    /// sync iteration to bound the blast radius of a stuck connection;
    /// stateless clients keep the default no-op.
    async fn reconnect(&self) -> Result<(), SyncError> {
        Ok(())
    }
}
