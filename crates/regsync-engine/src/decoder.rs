//! Event decoder/enricher — raw logs to typed registry events.
//!
//! Decoding maps a log's topic 0 through the policy's static signature
//! table. Kinds whose log payload only signals "something changed" are
//! enriched with two pinned contract reads (at the event's block and the
//! block before) whose diff recovers the before/after field values.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use regsync_core::error::SyncError;
use regsync_core::policy::RegistryPolicy;
use regsync_core::types::{EventFields, RawLog, RegistryEvent};

use crate::client::ChainClient;

/// Default bound on the block-time cache.
pub const DEFAULT_BLOCK_TIME_CACHE: usize = 512;

/// Decodes raw logs into [`RegistryEvent`]s for one registry contract.
///
/// Owns its block-time cache, so engines for different registries in one
/// process never share cache state.
pub struct EventDecoder<C> {
    client: Arc<C>,
    policy: Arc<dyn RegistryPolicy>,
    contract: String,
    block_times: Mutex<LruCache<u64, i64>>,
}

impl<C: ChainClient> EventDecoder<C> {
    pub fn new(
        client: Arc<C>,
        policy: Arc<dyn RegistryPolicy>,
        contract: impl Into<String>,
        cache_size: usize,
    ) -> Self {
        let cap = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            client,
            policy,
            contract: contract.into(),
            block_times: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Decode one raw log.
    ///
    /// Returns `Ok(None)` for logs that are not this registry's events —
    /// unknown topics are expected noise from a shared contract, and a
    /// malformed payload for a known topic is dropped with a warning.
    /// `enrich` is false on the pending path: previews are best-effort and
    /// skip the pinned before/after reads.
    pub async fn decode(
        &self,
        log: &RawLog,
        enrich: bool,
    ) -> Result<Option<RegistryEvent>, SyncError> {
        let Some(topic0) = log.topic0() else {
            return Ok(None);
        };
        let Some(kind) = self.policy.kind_for_topic(topic0) else {
            return Ok(None);
        };
        let Some(decoded) = self.policy.decode(kind, log) else {
            tracing::warn!(
                registry = self.policy.registry(),
                %kind,
                dedup = %log.dedup(),
                "malformed payload for known event topic, dropping"
            );
            return Ok(None);
        };

        let (mut before, mut after) = (decoded.before, decoded.after);
        if enrich && self.policy.needs_enrichment(kind) {
            let block = log.block_number;
            let prior = self
                .client
                .entity_at(&self.contract, &decoded.entity, block.saturating_sub(1))
                .await?
                .unwrap_or_default();
            let current = self
                .client
                .entity_at(&self.contract, &decoded.entity, block)
                .await?
                .unwrap_or_default();
            (before, after) = diff_fields(prior, current);
        }

        let block_time = self.block_time(log.block_number).await?;
        Ok(Some(RegistryEvent {
            contract: self.contract.clone(),
            block_hash: log.block_hash.clone(),
            tx_hash: log.tx_hash.clone(),
            dedup: log.dedup(),
            kind,
            entity: decoded.entity,
            before,
            after,
            block_time,
        }))
    }

    /// Block timestamp through the bounded LRU cache; many events share a
    /// block and only the first pays a header fetch.
    async fn block_time(&self, number: u64) -> Result<i64, SyncError> {
        if let Some(time) = self.block_times.lock().unwrap().get(&number) {
            return Ok(*time);
        }
        let header = self
            .client
            .header_by_number(number)
            .await?
            .ok_or_else(|| SyncError::Rpc(format!("missing header for block {number}")))?;
        self.block_times.lock().unwrap().put(number, header.timestamp);
        Ok(header.timestamp)
    }
}

/// Keep only the fields that actually changed between two pinned reads.
fn diff_fields(before: EventFields, after: EventFields) -> (EventFields, EventFields) {
    let mut b = EventFields::default();
    let mut a = EventFields::default();
    if before.owner != after.owner {
        b.owner = before.owner;
        a.owner = after.owner;
    }
    if before.location != after.location {
        b.location = before.location;
        a.location = after.location;
    }
    if before.frequency_plan != after.frequency_plan {
        b.frequency_plan = before.frequency_plan;
        a.frequency_plan = after.frequency_plan;
    }
    if before.params != after.params {
        b.params = before.params;
        a.params = after.params;
    }
    (b, a)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
