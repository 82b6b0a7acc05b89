//! Synthetic partitioning for the confirmed event log.
//!
//! On backends without native ordered range scans per hot key, every event
//! for one contract would collapse onto a single partition. The range index
//! is instead sharded across a fixed number of synthetic partitions keyed by
//! a hash of the transaction hash; range reads fan out across all shards and
//! k-way merge the results back into (block, tx-index, log-index) order.
//! Bounded, constant-factor read amplification buys write-side scalability.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use regsync_core::types::RegistryEvent;

/// Default synthetic partition count.
pub const DEFAULT_SHARDS: usize = 256;

/// The shard an event's transaction hash maps to, in `[0, shards)`.
pub fn shard_of(tx_hash: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    tx_hash.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

/// Merge per-shard result lists (each already in dedup-key order) into one
/// list in global dedup-key order.
pub fn merge_by_dedup(parts: Vec<Vec<RegistryEvent>>) -> Vec<RegistryEvent> {
    let total: usize = parts.iter().map(Vec::len).sum();
    let mut merged = Vec::with_capacity(total);

    // (next key, shard index, position within shard)
    let mut heap = BinaryHeap::with_capacity(parts.len());
    for (shard, part) in parts.iter().enumerate() {
        if let Some(event) = part.first() {
            heap.push(Reverse((event.dedup, shard, 0usize)));
        }
    }

    while let Some(Reverse((_, shard, pos))) = heap.pop() {
        merged.push(parts[shard][pos].clone());
        if let Some(event) = parts[shard].get(pos + 1) {
            heap.push(Reverse((event.dedup, shard, pos + 1)));
        }
    }
    merged
}

// ─── Tests ───────────────────────────────────────────────────────────────────
