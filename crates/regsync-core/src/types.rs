//! Shared types for the registry sync pipeline.

use serde::{Deserialize, Serialize};

// ─── EntityKey ───────────────────────────────────────────────────────────────

/// 32-byte identifier of a registry entity (gateway, router, or mapper).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EntityKey(pub [u8; 32]);

impl EntityKey {
    /// Parse from a hex string, with or without a `0x` prefix.
    ///
    /// Returns `None` unless the input is exactly 64 hex characters.
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.len() != 64 {
            return None;
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(out))
    }

    /// Returns the `0x`-prefixed lowercase hex form.
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(66);
        s.push_str("0x");
        for b in &self.0 {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ─── DedupKey ────────────────────────────────────────────────────────────────

/// Unique identity of one chain log: (block number, tx index, log index).
///
/// The derived `Ord` is the canonical event application order — events must
/// be replayed in exactly this order for last-value-wins reduction to hold.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct DedupKey {
    pub block_number: u64,
    pub tx_index: u32,
    pub log_index: u32,
}

impl DedupKey {
    pub fn new(block_number: u64, tx_index: u32, log_index: u32) -> Self {
        Self {
            block_number,
            tx_index,
            log_index,
        }
    }

    /// Smallest key within `block` (for range scan bounds).
    pub fn block_floor(block: u64) -> Self {
        Self::new(block, 0, 0)
    }

    /// Largest key within `block` (for range scan bounds).
    pub fn block_ceil(block: u64) -> Self {
        Self::new(block, u32::MAX, u32::MAX)
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.block_number, self.tx_index, self.log_index)
    }
}

// ─── EventKind ───────────────────────────────────────────────────────────────

/// The closed set of registry event kinds.
///
/// Each registry contract emits a subset of these; the per-registry topic
/// table (see `RegistryPolicy::topic_table`) maps raw log signatures here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Entity registered/onboarded for the first time.
    Onboarded,
    /// Entity attributes changed in place.
    Updated,
    /// Entity ownership transferred.
    Transferred,
    /// Entity removed/offboarded from the registry.
    Offboarded,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Onboarded => "onboarded",
            Self::Updated => "updated",
            Self::Transferred => "transferred",
            Self::Offboarded => "offboarded",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "onboarded" => Some(Self::Onboarded),
            "updated" => Some(Self::Updated),
            "transferred" => Some(Self::Transferred),
            "offboarded" => Some(Self::Offboarded),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── EventFields ─────────────────────────────────────────────────────────────

/// Registry entity attributes carried by an event, each optional.
///
/// `before`/`after` pairs of this struct describe the field delta a single
/// event caused. Fields irrelevant to a given registry stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFields {
    /// Owner account (`0x…` address).
    pub owner: Option<String>,
    /// Asserted location (hex-encoded geo index).
    pub location: Option<String>,
    /// Frequency plan identifier (mappers); 0 is the invalid plan.
    pub frequency_plan: Option<u32>,
    /// Registry-specific network parameters.
    pub params: Option<serde_json::Value>,
}

impl EventFields {
    pub fn is_empty(&self) -> bool {
        self.owner.is_none()
            && self.location.is_none()
            && self.frequency_plan.is_none()
            && self.params.is_none()
    }
}

// ─── RegistryEvent ───────────────────────────────────────────────────────────

/// An immutable fact extracted from one chain log.
///
/// Identified by its [`DedupKey`]; writing the same event twice must leave
/// the store unchanged (re-scanning overlapping ranges is expected).
/// The same shape is used for unconfirmed ("pending") observations, which
/// are keyed identically so the confirmed counterpart can retract them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEvent {
    /// Registry contract address (`0x…`).
    pub contract: String,
    /// Hash of the containing block.
    pub block_hash: String,
    /// Transaction hash.
    pub tx_hash: String,
    /// Position of the log, also the event's identity and sort order.
    pub dedup: DedupKey,
    /// What happened.
    pub kind: EventKind,
    /// Which entity it happened to.
    pub entity: EntityKey,
    /// Field values before the event (populated by enrichment where the log
    /// payload alone is insufficient).
    pub before: EventFields,
    /// Field values after the event.
    pub after: EventFields,
    /// Wall-clock time of the containing block (unix seconds).
    pub block_time: i64,
}

impl RegistryEvent {
    pub fn block_number(&self) -> u64 {
        self.dedup.block_number
    }
}

// ─── EntitySnapshot ──────────────────────────────────────────────────────────

/// Full attribute snapshot of one entity after applying an event.
///
/// Used both as the current-state record (absence of a row *is* the deleted
/// state; there is no tombstone) and as the append-only history record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity: EntityKey,
    pub owner: Option<String>,
    pub location: Option<String>,
    pub frequency_plan: Option<u32>,
    pub params: Option<serde_json::Value>,
    /// Hash of the transaction whose event produced this snapshot.
    pub tx_hash: String,
    /// Position of the producing event.
    pub dedup: DedupKey,
    /// Block time at which the event applied (unix seconds).
    pub applied_at: i64,
}

impl EntitySnapshot {
    /// A blank seed for an entity with no prior history.
    pub fn seed(entity: EntityKey) -> Self {
        Self {
            entity,
            owner: None,
            location: None,
            frequency_plan: None,
            params: None,
            tx_hash: String::new(),
            dedup: DedupKey::default(),
            applied_at: 0,
        }
    }
}

// ─── SyncProcess ─────────────────────────────────────────────────────────────

/// Logical process names owning a checkpoint.
///
/// Each process mutates only its own checkpoint; the Aggregator additionally
/// reads the Ingestor's to enforce the never-ahead invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncProcess {
    Ingestor,
    Aggregator,
}

impl SyncProcess {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingestor => "ingestor",
            Self::Aggregator => "aggregator",
        }
    }
}

impl std::fmt::Display for SyncProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── RawLog ──────────────────────────────────────────────────────────────────

/// A raw, undecoded chain log as delivered by the chain client.
///
/// Kept chain-agnostic in core so registry policies can decode without a
/// dependency on any concrete RPC crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub block_hash: String,
    pub tx_hash: String,
    pub tx_index: u32,
    pub log_index: u32,
}

impl RawLog {
    /// The event signature hash (topic 0), if present.
    pub fn topic0(&self) -> Option<&str> {
        self.topics.first().map(String::as_str)
    }

    pub fn dedup(&self) -> DedupKey {
        DedupKey::new(self.block_number, self.tx_index, self.log_index)
    }
}

/// Parse a hex-encoded string (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> u64 {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).unwrap_or(0)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
