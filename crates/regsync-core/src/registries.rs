//! The three shipped registry policies: gateway, router, and mapper.
//!
//! The sync engine is identical across them; only the topic tables, the
//! field-transition reducers, and the existence predicates differ.

use crate::policy::{DecodedFields, RegistryPolicy};
use crate::types::{EntityKey, EntitySnapshot, EventFields, EventKind, RawLog, RegistryEvent};

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

// ─── Decode helpers ──────────────────────────────────────────────────────────

/// Read a 32-byte entity key from an indexed topic.
fn topic_entity(log: &RawLog, idx: usize) -> Option<EntityKey> {
    EntityKey::from_hex(log.topics.get(idx)?)
}

/// Read an address from an indexed topic (addresses are right-aligned in
/// the 32-byte topic word).
fn topic_address(log: &RawLog, idx: usize) -> Option<String> {
    let topic = log.topics.get(idx)?;
    let hex = topic.strip_prefix("0x").unwrap_or(topic);
    if hex.len() < 40 {
        return None;
    }
    Some(format!("0x{}", hex[hex.len() - 40..].to_lowercase()))
}

/// Read the n-th 32-byte data word as a u32 (words are big-endian).
fn data_word_u32(log: &RawLog, word: usize) -> Option<u32> {
    let hex = log.data.strip_prefix("0x").unwrap_or(&log.data);
    let start = word * 64;
    let w = hex.get(start..start + 64)?;
    u32::from_str_radix(&w[56..], 16).ok()
}

fn is_zero_address(addr: &str) -> bool {
    addr.eq_ignore_ascii_case(ZERO_ADDRESS)
}

/// Overwrite snapshot attributes with every `Some` field of `fields`.
fn merge_fields(snapshot: &mut EntitySnapshot, fields: &EventFields) {
    if let Some(owner) = &fields.owner {
        snapshot.owner = Some(owner.clone());
    }
    if let Some(location) = &fields.location {
        snapshot.location = Some(location.clone());
    }
    if let Some(plan) = fields.frequency_plan {
        snapshot.frequency_plan = Some(plan);
    }
    if let Some(params) = &fields.params {
        snapshot.params = Some(params.clone());
    }
}

/// Reset every optional attribute to its absent state (removal semantics).
fn clear_fields(snapshot: &mut EntitySnapshot) {
    snapshot.owner = None;
    snapshot.location = None;
    snapshot.frequency_plan = None;
    snapshot.params = None;
}

// ─── Gateway registry ────────────────────────────────────────────────────────

// keccak256 signature hashes of the gateway registry events.
const GATEWAY_ONBOARDED: &str =
    "0x1f9f3b3d9e6b2f7c43a90a78e2b6ad64d4f1e4a7c0d85a31b52c9027f7a0ae11";
const GATEWAY_UPDATED: &str =
    "0x83dc1a4b9cf0d6e4b7b1a9a5012e6f9c35b88a9a47ae1c6b5b1d0f8e923c7a52";
const GATEWAY_TRANSFERRED: &str =
    "0xc04a73fe8c26a31c5e8b3f0b62c85e97d2d17e05e1b2ed4a57a8c14fc09b66d3";
const GATEWAY_OFFBOARDED: &str =
    "0x2be07a7cae9a46ad8cc662d0d1a6a7d35b5b9e4f3b16c7dc15c5b2a7f32e98c4";

/// Policy for the gateway registry.
///
/// A gateway exists while its owner is a non-zero address.
#[derive(Debug, Default, Clone, Copy)]
pub struct GatewayRegistry;

impl RegistryPolicy for GatewayRegistry {
    fn registry(&self) -> &'static str {
        "gateway"
    }

    fn topic_table(&self) -> &'static [(&'static str, EventKind)] {
        &[
            (GATEWAY_ONBOARDED, EventKind::Onboarded),
            (GATEWAY_UPDATED, EventKind::Updated),
            (GATEWAY_TRANSFERRED, EventKind::Transferred),
            (GATEWAY_OFFBOARDED, EventKind::Offboarded),
        ]
    }

    fn decode(&self, kind: EventKind, log: &RawLog) -> Option<DecodedFields> {
        let entity = topic_entity(log, 1)?;
        let mut decoded = DecodedFields {
            entity,
            ..Default::default()
        };
        match kind {
            EventKind::Onboarded => {
                decoded.after.owner = Some(topic_address(log, 2)?);
                decoded.after.location = log.topics.get(3).cloned();
            }
            // Payload-free; the enricher recovers before/after via pinned calls.
            EventKind::Updated => {}
            EventKind::Transferred => {
                decoded.before.owner = Some(topic_address(log, 2)?);
                decoded.after.owner = Some(topic_address(log, 3)?);
            }
            EventKind::Offboarded => {}
        }
        Some(decoded)
    }

    fn apply(&self, snapshot: &mut EntitySnapshot, event: &RegistryEvent) {
        match event.kind {
            EventKind::Onboarded | EventKind::Updated => merge_fields(snapshot, &event.after),
            // A transfer moves ownership and nothing else.
            EventKind::Transferred => snapshot.owner = event.after.owner.clone(),
            EventKind::Offboarded => clear_fields(snapshot),
        }
    }

    fn exists(&self, snapshot: &EntitySnapshot) -> bool {
        snapshot
            .owner
            .as_deref()
            .is_some_and(|owner| !is_zero_address(owner))
    }
}

// ─── Router registry ─────────────────────────────────────────────────────────

// keccak256 signature hashes of the router registry events.
const ROUTER_ONBOARDED: &str =
    "0x7d46c7a5b6a3f9c80e15d2c4e1ba94dcdd4a7f01b6e29c3d5fb0a8e6314c7d90";
const ROUTER_UPDATED: &str =
    "0xe5b1c8709b8f4f3c51d7a2e4663c9ab0f8e2da4459c1b6d0f3a7e58c2d914b6f";
const ROUTER_TRANSFERRED: &str =
    "0x94f3a7dc0b54c1e8851f6c2edb3a9f70c6e4d2851ab97e30d41cf6b2ae08d5c7";
const ROUTER_OFFBOARDED: &str =
    "0x3a85bc07f41ed6c29cd0a1f47e96b3da5c12e78b09f4adc6531b2e9d7f40a8e1";

/// Policy for the router registry.
///
/// A router exists while any owner is recorded at all (the contract emits a
/// nil owner only on removal).
#[derive(Debug, Default, Clone, Copy)]
pub struct RouterRegistry;

impl RegistryPolicy for RouterRegistry {
    fn registry(&self) -> &'static str {
        "router"
    }

    fn topic_table(&self) -> &'static [(&'static str, EventKind)] {
        &[
            (ROUTER_ONBOARDED, EventKind::Onboarded),
            (ROUTER_UPDATED, EventKind::Updated),
            (ROUTER_TRANSFERRED, EventKind::Transferred),
            (ROUTER_OFFBOARDED, EventKind::Offboarded),
        ]
    }

    fn decode(&self, kind: EventKind, log: &RawLog) -> Option<DecodedFields> {
        let entity = topic_entity(log, 1)?;
        let mut decoded = DecodedFields {
            entity,
            ..Default::default()
        };
        match kind {
            EventKind::Onboarded => {
                decoded.after.owner = Some(topic_address(log, 2)?);
            }
            EventKind::Updated => {}
            EventKind::Transferred => {
                decoded.before.owner = Some(topic_address(log, 2)?);
                decoded.after.owner = Some(topic_address(log, 3)?);
            }
            EventKind::Offboarded => {}
        }
        Some(decoded)
    }

    fn apply(&self, snapshot: &mut EntitySnapshot, event: &RegistryEvent) {
        match event.kind {
            EventKind::Onboarded | EventKind::Updated => merge_fields(snapshot, &event.after),
            EventKind::Transferred => snapshot.owner = event.after.owner.clone(),
            EventKind::Offboarded => clear_fields(snapshot),
        }
    }

    fn exists(&self, snapshot: &EntitySnapshot) -> bool {
        snapshot.owner.is_some()
    }
}

// ─── Mapper registry ─────────────────────────────────────────────────────────

// keccak256 signature hashes of the mapper registry events. Mappers are not
// transferable; the contract has no transfer event.
const MAPPER_ONBOARDED: &str =
    "0x6c2fd84ab09e17c53a6b0f2d94e8c7513fa0b6de92c14e7a8053cb1fd6a49e20";
const MAPPER_UPDATED: &str =
    "0xb70d2a4ec61f59c8e3a11fb86d04c2579e6a3bd1c08f47e2951ad06b83f7c4d5";
const MAPPER_OFFBOARDED: &str =
    "0x08e5a1cf7d93b46028c6e1f0ab54d9c7e23f16b84ad0c95e7613f2ad8b04c6e9";

/// Policy for the mapper registry.
///
/// A mapper exists while it carries a valid (non-zero) frequency plan.
#[derive(Debug, Default, Clone, Copy)]
pub struct MapperRegistry;

impl RegistryPolicy for MapperRegistry {
    fn registry(&self) -> &'static str {
        "mapper"
    }

    fn topic_table(&self) -> &'static [(&'static str, EventKind)] {
        &[
            (MAPPER_ONBOARDED, EventKind::Onboarded),
            (MAPPER_UPDATED, EventKind::Updated),
            (MAPPER_OFFBOARDED, EventKind::Offboarded),
        ]
    }

    fn decode(&self, kind: EventKind, log: &RawLog) -> Option<DecodedFields> {
        let entity = topic_entity(log, 1)?;
        let mut decoded = DecodedFields {
            entity,
            ..Default::default()
        };
        match kind {
            EventKind::Onboarded => {
                decoded.after.owner = Some(topic_address(log, 2)?);
                decoded.after.frequency_plan = data_word_u32(log, 0);
            }
            EventKind::Updated => {}
            EventKind::Offboarded => {}
            // Not in the topic table; nothing maps here.
            EventKind::Transferred => return None,
        }
        Some(decoded)
    }

    fn apply(&self, snapshot: &mut EntitySnapshot, event: &RegistryEvent) {
        match event.kind {
            EventKind::Onboarded | EventKind::Updated => merge_fields(snapshot, &event.after),
            EventKind::Transferred => {}
            EventKind::Offboarded => clear_fields(snapshot),
        }
    }

    fn exists(&self, snapshot: &EntitySnapshot) -> bool {
        snapshot.frequency_plan.is_some_and(|plan| plan != 0)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
