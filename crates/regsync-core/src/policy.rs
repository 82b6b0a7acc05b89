//! The registry policy seam — the only part of the engine that differs
//! between gateway, router, and mapper registries.
//!
//! The sync/aggregate machinery is written once; a policy supplies the
//! decode table, the field-transition reducer, and the existence predicate.

use crate::types::{EntityKey, EntitySnapshot, EventFields, EventKind, RawLog, RegistryEvent};

/// Result of decoding one raw log's payload.
#[derive(Debug, Clone, Default)]
pub struct DecodedFields {
    /// The subject entity.
    pub entity: EntityKey,
    /// Field values before the event, where the log embeds them
    /// (e.g. the previous owner in a transfer).
    pub before: EventFields,
    /// Field values after the event.
    pub after: EventFields,
}

/// Per-registry behavior consumed by the generic sync engine.
///
/// Implementations must be cheap to call and side-effect free — `apply` is a
/// pure reducer over (prior snapshot, event).
pub trait RegistryPolicy: Send + Sync {
    /// Short registry name, used in checkpoint keys and log fields
    /// (e.g. `"gateway"`).
    fn registry(&self) -> &'static str;

    /// Static table mapping event-signature hashes (topic 0) to kinds.
    ///
    /// Logs whose topic 0 is absent from this table are expected noise from
    /// a shared contract and are dropped without error.
    fn topic_table(&self) -> &'static [(&'static str, EventKind)];

    /// Extract the subject entity and field values embedded in the log
    /// payload. Returns `None` if the payload is malformed for this kind.
    ///
    /// Kinds flagged by [`needs_enrichment`](Self::needs_enrichment) may
    /// return empty fields here; the enricher fills them from pinned calls.
    fn decode(&self, kind: EventKind, log: &RawLog) -> Option<DecodedFields>;

    /// Whether this kind only signals "something changed" and requires
    /// pinned contract calls at block N and N-1 to recover the delta.
    fn needs_enrichment(&self, kind: EventKind) -> bool {
        matches!(kind, EventKind::Updated)
    }

    /// Whether this kind represents an onboarding action. At most one
    /// outstanding pending-onboarding intent is kept per entity.
    fn is_onboarding(&self, kind: EventKind) -> bool {
        matches!(kind, EventKind::Onboarded)
    }

    /// Apply the kind-specific field transition to a prior snapshot.
    ///
    /// Event/block metadata stamping is the aggregator's job; this mutates
    /// attribute fields only.
    fn apply(&self, snapshot: &mut EntitySnapshot, event: &RegistryEvent);

    /// Whether the snapshot still represents an existing entity. When this
    /// returns `false` after a transition, the current-state row is deleted.
    fn exists(&self, snapshot: &EntitySnapshot) -> bool;

    /// Look up the kind for a raw log's topic 0. `None` means drop the log.
    fn kind_for_topic(&self, topic0: &str) -> Option<EventKind> {
        self.topic_table()
            .iter()
            .find(|(sig, _)| sig.eq_ignore_ascii_case(topic0))
            .map(|(_, kind)| *kind)
    }

    /// All topic-0 signatures this registry subscribes to.
    fn topics(&self) -> Vec<String> {
        self.topic_table()
            .iter()
            .map(|(sig, _)| (*sig).to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TwoTopics;

    impl RegistryPolicy for TwoTopics {
        fn registry(&self) -> &'static str {
            "test"
        }
        fn topic_table(&self) -> &'static [(&'static str, EventKind)] {
            &[
                ("0xAAAA", EventKind::Onboarded),
                ("0xbbbb", EventKind::Offboarded),
            ]
        }
        fn decode(&self, _kind: EventKind, _log: &RawLog) -> Option<DecodedFields> {
            None
        }
        fn apply(&self, _snapshot: &mut EntitySnapshot, _event: &RegistryEvent) {}
        fn exists(&self, _snapshot: &EntitySnapshot) -> bool {
            true
        }
    }

    #[test]
    fn topic_lookup_case_insensitive() {
        let p = TwoTopics;
        assert_eq!(p.kind_for_topic("0xaaaa"), Some(EventKind::Onboarded));
        assert_eq!(p.kind_for_topic("0xBBBB"), Some(EventKind::Offboarded));
        assert_eq!(p.kind_for_topic("0xcccc"), None);
    }

    #[test]
    fn default_classifiers() {
        let p = TwoTopics;
        assert!(p.needs_enrichment(EventKind::Updated));
        assert!(!p.needs_enrichment(EventKind::Onboarded));
        assert!(p.is_onboarding(EventKind::Onboarded));
        assert!(!p.is_onboarding(EventKind::Transferred));
    }
}
