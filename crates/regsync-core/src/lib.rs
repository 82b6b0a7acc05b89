//! regsync-core — foundation for the registry chain-sync engine.
//!
//! # Architecture
//!
//! ```text
//! EngineBuilder → Supervisor
//!                     ├── ConfirmedSyncer  (oracle → decode/enrich → ingest)
//!                     ├── PendingSyncer    (live subscription previews)
//!                     └── Aggregator       (event-log replay → state + history)
//! Coordination between loops happens only through the durable store
//! (checkpoints + event rows), never in-process.
//! ```
//!
//! This crate holds the pieces shared by engine and store: the data model,
//! the error taxonomy, the per-registry policy seam, the retry policy, and
//! the abstract store traits.

pub mod error;
pub mod policy;
pub mod registries;
pub mod retry;
pub mod store;
pub mod types;

pub use error::SyncError;
pub use policy::{DecodedFields, RegistryPolicy};
pub use registries::{GatewayRegistry, MapperRegistry, RouterRegistry};
pub use retry::{Backoff, RetryPolicy};
pub use store::{CheckpointStore, EventLog, PendingLog, RegistryStore, StateStore};
pub use types::{
    DedupKey, EntityKey, EntitySnapshot, EventFields, EventKind, RawLog, RegistryEvent,
    SyncProcess,
};
