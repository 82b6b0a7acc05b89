//! Chain-sync and event-aggregation engine for registry contracts.
//!
//! One engine per registry contract, assembled by [`RegistryEngine::builder`]
//! from three pieces the embedder supplies: a [`ChainClient`], a
//! [`RegistryStore`](regsync_core::store::RegistryStore) backend, and a
//! [`RegistryPolicy`](regsync_core::policy::RegistryPolicy). The engine runs
//! three cooperating loops:
//!
//! - the **confirmed syncer** polls finalized history behind the
//!   confirmation depth and feeds the [`Ingestor`];
//! - the **pending syncer** subscribes at the chain head for best-effort
//!   previews;
//! - the **[`Aggregator`]** reduces the confirmed event log into current
//!   entity state and append-only history.
//!
//! All loops are crash-tolerant by construction: checkpoints advance only
//! after a window fully lands, and every write is idempotent, so recovery is
//! replay.

pub mod aggregator;
pub mod builder;
pub mod client;
pub mod confirmed;
pub mod decoder;
pub mod ingestor;
pub mod oracle;
pub mod pending;
pub mod supervisor;

#[cfg(test)]
mod testutil;

pub use aggregator::Aggregator;
pub use builder::{EngineBuilder, EngineConfig, RegistryEngine};
pub use client::{BlockHeader, ChainClient, LogStream};
pub use confirmed::{ConfirmedSyncer, Progress};
pub use decoder::EventDecoder;
pub use ingestor::{Ingestor, PENDING_PURGE_STRIDE};
pub use oracle::{BlockRangeOracle, ScanRange};
pub use pending::PendingSyncer;
pub use supervisor::Supervisor;
