//! regsync-store — pluggable storage backends for the registry sync engine.
//!
//! Backends:
//! - [`memory`] — in-memory, sharded across synthetic partitions (dev/testing)
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Plus [`cache::CheckpointCache`], a bounded-staleness write-through wrapper
//! for the high-frequency checkpoint keys, and [`partition`], the synthetic
//! partitioning scheme for backends without native ordered range scans.

pub mod cache;
pub mod partition;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use cache::CheckpointCache;
#[cfg(feature = "memory")]
pub use memory::MemoryStore;
