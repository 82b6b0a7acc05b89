//! Error types for the registry sync pipeline.

use thiserror::Error;

/// Errors that can occur while syncing or aggregating registry events.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("head {head} below confirmation depth {confirmations}")]
    InsufficientConfirmations { head: u64, confirmations: u64 },

    #[error("log subscription error: {0}")]
    Subscription(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("ingestor checkpoint {ingestor} behind aggregator checkpoint {aggregator}")]
    CheckpointRace { ingestor: u64, aggregator: u64 },

    #[error("sync aborted: {reason}")]
    Aborted { reason: String },
}

impl SyncError {
    /// Returns `true` if the loop should back off and retry from the same
    /// checkpoint (transient RPC/subscription trouble, not-yet-confirmed head).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Rpc(_)
                | Self::InsufficientConfirmations { .. }
                | Self::Subscription(_)
                | Self::Storage(_)
        )
    }

    /// Returns `true` for invariant violations that must surface loudly and
    /// never be retried into a worse state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CheckpointRace { .. } | Self::Aborted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_errors_retryable() {
        assert!(SyncError::Rpc("timeout".into()).is_retryable());
        assert!(SyncError::InsufficientConfirmations {
            head: 3,
            confirmations: 12
        }
        .is_retryable());
        assert!(!SyncError::Rpc("timeout".into()).is_fatal());
    }

    #[test]
    fn checkpoint_race_fatal() {
        let err = SyncError::CheckpointRace {
            ingestor: 100,
            aggregator: 150,
        };
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }
}
