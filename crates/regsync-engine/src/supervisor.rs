//! Task supervision for the sync processes.
//!
//! All long-running loops (confirmed syncer, pending syncer, aggregator —
//! possibly for several registries) register with one supervisor. The first
//! fatal error cancels every sibling and surfaces from `join`; retryable
//! errors never reach here, the loops absorb them.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use regsync_core::error::SyncError;

pub struct Supervisor {
    cancel: CancellationToken,
    tasks: JoinSet<Result<(), SyncError>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    /// The token handed to spawned loops. Callers may also cancel it to
    /// request an orderly shutdown from outside.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Register one named loop.
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), SyncError>> + Send + 'static,
    {
        self.tasks.spawn(async move {
            tracing::debug!(task = name, "sync task started");
            let result = task.await;
            match &result {
                Ok(()) => tracing::debug!(task = name, "sync task stopped"),
                Err(err) => tracing::error!(task = name, error = %err, "sync task failed"),
            }
            result
        });
    }

    /// Request an orderly shutdown of every task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for all tasks. The first failure cancels the rest and is
    /// returned once they have wound down; a panic counts as a failure.
    pub async fn join(mut self) -> Result<(), SyncError> {
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err),
                Err(join_err) => Some(SyncError::Aborted {
                    reason: format!("sync task panicked: {join_err}"),
                }),
            };
            if let Some(err) = failure {
                self.cancel.cancel();
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
