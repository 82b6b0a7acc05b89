//! Pending syncer — live subscription for unconfirmed event previews.
//!
//! Subscribes to the contract's logs at the chain head and records each
//! decoded event as a pending preview, without enrichment. The subscription
//! is assumed to drop: every failure or stream end re-subscribes under
//! exponential backoff, and a subscription that stayed healthy past the
//! reset threshold starts the next backoff from the initial delay again.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use regsync_core::error::SyncError;
use regsync_core::policy::RegistryPolicy;
use regsync_core::retry::RetryPolicy;

use crate::client::ChainClient;
use crate::decoder::EventDecoder;
use crate::ingestor::Ingestor;

pub struct PendingSyncer<C> {
    client: Arc<C>,
    decoder: Arc<EventDecoder<C>>,
    ingestor: Arc<Ingestor>,
    policy: Arc<dyn RegistryPolicy>,
    contract: String,
    confirmations: u64,
    retry: RetryPolicy,
}

impl<C: ChainClient> PendingSyncer<C> {
    pub fn new(
        client: Arc<C>,
        decoder: Arc<EventDecoder<C>>,
        ingestor: Arc<Ingestor>,
        policy: Arc<dyn RegistryPolicy>,
        contract: impl Into<String>,
        confirmations: u64,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            decoder,
            ingestor,
            policy,
            contract: contract.into(),
            confirmations,
            retry,
        }
    }

    /// Consume subscriptions until cancelled or a fatal error.
    ///
    /// At confirmation depth 0 the confirmed syncer already sees every block
    /// the subscription would preview, so this task parks until shutdown.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SyncError> {
        if self.confirmations == 0 {
            tracing::info!(
                contract = %self.contract,
                "confirmation depth 0, pending sync disabled"
            );
            cancel.cancelled().await;
            return Ok(());
        }

        let mut backoff = self.retry.backoff();
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let started = tokio::time::Instant::now();
            match self.consume_subscription(&cancel).await {
                Ok(()) => return Ok(()), // cancelled
                Err(err) if err.is_retryable() => {
                    backoff.on_success(started);
                    tracing::warn!(
                        contract = %self.contract,
                        error = %err,
                        "pending subscription lost, re-subscribing"
                    );
                    if !backoff.wait(&cancel).await {
                        return Ok(());
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Open one subscription and record its events until it breaks.
    /// Returns `Ok(())` only on cancellation; a closed stream is an error
    /// like any other, so the caller re-subscribes.
    async fn consume_subscription(&self, cancel: &CancellationToken) -> Result<(), SyncError> {
        let mut stream = self
            .client
            .subscribe_logs(&self.contract, &self.policy.topics())
            .await?;
        tracing::debug!(contract = %self.contract, "pending subscription established");

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = stream.next() => next,
            };
            let log = match next {
                Some(Ok(log)) => log,
                Some(Err(err)) => return Err(err),
                None => return Err(SyncError::Subscription("log stream ended".into())),
            };
            // Previews skip enrichment; the confirmed pass fills fields in.
            if let Some(event) = self.decoder.decode(&log, false).await? {
                self.ingestor.record_pending(event).await?;
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
