//! Mock chain client shared by the engine's unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;

use regsync_core::error::SyncError;
use regsync_core::types::{EntityKey, EventFields, RawLog};

use crate::client::{BlockHeader, ChainClient, LogStream};

/// Scriptable in-memory chain: a head height, a code-deployment height per
/// address, canned logs, pinned entity records, and queued subscriptions.
#[derive(Default)]
pub struct MockChain {
    head: AtomicU64,
    code_from: Mutex<HashMap<String, u64>>,
    logs: Mutex<Vec<RawLog>>,
    entities: Mutex<HashMap<(EntityKey, u64), EventFields>>,
    subscriptions: Mutex<Vec<LogStream>>,
    code_queries: AtomicU32,
    header_queries: AtomicU32,
    log_queries: AtomicU32,
    subscribe_attempts: AtomicU32,
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            ..Default::default()
        }
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    /// Contract code exists at `address` from `block` onward.
    pub fn set_code_from(&self, address: &str, block: u64) {
        self.code_from.lock().unwrap().insert(address.to_lowercase(), block);
    }

    pub fn push_log(&self, log: RawLog) {
        self.logs.lock().unwrap().push(log);
    }

    /// Pin the registry's record for `entity` at exactly `block`.
    pub fn set_entity_at(&self, entity: EntityKey, block: u64, fields: EventFields) {
        self.entities.lock().unwrap().insert((entity, block), fields);
    }

    /// Queue a stream to hand out on the next `subscribe_logs` call; once
    /// the queue is empty, subscriptions fail.
    pub fn push_subscription(&self, stream: LogStream) {
        self.subscriptions.lock().unwrap().push(stream);
    }

    pub fn code_queries(&self) -> u32 {
        self.code_queries.load(Ordering::SeqCst)
    }

    pub fn header_queries(&self) -> u32 {
        self.header_queries.load(Ordering::SeqCst)
    }

    pub fn log_queries(&self) -> u32 {
        self.log_queries.load(Ordering::SeqCst)
    }

    pub fn subscribe_attempts(&self) -> u32 {
        self.subscribe_attempts.load(Ordering::SeqCst)
    }

    fn header(&self, number: u64) -> BlockHeader {
        BlockHeader {
            number,
            hash: format!("0x{number:064x}"),
            timestamp: (number * 10) as i64,
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn latest_header(&self) -> Result<BlockHeader, SyncError> {
        Ok(self.header(self.head.load(Ordering::SeqCst)))
    }

    async fn header_by_number(&self, number: u64) -> Result<Option<BlockHeader>, SyncError> {
        self.header_queries.fetch_add(1, Ordering::SeqCst);
        if number > self.head.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(self.header(number)))
    }

    async fn has_code(&self, address: &str, block: u64) -> Result<bool, SyncError> {
        self.code_queries.fetch_add(1, Ordering::SeqCst);
        let deployed = self
            .code_from
            .lock()
            .unwrap()
            .get(&address.to_lowercase())
            .copied();
        Ok(deployed.is_some_and(|d| block >= d))
    }

    async fn logs(
        &self,
        address: &str,
        topics: &[String],
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, SyncError> {
        self.log_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| {
                log.address.eq_ignore_ascii_case(address)
                    && log.block_number >= from
                    && log.block_number <= to
                    && log.topic0().is_some_and(|t0| {
                        topics.iter().any(|t| t.eq_ignore_ascii_case(t0))
                    })
            })
            .cloned()
            .collect())
    }

    async fn subscribe_logs(
        &self,
        _address: &str,
        _topics: &[String],
    ) -> Result<LogStream, SyncError> {
        self.subscribe_attempts.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.subscriptions.lock().unwrap();
        if queue.is_empty() {
            return Err(SyncError::Subscription("no subscription available".into()));
        }
        Ok(queue.remove(0))
    }

    async fn entity_at(
        &self,
        _contract: &str,
        entity: &EntityKey,
        block: u64,
    ) -> Result<Option<EventFields>, SyncError> {
        Ok(self.entities.lock().unwrap().get(&(*entity, block)).cloned())
    }
}

/// A subscription stream fed from a channel the test holds.
pub fn channel_subscription() -> (
    futures::channel::mpsc::UnboundedSender<Result<RawLog, SyncError>>,
    LogStream,
) {
    let (tx, rx) = futures::channel::mpsc::unbounded();
    (tx, rx.boxed())
}
