//! In-process native event source.
//!
//! `MemorySource` implements the native traits over a scripted queue. Every
//! poll, fetch, release and header copy is recorded in a [`SourceProbe`] so
//! callers can check the handle discipline from the outside.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use super::{EventKind, NativeEvent, NativeEventSource, NativeMessage};
use crate::events::{Header, KafkaError, TopicPartition};
use crate::oauth::OAuthBearerToken;
use crate::types::{DeliveryToken, Error, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Operations observed on a [`MemorySource`], in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOp {
    /// A poll returned the handle with this id, or nothing.
    Polled(Option<u64>),
    /// A poll failed.
    Failed,
    Released(u64),
}

/// Call accounting shared between a source and its messages.
#[derive(Debug, Default)]
pub struct SourceProbe {
    ops: Mutex<Vec<SourceOp>>,
    timeouts: Mutex<Vec<Duration>>,
    header_reads: AtomicUsize,
}

impl SourceProbe {
    fn record(&self, op: SourceOp) {
        lock(&self.ops).push(op);
    }

    pub fn ops(&self) -> Vec<SourceOp> {
        lock(&self.ops).clone()
    }

    /// Timeout passed to each `poll_next` call.
    pub fn poll_timeouts(&self) -> Vec<Duration> {
        lock(&self.timeouts).clone()
    }

    pub fn polls(&self) -> usize {
        lock(&self.timeouts).len()
    }

    pub fn fetched(&self) -> usize {
        lock(&self.ops)
            .iter()
            .filter(|op| matches!(op, SourceOp::Polled(Some(_))))
            .count()
    }

    pub fn released(&self) -> usize {
        lock(&self.ops)
            .iter()
            .filter(|op| matches!(op, SourceOp::Released(_)))
            .count()
    }

    /// Handles fetched but not yet released.
    pub fn outstanding(&self) -> usize {
        self.fetched().saturating_sub(self.released())
    }

    /// Number of `NativeMessage::headers` calls.
    pub fn header_reads(&self) -> usize {
        self.header_reads.load(Ordering::SeqCst)
    }
}

/// A scripted native message.
#[derive(Debug, Clone, Default)]
pub struct MemoryMessage {
    topic: String,
    partition: i32,
    offset: i64,
    key: Option<Bytes>,
    value: Option<Bytes>,
    timestamp: Option<DateTime<Utc>>,
    error: Option<KafkaError>,
    token: Option<DeliveryToken>,
    headers: Vec<Header>,
    probe: Option<Arc<SourceProbe>>,
}

impl MemoryMessage {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset: -1001,
            ..Self::default()
        }
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn error(mut self, error: KafkaError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn token(mut self, token: DeliveryToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Store a raw private-field value, as a foreign producer would.
    pub fn raw_token(mut self, raw: u64) -> Self {
        self.token = DeliveryToken::from_raw(raw);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: Option<Bytes>) -> Self {
        self.headers.push(Header {
            key: key.into(),
            value,
        });
        self
    }
}

impl NativeMessage for MemoryMessage {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> i32 {
        self.partition
    }

    fn offset(&self) -> i64 {
        self.offset
    }

    fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    fn error(&self) -> Option<KafkaError> {
        self.error.clone()
    }

    fn delivery_token(&self) -> Option<DeliveryToken> {
        self.token
    }

    fn headers(&self) -> Vec<Header> {
        if let Some(probe) = &self.probe {
            probe.header_reads.fetch_add(1, Ordering::SeqCst);
        }
        self.headers.clone()
    }
}

/// A scripted native event handle.
#[derive(Debug, Clone)]
pub struct MemoryEvent {
    id: u64,
    kind: EventKind,
    name: String,
    messages: Vec<MemoryMessage>,
    stats: Option<String>,
    partitions: Vec<TopicPartition>,
    error: Option<KafkaError>,
    oauth_config: Option<String>,
    unreadable: Vec<usize>,
}

impl MemoryEvent {
    fn of(kind: EventKind, name: &str) -> Self {
        Self {
            id: 0,
            kind,
            name: name.to_string(),
            messages: Vec::new(),
            stats: None,
            partitions: Vec::new(),
            error: None,
            oauth_config: None,
            unreadable: Vec::new(),
        }
    }

    /// The "nothing ready" sentinel handle.
    pub fn none() -> Self {
        Self::of(EventKind::None, "(NONE)")
    }

    pub fn delivery_report(messages: Vec<MemoryMessage>) -> Self {
        Self {
            messages,
            ..Self::of(EventKind::DeliveryReport, "DeliveryReport")
        }
    }

    /// Make the batch slot at `index` unreadable through `message_at`.
    pub fn unreadable(mut self, index: usize) -> Self {
        self.unreadable.push(index);
        self
    }

    pub fn fetch(message: MemoryMessage) -> Self {
        Self {
            messages: vec![message],
            ..Self::of(EventKind::Fetch, "Fetch")
        }
    }

    pub fn stats(json: impl Into<String>) -> Self {
        Self {
            stats: Some(json.into()),
            ..Self::of(EventKind::Stats, "Stats")
        }
    }

    pub fn assign(partitions: Vec<TopicPartition>) -> Self {
        Self {
            partitions,
            ..Self::of(EventKind::AssignPartitions, "Rebalance")
        }
    }

    pub fn revoke(partitions: Vec<TopicPartition>) -> Self {
        Self {
            partitions,
            ..Self::of(EventKind::RevokePartitions, "Rebalance")
        }
    }

    pub fn partition_eof(partition: TopicPartition) -> Self {
        Self {
            partitions: vec![partition],
            ..Self::of(EventKind::PartitionEof, "PartitionEOF")
        }
    }

    pub fn offset_commit(error: Option<KafkaError>, offsets: Vec<TopicPartition>) -> Self {
        Self {
            error,
            partitions: offsets,
            ..Self::of(EventKind::OffsetCommit, "OffsetCommit")
        }
    }

    pub fn oauthbearer_refresh(config: impl Into<String>) -> Self {
        Self {
            oauth_config: Some(config.into()),
            ..Self::of(EventKind::OAuthBearerTokenRefresh, "OAuthBearerTokenRefresh")
        }
    }

    pub fn error(error: KafkaError) -> Self {
        Self {
            error: Some(error),
            ..Self::of(EventKind::Error, "Error")
        }
    }

    /// An event type the translator does not know.
    pub fn unknown(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::of(EventKind::Other, "")
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl NativeEvent for MemoryEvent {
    type Message = MemoryMessage;

    fn kind(&self) -> EventKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn message_count(&self) -> usize {
        self.messages.len()
    }

    fn message_at(&self, index: usize) -> Option<&MemoryMessage> {
        if self.unreadable.contains(&index) {
            return None;
        }
        self.messages.get(index)
    }

    fn stats_json(&self) -> Option<&str> {
        self.stats.as_deref()
    }

    fn partitions(&self) -> Vec<TopicPartition> {
        self.partitions.clone()
    }

    fn offsets_and_error(&self) -> (Option<KafkaError>, Vec<TopicPartition>) {
        (self.error.clone(), self.partitions.clone())
    }

    fn oauthbearer_config(&self) -> Option<&str> {
        self.oauth_config.as_deref()
    }

    fn error(&self) -> Option<KafkaError> {
        self.error.clone()
    }
}

#[derive(Debug)]
enum Scripted {
    Event(MemoryEvent),
    Failure(String),
}

/// Scripted, in-process native event queue.
#[derive(Debug, Default)]
pub struct MemorySource {
    queue: Mutex<VecDeque<Scripted>>,
    ready: Notify,
    next_id: AtomicU64,
    probe: Arc<SourceProbe>,
    tokens: Mutex<Vec<OAuthBearerToken>>,
    token_failures: Mutex<Vec<String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event and wake a blocked poll. Returns the handle id.
    pub fn push(&self, mut event: MemoryEvent) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        event.id = id;
        for message in &mut event.messages {
            message.probe = Some(self.probe.clone());
        }
        lock(&self.queue).push_back(Scripted::Event(event));
        self.ready.notify_one();
        id
    }

    /// Make a later poll fail, as if the native queue had been destroyed.
    pub fn push_failure(&self, reason: impl Into<String>) {
        lock(&self.queue).push_back(Scripted::Failure(reason.into()));
        self.ready.notify_one();
    }

    /// Events and failures still queued.
    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn probe(&self) -> Arc<SourceProbe> {
        self.probe.clone()
    }

    pub fn oauthbearer_tokens(&self) -> Vec<OAuthBearerToken> {
        lock(&self.tokens).clone()
    }

    pub fn oauthbearer_failures(&self) -> Vec<String> {
        lock(&self.token_failures).clone()
    }
}

#[async_trait]
impl NativeEventSource for MemorySource {
    type Event = MemoryEvent;

    async fn poll_next(&self, timeout: Duration) -> Result<Option<MemoryEvent>> {
        lock(&self.probe.timeouts).push(timeout);
        let deadline = Instant::now() + timeout;

        loop {
            let front = lock(&self.queue).pop_front();
            match front {
                Some(Scripted::Event(event)) => {
                    self.probe.record(SourceOp::Polled(Some(event.id)));
                    return Ok(Some(event));
                }
                Some(Scripted::Failure(reason)) => {
                    self.probe.record(SourceOp::Failed);
                    return Err(Error::native(reason));
                }
                None => {}
            }

            if timeout.is_zero() || Instant::now() >= deadline {
                self.probe.record(SourceOp::Polled(None));
                return Ok(None);
            }
            let _ = timeout_at(deadline, self.ready.notified()).await;
        }
    }

    fn release(&self, event: MemoryEvent) {
        self.probe.record(SourceOp::Released(event.id));
    }

    fn set_oauthbearer_token(&self, token: &OAuthBearerToken) -> Result<()> {
        lock(&self.tokens).push(token.clone());
        Ok(())
    }

    fn set_oauthbearer_token_failure(&self, reason: &str) -> Result<()> {
        lock(&self.token_failures).push(reason.to_string());
        Ok(())
    }
}
