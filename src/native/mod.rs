//! Native event source boundary.
//!
//! The native client library owns an event queue whose entries are opaque
//! handles. This module describes that queue as traits so the dispatcher can
//! drive any binding:
//!   - [`NativeEventSource`]: poll, release, credential callbacks
//!   - [`NativeEvent`]: discriminant plus typed accessors for one handle
//!   - [`NativeMessage`]: one message inside a delivery-report or fetch handle
//!
//! Handles are released exactly once, through [`PollSession`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::events::{Header, KafkaError, TopicPartition};
use crate::oauth::OAuthBearerToken;
use crate::types::{DeliveryToken, Result};

pub mod memory;
mod session;

pub use session::PollSession;

/// Discriminant of a native event handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Poll timed out: nothing ready.
    None,
    /// Delivery reports for a batch of produced messages.
    DeliveryReport,
    /// A consumed message.
    Fetch,
    Stats,
    AssignPartitions,
    RevokePartitions,
    PartitionEof,
    OffsetCommit,
    OAuthBearerTokenRefresh,
    Error,
    /// Any type this core does not translate.
    Other,
}

/// One message owned by a native event handle.
///
/// Borrowed data stays valid until the owning handle is released.
pub trait NativeMessage: Send + Sync {
    fn topic(&self) -> &str;
    fn partition(&self) -> i32;
    fn offset(&self) -> i64;
    fn key(&self) -> Option<&[u8]>;
    fn value(&self) -> Option<&[u8]>;
    fn timestamp(&self) -> Option<DateTime<Utc>>;
    fn error(&self) -> Option<KafkaError>;

    /// Token stored in the message's private field at produce time.
    fn delivery_token(&self) -> Option<DeliveryToken>;

    /// Copy all headers out of the native message. Allocates; only called
    /// when header materialization is enabled.
    fn headers(&self) -> Vec<Header>;
}

/// One native event handle.
pub trait NativeEvent: Send + Sync {
    type Message: NativeMessage;

    fn kind(&self) -> EventKind;

    /// Native type name, used when logging ignored events.
    fn name(&self) -> &str;

    fn message_count(&self) -> usize;
    fn message_at(&self, index: usize) -> Option<&Self::Message>;

    fn stats_json(&self) -> Option<&str>;

    /// Partition list of rebalance and EOF events.
    fn partitions(&self) -> Vec<TopicPartition>;

    fn offsets_and_error(&self) -> (Option<KafkaError>, Vec<TopicPartition>);

    /// `sasl.oauthbearer.config` carried by token refresh events.
    fn oauthbearer_config(&self) -> Option<&str>;

    fn error(&self) -> Option<KafkaError>;
}

/// The native event queue of one client instance.
#[async_trait]
pub trait NativeEventSource: Send + Sync {
    type Event: NativeEvent;

    /// Wait up to `timeout` for the next event. `Ok(None)` means nothing was
    /// ready. Errors are fatal to the calling dispatch loop.
    async fn poll_next(&self, timeout: Duration) -> Result<Option<Self::Event>>;

    /// Return a handle to the native runtime.
    fn release(&self, event: Self::Event);

    fn set_oauthbearer_token(&self, token: &OAuthBearerToken) -> Result<()>;

    fn set_oauthbearer_token_failure(&self, reason: &str) -> Result<()>;
}
