//! Application-level event model.
//!
//! Every native event the dispatcher surfaces becomes exactly one [`Event`].
//! Consumers match exhaustively and skip what they do not handle.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::types::Result;

/// Caller-supplied payload carried from produce time to the delivery report.
pub type Opaque = Arc<dyn Any + Send + Sync>;

/// Partition offset, including the logical sentinels the native library uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Offset(pub i64);

impl Offset {
    pub const BEGINNING: Offset = Offset(-2);
    pub const END: Offset = Offset(-1);
    pub const STORED: Offset = Offset(-1000);
    pub const INVALID: Offset = Offset(-1001);
}

impl Default for Offset {
    fn default() -> Self {
        Offset::INVALID
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Offset::BEGINNING => f.write_str("beginning"),
            Offset::END => f.write_str("end"),
            Offset::STORED => f.write_str("stored"),
            Offset::INVALID => f.write_str("unset"),
            Offset(n) => write!(f, "{n}"),
        }
    }
}

/// Error reported by the native library, either per message or per event.
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[error("{reason}")]
pub struct KafkaError {
    pub code: i32,
    pub reason: String,
    #[serde(default)]
    pub fatal: bool,
}

impl KafkaError {
    pub fn new(code: i32, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            fatal: false,
        }
    }
}

/// A topic/partition pair with an optional offset and per-partition error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
    #[serde(default)]
    pub offset: Offset,
    #[serde(default)]
    pub error: Option<KafkaError>,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset: Offset::INVALID,
            error: None,
        }
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Offset(offset);
        self
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)?;
        if let Some(err) = &self.error {
            write!(f, "({err})")?;
        }
        Ok(())
    }
}

/// Message header. A `None` value is distinct from an empty one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Option<Bytes>,
}

/// A consumed message or the delivery report of a produced one.
///
/// For delivery reports the outcome lives in `topic_partition.error`.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub topic_partition: TopicPartition,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub timestamp: Option<DateTime<Utc>>,
    /// `None` when header materialization is disabled.
    pub headers: Option<Vec<Header>>,
    pub opaque: Option<Opaque>,
}

impl Default for TopicPartition {
    fn default() -> Self {
        Self::new(String::new(), -1)
    }
}

impl Message {
    pub fn error(&self) -> Option<&KafkaError> {
        self.topic_partition.error.as_ref()
    }

    /// Downcast the opaque payload attached at produce time.
    pub fn opaque_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.opaque.as_deref().and_then(|o| o.downcast_ref::<T>())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(
                f,
                "{}: {}",
                self.topic_partition,
                String::from_utf8_lossy(value)
            ),
            None => write!(f, "{}", self.topic_partition),
        }
    }
}

/// Raw statistics JSON emitted at the configured statistics interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    json: String,
}

impl Stats {
    pub fn new(json: impl Into<String>) -> Self {
        Self { json: json.into() }
    }

    pub fn json(&self) -> &str {
        &self.json
    }

    /// Decode the statistics into a caller-defined shape.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.json)?)
    }
}

/// Application event.
#[derive(Debug, Clone)]
pub enum Event {
    Stats(Stats),
    /// Consumer group rebalance: assigned partition set.
    AssignedPartitions(Vec<TopicPartition>),
    /// Consumer group rebalance: revoked partition set.
    RevokedPartitions(Vec<TopicPartition>),
    /// Consumer reached the end of a partition.
    PartitionEof(TopicPartition),
    OffsetsCommitted {
        error: Option<KafkaError>,
        offsets: Vec<TopicPartition>,
    },
    /// The client needs a fresh OAUTHBEARER token. `config` is the
    /// `sasl.oauthbearer.config` value, passed through untouched.
    OAuthBearerTokenRefresh { config: String },
    Message(Box<Message>),
    Error(KafkaError),
}

impl Event {
    /// Short variant name for log output.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Stats(_) => "Stats",
            Event::AssignedPartitions(_) => "AssignedPartitions",
            Event::RevokedPartitions(_) => "RevokedPartitions",
            Event::PartitionEof(_) => "PartitionEOF",
            Event::OffsetsCommitted { .. } => "OffsetsCommitted",
            Event::OAuthBearerTokenRefresh { .. } => "OAuthBearerTokenRefresh",
            Event::Message(_) => "Message",
            Event::Error(_) => "Error",
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Event::Message(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn into_message(self) -> Option<Message> {
        match self {
            Event::Message(msg) => Some(*msg),
            _ => None,
        }
    }
}

impl From<Message> for Event {
    fn from(msg: Message) -> Self {
        Event::Message(Box::new(msg))
    }
}

fn write_partitions(f: &mut fmt::Formatter<'_>, partitions: &[TopicPartition]) -> fmt::Result {
    f.write_str("[")?;
    for (i, tp) in partitions.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{tp}")?;
    }
    f.write_str("]")
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Stats(stats) => f.write_str(stats.json()),
            Event::AssignedPartitions(partitions) => {
                f.write_str("AssignedPartitions: ")?;
                write_partitions(f, partitions)
            }
            Event::RevokedPartitions(partitions) => {
                f.write_str("RevokedPartitions: ")?;
                write_partitions(f, partitions)
            }
            Event::PartitionEof(tp) => write!(f, "EOF at {tp}"),
            Event::OffsetsCommitted { error, offsets } => {
                match error {
                    Some(err) => write!(f, "OffsetsCommitted ({err}, ")?,
                    None => f.write_str("OffsetsCommitted (<nil>, ")?,
                }
                write_partitions(f, offsets)?;
                f.write_str(")")
            }
            Event::OAuthBearerTokenRefresh { .. } => f.write_str("OAuthBearerTokenRefresh"),
            Event::Message(msg) => write!(f, "{msg}"),
            Event::Error(err) => write!(f, "{err}"),
        }
    }
}
