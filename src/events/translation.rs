//! Event translation: native event handles → application [`Event`]s.
//!
//! Translation rules:
//!   none              → Nothing (ends the current dispatch batch)
//!   delivery report   → Deliveries (lazy, one routed report per message)
//!   fetch             → Message
//!   stats             → Stats
//!   rebalance         → AssignedPartitions / RevokedPartitions
//!   partition EOF     → PartitionEof
//!   offset commit     → OffsetsCommitted
//!   token refresh     → OAuthBearerTokenRefresh
//!   error             → Error
//!   (all others)      → Ignored, logged

use tokio::sync::mpsc;

use super::types::{Event, Message, Offset, Stats, TopicPartition};
use crate::native::{EventKind, NativeEvent, NativeMessage};
use crate::registry::DeliveryRegistry;

/// Per-call translation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslateOptions {
    /// Copy headers out of native messages.
    pub materialize_headers: bool,
    /// Send delivery reports without a private channel to the dispatch destination.
    pub forward_unrouted: bool,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self {
            materialize_headers: true,
            forward_unrouted: true,
        }
    }
}

/// Result of translating one native handle.
#[derive(Debug)]
pub enum Translation<'a, E: NativeEvent> {
    /// The source had nothing ready.
    Nothing,
    /// A single application event.
    Event(Event),
    /// A delivery-report batch, routed lazily as it is iterated.
    Deliveries(DeliveryReports<'a, E>),
    /// Unrecognized or unreadable event; already logged.
    Ignored,
}

/// Destination chosen for one delivery report.
#[derive(Debug)]
pub enum Route {
    /// The producing caller's completion channel.
    Private(mpsc::Sender<Event>),
    /// The destination of the current dispatch call.
    Forward,
    /// Hand back to the caller of the dispatch call.
    Direct,
}

/// A delivery report paired with its destination.
#[derive(Debug)]
pub struct RoutedDelivery {
    /// The report as an [`Event::Message`].
    pub event: Event,
    /// Where the report should be sent.
    pub route: Route,
}

/// Delivery reports of one native batch, resolved against the registry on
/// demand. Tokens of reports that are never pulled stay registered.
#[derive(Debug)]
pub struct DeliveryReports<'a, E: NativeEvent> {
    native: &'a E,
    registry: &'a DeliveryRegistry,
    options: TranslateOptions,
    next: usize,
    count: usize,
}

impl<'a, E: NativeEvent> DeliveryReports<'a, E> {
    fn new(native: &'a E, registry: &'a DeliveryRegistry, options: TranslateOptions) -> Self {
        Self {
            native,
            registry,
            options,
            next: 0,
            count: native.message_count(),
        }
    }

    /// Reports not yet pulled.
    pub fn remaining(&self) -> usize {
        self.count.saturating_sub(self.next)
    }

    /// Drop the rest of the batch, evicting its registry entries so pending
    /// callers see their completion channel close. Returns the number dropped.
    pub fn discard_remaining(&mut self) -> usize {
        let mut dropped = 0;
        while self.next < self.count {
            if let Some(msg) = self.native.message_at(self.next) {
                if let Some(token) = msg.delivery_token() {
                    self.registry.lookup(token);
                }
                dropped += 1;
            }
            self.next += 1;
        }
        dropped
    }
}

impl<E: NativeEvent> Iterator for DeliveryReports<'_, E> {
    type Item = RoutedDelivery;

    fn next(&mut self) -> Option<RoutedDelivery> {
        let native_msg = loop {
            if self.next >= self.count {
                return None;
            }
            let index = self.next;
            self.next += 1;
            match self.native.message_at(index) {
                Some(msg) => break msg,
                None => tracing::warn!(
                    "Delivery report {} of {} unreadable, skipped",
                    index,
                    self.count
                ),
            }
        };

        let mut message = message_from_native(native_msg, self.options.materialize_headers);
        let mut route = None;

        if let Some(token) = native_msg.delivery_token() {
            match self.registry.lookup(token) {
                Some(context) => {
                    message.opaque = context.opaque;
                    route = context.completion.map(Route::Private);
                }
                None => tracing::debug!("No delivery context for {}", token),
            }
        }

        let route = route.unwrap_or(if self.options.forward_unrouted {
            Route::Forward
        } else {
            Route::Direct
        });

        Some(RoutedDelivery {
            event: Event::from(message),
            route,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}

/// Build an application message from a native one.
///
/// Headers are copied only when `materialize_headers` is set; otherwise the
/// native header accessor is not touched.
pub fn message_from_native<M: NativeMessage>(native: &M, materialize_headers: bool) -> Message {
    let mut topic_partition = TopicPartition::new(native.topic(), native.partition());
    topic_partition.offset = Offset(native.offset());
    topic_partition.error = native.error();

    Message {
        topic_partition,
        key: native.key().map(bytes::Bytes::copy_from_slice),
        value: native.value().map(bytes::Bytes::copy_from_slice),
        timestamp: native.timestamp(),
        headers: materialize_headers.then(|| native.headers()),
        opaque: None,
    }
}

/// Translate one native handle. `None` is the null handle of an empty poll.
pub fn translate<'a, E: NativeEvent>(
    native: Option<&'a E>,
    registry: &'a DeliveryRegistry,
    options: TranslateOptions,
) -> Translation<'a, E> {
    let Some(native) = native else {
        return Translation::Nothing;
    };

    match native.kind() {
        EventKind::None => Translation::Nothing,

        EventKind::DeliveryReport => {
            Translation::Deliveries(DeliveryReports::new(native, registry, options))
        }

        EventKind::Fetch => match native.message_at(0) {
            Some(msg) => Translation::Event(Event::from(message_from_native(
                msg,
                options.materialize_headers,
            ))),
            None => ignored(native, "fetch event without message"),
        },

        EventKind::Stats => match native.stats_json() {
            Some(json) => Translation::Event(Event::Stats(Stats::new(json))),
            None => ignored(native, "stats event without payload"),
        },

        EventKind::AssignPartitions => {
            Translation::Event(Event::AssignedPartitions(native.partitions()))
        }

        EventKind::RevokePartitions => {
            Translation::Event(Event::RevokedPartitions(native.partitions()))
        }

        EventKind::PartitionEof => match native.partitions().into_iter().next() {
            Some(tp) => Translation::Event(Event::PartitionEof(tp)),
            None => ignored(native, "EOF event without partition"),
        },

        EventKind::OffsetCommit => {
            let (error, offsets) = native.offsets_and_error();
            Translation::Event(Event::OffsetsCommitted { error, offsets })
        }

        EventKind::OAuthBearerTokenRefresh => {
            // Config is opaque here; the credential collaborator parses it.
            let config = native.oauthbearer_config().unwrap_or_default().to_string();
            Translation::Event(Event::OAuthBearerTokenRefresh { config })
        }

        EventKind::Error => match native.error() {
            Some(err) => Translation::Event(Event::Error(err)),
            None => ignored(native, "error event without error"),
        },

        EventKind::Other => ignored(native, "unrecognized event type"),
    }
}

fn ignored<'a, E: NativeEvent>(native: &E, why: &str) -> Translation<'a, E> {
    tracing::warn!("Ignored event {}: {}", native.name(), why);
    Translation::Ignored
}
