//! Dispatch loop: drains the native event queue and routes translated events.
//!
//! One call to [`Dispatcher::event_poll`] moves through:
//!
//! ```text
//!   Idle → Polling → { Translating → Routing → Polling }* → terminal
//! ```
//!
//! Terminal states are listed in [`DispatchState`]. Every channel send races
//! the caller's cancellation token; cancellation is only observed there and
//! never interrupts a native poll.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::events::{translate, DeliveryReports, Event, Route, TranslateOptions, Translation};
use crate::native::{NativeEvent, NativeEventSource, PollSession};
use crate::registry::DeliveryRegistry;
use crate::types::Result;

/// How a dispatch call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// The source had nothing ready within the timeout.
    Drained,
    /// Cancellation won a delivery race.
    Terminated,
    /// The dispatch destination was closed.
    Closed,
    /// `max_events` native events were handled.
    BatchLimitReached,
    /// An event was handed back to the caller.
    Returned,
}

/// Result of one dispatch call.
#[derive(Debug)]
pub struct PollOutcome {
    /// Event returned directly to the caller, if any.
    pub event: Option<Event>,
    /// Set when the loop stopped on cancellation or a closed destination.
    pub terminated: bool,
    /// Terminal state of the call.
    pub state: DispatchState,
    /// Events sent to a channel during this call.
    pub delivered: usize,
    /// Delivery reports of an in-hand batch dropped without being routed,
    /// after a direct return, cancellation or a closed destination.
    pub dropped_deliveries: usize,
}

impl PollOutcome {
    fn new() -> Self {
        Self {
            event: None,
            terminated: false,
            state: DispatchState::BatchLimitReached,
            delivered: 0,
            dropped_deliveries: 0,
        }
    }

    fn stop(&mut self, state: DispatchState) {
        self.state = state;
        self.terminated = matches!(state, DispatchState::Terminated | DispatchState::Closed);
    }

    fn returned(&mut self, event: Event) {
        self.event = Some(event);
        self.state = DispatchState::Returned;
    }
}

/// Outcome of racing one send against cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The event was accepted by the channel.
    Sent,
    /// Cancellation fired first; the event was discarded.
    Cancelled,
    /// The receiving side is gone; the event was dropped.
    Closed,
}

/// Send `event` on `tx` unless `cancel` fires first.
///
/// Blocks while the channel is full. When both sides are ready the winner is
/// chosen at random.
pub async fn deliver_or_cancel(
    tx: &mpsc::Sender<Event>,
    event: Event,
    cancel: Option<&CancellationToken>,
) -> Delivery {
    let Some(cancel) = cancel else {
        return match tx.send(event).await {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::Closed,
        };
    };

    tokio::select! {
        sent = tx.send(event) => match sent {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::Closed,
        },
        _ = cancel.cancelled() => Delivery::Cancelled,
    }
}

/// Evict the unrouted rest of a delivery batch whose native handle is about
/// to be released. Returns the number of reports dropped.
fn discard_batch<E: NativeEvent>(reports: &mut DeliveryReports<'_, E>, after: &str) -> usize {
    let dropped = reports.discard_remaining();
    if dropped > 0 {
        tracing::warn!("Dropped {} delivery reports after {}", dropped, after);
    }
    dropped
}

/// Drives one native source against one delivery registry.
#[derive(Debug)]
pub struct Dispatcher<'a, S: NativeEventSource> {
    source: &'a S,
    registry: &'a DeliveryRegistry,
    options: TranslateOptions,
}

impl<'a, S: NativeEventSource> Dispatcher<'a, S> {
    pub fn new(source: &'a S, registry: &'a DeliveryRegistry, options: TranslateOptions) -> Self {
        Self {
            source,
            registry,
            options,
        }
    }

    /// Poll, translate and route up to `max_events` native events.
    ///
    /// Without a `destination` this is a single-shot poll: at most one native
    /// event is fetched and its translation is returned in
    /// [`PollOutcome::event`]. With a destination, events are sent there
    /// (delivery reports go to their private channel when one is registered)
    /// until the batch limit, an empty poll, or cancellation.
    ///
    /// Only the first native poll blocks for `timeout`; the rest of the batch
    /// drains already-buffered events.
    ///
    /// Native source failures are returned as errors. Everything else is
    /// logged or reported through the outcome.
    pub async fn event_poll(
        &self,
        destination: Option<&mpsc::Sender<Event>>,
        timeout: Duration,
        max_events: usize,
        cancel: Option<&CancellationToken>,
    ) -> Result<PollOutcome> {
        let max_events = if destination.is_none() { 1 } else { max_events };
        let mut session = PollSession::new(self.source);
        let mut timeout = timeout;
        let mut outcome = PollOutcome::new();

        'out: for _ in 0..max_events {
            let native = session.fetch(timeout).await?;
            timeout = Duration::ZERO;

            let event = match translate(native, self.registry, self.options) {
                Translation::Nothing => {
                    outcome.stop(DispatchState::Drained);
                    break 'out;
                }
                Translation::Ignored => continue,
                Translation::Event(event) => event,
                Translation::Deliveries(mut reports) => {
                    while let Some(routed) = reports.next() {
                        let private;
                        let (tx, is_private) = match (routed.route, destination) {
                            (Route::Private(sender), _) => {
                                private = sender;
                                (&private, true)
                            }
                            (Route::Forward, Some(dest)) => (dest, false),
                            (Route::Forward, None) | (Route::Direct, _) => {
                                outcome.dropped_deliveries +=
                                    discard_batch(&mut reports, "returning one directly");
                                outcome.returned(routed.event);
                                break 'out;
                            }
                        };

                        match deliver_or_cancel(tx, routed.event, cancel).await {
                            Delivery::Sent => outcome.delivered += 1,
                            Delivery::Cancelled => {
                                outcome.dropped_deliveries +=
                                    discard_batch(&mut reports, "cancellation");
                                outcome.stop(DispatchState::Terminated);
                                break 'out;
                            }
                            Delivery::Closed if is_private => {
                                tracing::debug!("Completion channel closed, delivery report dropped");
                            }
                            Delivery::Closed => {
                                outcome.dropped_deliveries +=
                                    discard_batch(&mut reports, "destination closed");
                                outcome.stop(DispatchState::Closed);
                                break 'out;
                            }
                        }
                    }
                    continue;
                }
            };

            tracing::trace!("Translated {} event", event.name());

            match destination {
                Some(dest) => match deliver_or_cancel(dest, event, cancel).await {
                    Delivery::Sent => outcome.delivered += 1,
                    Delivery::Cancelled => {
                        outcome.stop(DispatchState::Terminated);
                        break 'out;
                    }
                    Delivery::Closed => {
                        outcome.stop(DispatchState::Closed);
                        break 'out;
                    }
                },
                None => {
                    outcome.returned(event);
                    break 'out;
                }
            }
        }

        session.close();
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{KafkaError, Stats, TopicPartition};
    use crate::native::memory::{MemoryEvent, MemoryMessage, MemorySource};
    use crate::registry::DeliveryContext;
    use tokio_test::{assert_pending, assert_ready, assert_ready_eq};

    fn stats() -> Event {
        Event::Stats(Stats::new("{}"))
    }

    #[test]
    fn test_deliver_or_cancel_waits_then_cancels() {
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send(stats()).unwrap();
        let cancel = CancellationToken::new();

        let mut fut = tokio_test::task::spawn(deliver_or_cancel(&tx, stats(), Some(&cancel)));
        assert_pending!(fut.poll());

        cancel.cancel();
        assert!(fut.is_woken());
        assert_ready_eq!(fut.poll(), Delivery::Cancelled);
    }

    #[tokio::test]
    async fn test_deliver_or_cancel_sent_and_closed() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        assert_eq!(deliver_or_cancel(&tx, stats(), Some(&cancel)).await, Delivery::Sent);
        assert!(rx.recv().await.is_some());

        drop(rx);
        assert_eq!(deliver_or_cancel(&tx, stats(), None).await, Delivery::Closed);
    }

    #[tokio::test]
    async fn test_single_shot_forces_one_event() {
        let source = MemorySource::new();
        let registry = DeliveryRegistry::new();
        source.push(MemoryEvent::stats(r#"{"a":1}"#));
        source.push(MemoryEvent::stats(r#"{"a":2}"#));

        let dispatcher = Dispatcher::new(&source, &registry, TranslateOptions::default());
        let outcome = dispatcher
            .event_poll(None, Duration::ZERO, 100, None)
            .await
            .unwrap();

        assert_eq!(outcome.state, DispatchState::Returned);
        assert!(!outcome.terminated);
        assert_eq!(outcome.event.unwrap().to_string(), r#"{"a":1}"#);
        assert_eq!(source.probe().polls(), 1);
        assert_eq!(source.pending(), 1);
        assert_eq!(source.probe().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_single_shot_empty_is_drained() {
        let source = MemorySource::new();
        let registry = DeliveryRegistry::new();
        let dispatcher = Dispatcher::new(&source, &registry, TranslateOptions::default());

        let outcome = dispatcher
            .event_poll(None, Duration::from_millis(5), 1, None)
            .await
            .unwrap();
        assert!(outcome.event.is_none());
        assert!(!outcome.terminated);
        assert_eq!(outcome.state, DispatchState::Drained);
    }

    #[tokio::test]
    async fn test_batch_uses_zero_timeout_after_first_poll() {
        let source = MemorySource::new();
        let registry = DeliveryRegistry::new();
        for _ in 0..3 {
            source.push(MemoryEvent::stats("{}"));
        }
        let (tx, mut rx) = mpsc::channel(8);

        let dispatcher = Dispatcher::new(&source, &registry, TranslateOptions::default());
        let outcome = dispatcher
            .event_poll(Some(&tx), Duration::from_millis(50), 10, None)
            .await
            .unwrap();

        assert_eq!(outcome.state, DispatchState::Drained);
        assert_eq!(outcome.delivered, 3);
        assert_eq!(
            source.probe().poll_timeouts(),
            vec![
                Duration::from_millis(50),
                Duration::ZERO,
                Duration::ZERO,
                Duration::ZERO
            ]
        );
        for _ in 0..3 {
            assert!(rx.try_recv().is_ok());
        }
        assert_eq!(source.probe().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_batch_limit_reached() {
        let source = MemorySource::new();
        let registry = DeliveryRegistry::new();
        for _ in 0..5 {
            source.push(MemoryEvent::stats("{}"));
        }
        let (tx, _rx) = mpsc::channel(8);

        let dispatcher = Dispatcher::new(&source, &registry, TranslateOptions::default());
        let outcome = dispatcher
            .event_poll(Some(&tx), Duration::ZERO, 2, None)
            .await
            .unwrap();

        assert_eq!(outcome.state, DispatchState::BatchLimitReached);
        assert_eq!(outcome.delivered, 2);
        assert_eq!(source.pending(), 3);
    }

    #[tokio::test]
    async fn test_ignored_events_do_not_stop_batch() {
        let source = MemorySource::new();
        let registry = DeliveryRegistry::new();
        source.push(MemoryEvent::unknown("CreateTopics"));
        source.push(MemoryEvent::error(KafkaError::new(-195, "transport")));
        let (tx, mut rx) = mpsc::channel(8);

        let dispatcher = Dispatcher::new(&source, &registry, TranslateOptions::default());
        let outcome = dispatcher
            .event_poll(Some(&tx), Duration::ZERO, 10, None)
            .await
            .unwrap();

        assert_eq!(outcome.delivered, 1);
        assert!(matches!(rx.try_recv().unwrap(), Event::Error(_)));
        assert_eq!(source.probe().released(), 2);
    }

    #[tokio::test]
    async fn test_native_failure_propagates_and_releases() {
        let source = MemorySource::new();
        let registry = DeliveryRegistry::new();
        source.push(MemoryEvent::stats("{}"));
        source.push_failure("queue destroyed");
        let (tx, _rx) = mpsc::channel(8);

        let dispatcher = Dispatcher::new(&source, &registry, TranslateOptions::default());
        let err = dispatcher
            .event_poll(Some(&tx), Duration::ZERO, 10, None)
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(source.probe().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_closed_destination_stops_loop() {
        let source = MemorySource::new();
        let registry = DeliveryRegistry::new();
        source.push(MemoryEvent::assign(vec![TopicPartition::new("t", 0)]));
        source.push(MemoryEvent::stats("{}"));
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        let dispatcher = Dispatcher::new(&source, &registry, TranslateOptions::default());
        let outcome = dispatcher
            .event_poll(Some(&tx), Duration::ZERO, 10, None)
            .await
            .unwrap();

        assert_eq!(outcome.state, DispatchState::Closed);
        assert!(outcome.terminated);
        assert_eq!(source.pending(), 1);
    }

    #[tokio::test]
    async fn test_closed_completion_channel_is_tolerated() {
        let source = MemorySource::new();
        let registry = DeliveryRegistry::new();
        let (private_tx, private_rx) = mpsc::channel(1);
        drop(private_rx);
        let token = registry.register(DeliveryContext::new(Some(private_tx), None));
        source.push(MemoryEvent::delivery_report(vec![
            MemoryMessage::new("t", 0).token(token),
        ]));
        source.push(MemoryEvent::stats("{}"));
        let (tx, mut rx) = mpsc::channel(8);

        let dispatcher = Dispatcher::new(&source, &registry, TranslateOptions::default());
        let outcome = dispatcher
            .event_poll(Some(&tx), Duration::ZERO, 10, None)
            .await
            .unwrap();

        assert_eq!(outcome.state, DispatchState::Drained);
        assert!(matches!(rx.try_recv().unwrap(), Event::Stats(_)));
    }

    #[tokio::test]
    async fn test_direct_return_drops_and_evicts_remainder() {
        let source = MemorySource::new();
        let registry = DeliveryRegistry::new();
        let (private_tx, mut private_rx) = mpsc::channel(1);
        let later = registry.register(DeliveryContext::new(Some(private_tx), None));
        source.push(MemoryEvent::delivery_report(vec![
            MemoryMessage::new("t", 0).value("unrouted"),
            MemoryMessage::new("t", 0).token(later),
        ]));

        let options = TranslateOptions {
            forward_unrouted: false,
            ..TranslateOptions::default()
        };
        let dispatcher = Dispatcher::new(&source, &registry, options);
        let outcome = dispatcher
            .event_poll(None, Duration::ZERO, 1, None)
            .await
            .unwrap();

        let msg = outcome.event.unwrap().into_message().unwrap();
        assert_eq!(msg.value.as_deref(), Some(&b"unrouted"[..]));
        assert_eq!(outcome.dropped_deliveries, 1);
        assert!(registry.is_empty());
        assert!(private_rx.recv().await.is_none());
        assert_eq!(source.probe().outstanding(), 0);
    }

    #[test]
    fn test_cancel_mid_batch_evicts_remainder() {
        let source = MemorySource::new();
        let registry = DeliveryRegistry::new();
        let (private_tx, mut private_rx) = mpsc::channel(1);
        let later = registry.register(DeliveryContext::new(Some(private_tx), None));
        source.push(MemoryEvent::delivery_report(vec![
            MemoryMessage::new("t", 0).value("forwarded"),
            MemoryMessage::new("t", 0).token(later),
        ]));
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send(stats()).unwrap();
        let cancel = CancellationToken::new();

        let dispatcher = Dispatcher::new(&source, &registry, TranslateOptions::default());
        let mut fut = tokio_test::task::spawn(dispatcher.event_poll(
            Some(&tx),
            Duration::ZERO,
            10,
            Some(&cancel),
        ));
        assert_pending!(fut.poll());
        assert!(registry.contains(later));

        cancel.cancel();
        let outcome = assert_ready!(fut.poll()).unwrap();
        drop(fut);

        assert_eq!(outcome.state, DispatchState::Terminated);
        assert_eq!(outcome.dropped_deliveries, 1);
        assert!(registry.is_empty());
        assert!(private_rx.try_recv().is_err());
        assert_eq!(source.probe().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_closed_destination_mid_batch_evicts_remainder() {
        let source = MemorySource::new();
        let registry = DeliveryRegistry::new();
        let (private_tx, mut private_rx) = mpsc::channel(1);
        let later = registry.register(DeliveryContext::new(Some(private_tx), None));
        source.push(MemoryEvent::delivery_report(vec![
            MemoryMessage::new("t", 0).value("forwarded"),
            MemoryMessage::new("t", 0).token(later),
        ]));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let dispatcher = Dispatcher::new(&source, &registry, TranslateOptions::default());
        let outcome = dispatcher
            .event_poll(Some(&tx), Duration::ZERO, 10, None)
            .await
            .unwrap();

        assert_eq!(outcome.state, DispatchState::Closed);
        assert_eq!(outcome.dropped_deliveries, 1);
        assert!(!registry.contains(later));
        assert!(private_rx.recv().await.is_none());
    }
}
