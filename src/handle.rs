//! Client handle: per-client event dispatch state.
//!
//! A `Handle` owns one native event source and one delivery registry for the
//! client lifetime, plus the shared events channel. Producers register
//! deliveries through it; a background dispatcher task (or explicit `poll`
//! calls) drains the native queue.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::dispatch::{DispatchState, Dispatcher, PollOutcome};
use crate::events::{Event, EventStream, Opaque, TranslateOptions};
use crate::native::NativeEventSource;
use crate::oauth::OAuthBearerToken;
use crate::registry::{DeliveryContext, DeliveryRegistry};
use crate::types::{ClientId, DeliveryToken, DispatchConfig, Error, Result};

/// Per-client dispatch state.
#[derive(Debug)]
pub struct Handle<S: NativeEventSource> {
    id: ClientId,
    source: Arc<S>,
    registry: Arc<DeliveryRegistry>,
    config: DispatchConfig,
    events_tx: mpsc::Sender<Event>,
    events_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    cancel: CancellationToken,
}

impl<S> Handle<S>
where
    S: NativeEventSource + 'static,
    S::Event: 'static,
{
    pub fn new(source: S, config: DispatchConfig) -> Result<Self> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::channel(config.events_channel_capacity);

        Ok(Self {
            id: ClientId::new(),
            source: Arc::new(source),
            registry: Arc::new(DeliveryRegistry::new()),
            config,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn registry(&self) -> &DeliveryRegistry {
        &self.registry
    }

    fn translate_options(&self) -> TranslateOptions {
        TranslateOptions {
            materialize_headers: self.config.materialize_headers,
            forward_unrouted: self.config.forward_unrouted_deliveries,
        }
    }

    /// Register a pending delivery at produce time.
    ///
    /// The returned token goes into the native message's private field. When
    /// the report arrives it is sent to `completion`, or, without one, to the
    /// shared events stream if forwarding is enabled.
    pub fn register_delivery(
        &self,
        completion: Option<mpsc::Sender<Event>>,
        opaque: Option<Opaque>,
    ) -> DeliveryToken {
        self.registry
            .register(DeliveryContext::new(completion, opaque))
    }

    /// Take the shared events stream. Available once per client.
    pub fn events(&self) -> Result<EventStream> {
        self.events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(EventStream::new)
            .ok_or_else(|| Error::closed(format!("events stream of {} already taken", self.id)))
    }

    /// Poll for a single event and return it.
    ///
    /// `Ok(None)` means nothing was available within `timeout`.
    pub async fn poll(&self, timeout: Duration) -> Result<Option<Event>> {
        let outcome = self.poll_into(None, timeout, 1, None).await?;
        Ok(outcome.event)
    }

    /// Run one dispatch call with explicit destination, batch size and
    /// cancellation.
    pub async fn poll_into(
        &self,
        destination: Option<&mpsc::Sender<Event>>,
        timeout: Duration,
        max_events: usize,
        cancel: Option<&CancellationToken>,
    ) -> Result<PollOutcome> {
        Dispatcher::new(&*self.source, &self.registry, self.translate_options())
            .event_poll(destination, timeout, max_events, cancel)
            .await
    }

    /// Start the background dispatcher feeding the shared events stream.
    ///
    /// Runs until [`close`](Self::close). Dropping the events stream does not
    /// stop it: delivery reports with a private completion channel are still
    /// routed, and events meant for the stream are dropped. The task result
    /// carries native source failures.
    pub fn spawn_dispatcher(&self) -> JoinHandle<Result<()>> {
        let id = self.id.clone();
        let source = self.source.clone();
        let registry = self.registry.clone();
        let events_tx = self.events_tx.clone();
        let cancel = self.cancel.clone();
        let options = self.translate_options();
        let poll_timeout = self.config.poll_timeout;
        let max_events = self.config.max_events_per_poll;

        let span = tracing::info_span!("dispatcher", client = %id);

        let task = async move {
            tracing::info!("Dispatcher started for client {}", id);
            let dispatcher = Dispatcher::new(&*source, &registry, options);
            let mut stream_closed = false;

            while !cancel.is_cancelled() {
                let outcome = match dispatcher
                    .event_poll(Some(&events_tx), poll_timeout, max_events, Some(&cancel))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!("Dispatcher for client {} failed: {}", id, e);
                        return Err(e);
                    }
                };

                if let Some(event) = outcome.event {
                    tracing::warn!("Unrouted {} event dropped (forwarding disabled)", event.name());
                }
                match outcome.state {
                    DispatchState::Terminated => break,
                    DispatchState::Closed if !stream_closed => {
                        stream_closed = true;
                        tracing::info!(
                            "Events stream of client {} closed, dropping stream events",
                            id
                        );
                    }
                    _ => {}
                }

                // A source that returns immediately must not starve the runtime.
                tokio::task::yield_now().await;
            }

            tracing::info!("Dispatcher stopped for client {}", id);
            Ok(())
        };

        tokio::spawn(task.instrument(span))
    }

    /// Stop the background dispatcher. Pending deliveries stay registered.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Hand a freshly built token to the native client.
    ///
    /// Fails with [`Error::AuthConfig`] when the token is malformed; the
    /// caller should then report the failure through
    /// [`set_oauthbearer_token_failure`](Self::set_oauthbearer_token_failure).
    pub fn set_oauthbearer_token(&self, token: &OAuthBearerToken) -> Result<()> {
        token.validate()?;
        self.source.set_oauthbearer_token(token)?;
        tracing::debug!("OAUTHBEARER token set for principal {}", token.principal);
        Ok(())
    }

    /// Tell the native client that no token could be produced.
    pub fn set_oauthbearer_token_failure(&self, reason: &str) -> Result<()> {
        if reason.is_empty() {
            return Err(Error::validation("token failure reason must not be empty"));
        }
        tracing::warn!("OAUTHBEARER token failure: {}", reason);
        self.source.set_oauthbearer_token_failure(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::memory::{MemoryEvent, MemorySource};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::collections::HashMap;

    fn handle() -> Handle<MemorySource> {
        Handle::new(MemorySource::new(), DispatchConfig::default()).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = DispatchConfig {
            events_channel_capacity: 0,
            ..DispatchConfig::default()
        };
        assert!(Handle::new(MemorySource::new(), config).is_err());
    }

    #[test]
    fn test_events_taken_once() {
        let h = handle();
        assert!(h.events().is_ok());
        assert!(matches!(h.events(), Err(Error::Closed(_))));
    }

    #[tokio::test]
    async fn test_poll_single_event() {
        let h = handle();
        h.source().push(MemoryEvent::oauthbearer_refresh("principal=alice"));

        let event = h.poll(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(event.name(), "OAuthBearerTokenRefresh");
        assert!(h.poll(Duration::ZERO).await.unwrap().is_none());
    }

    #[test]
    fn test_set_token_validates_before_native() {
        let h = handle();
        let mut token = OAuthBearerToken {
            token_value: "t".to_string(),
            expiration: Utc::now() + ChronoDuration::minutes(5),
            principal: String::new(),
            extensions: HashMap::new(),
        };

        assert!(matches!(h.set_oauthbearer_token(&token), Err(Error::AuthConfig(_))));
        assert!(h.source().oauthbearer_tokens().is_empty());

        token.principal = "alice".to_string();
        h.set_oauthbearer_token(&token).unwrap();
        assert_eq!(h.source().oauthbearer_tokens(), vec![token]);
    }

    #[test]
    fn test_token_failure_forwarded() {
        let h = handle();
        assert!(h.set_oauthbearer_token_failure("").is_err());
        h.set_oauthbearer_token_failure("no principal").unwrap();
        assert_eq!(h.source().oauthbearer_failures(), vec!["no principal".to_string()]);
    }

    #[tokio::test]
    async fn test_dispatcher_stops_on_close() {
        let h = handle();
        let task = h.spawn_dispatcher();
        h.close();
        assert!(h.is_closed());
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_dispatcher_warns_on_direct_return() {
        let config = DispatchConfig {
            forward_unrouted_deliveries: false,
            poll_timeout: Duration::from_millis(5),
            ..DispatchConfig::default()
        };
        let h = Handle::new(MemorySource::new(), config).unwrap();
        let _events = h.events().unwrap();
        h.source().push(MemoryEvent::delivery_report(vec![
            crate::native::memory::MemoryMessage::new("t", 0),
        ]));

        let task = h.spawn_dispatcher();
        while h.source().pending() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        h.close();
        task.await.unwrap().unwrap();

        assert!(logs_contain("WARN"));
        assert!(logs_contain("Unrouted Message event dropped"));
    }
}
