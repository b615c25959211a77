//! Receives events from the broker and dispatches them to a handler.
//!
//! Handling failures are retried with the `handling` profile and then logged.
//! Nothing is re-queued here; delivery is recovered by the producer-side
//! replay of unprocessed events.

use std::sync::Arc;

use courier_core::broker::{Broker, BrokerError, MessageStream};
use courier_core::event::{Event, EventType};
use courier_core::handler::{EventHandler, dispatch};
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::idempotency::{DEFAULT_IDEMPOTENCY_CAPACITY, IdempotencyGuard};
use crate::application::publisher::DEFAULT_CHANNEL;
use crate::domain::compressor::PayloadCompressor;
use crate::error::PipelineError;
use crate::retry::{RetryConfig, RetryExecutor};

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberConfig {
    /// Broker channel to subscribe to.
    pub channel: String,
    /// Retry profile for establishing the connection.
    pub connect_retry: RetryConfig,
    /// Retry profile for handler invocation.
    pub handling_retry: RetryConfig,
    /// Number of handled event ids remembered for deduplication.
    pub idempotency_capacity: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_owned(),
            connect_retry: RetryConfig::connect(),
            handling_retry: RetryConfig::handling(),
            idempotency_capacity: DEFAULT_IDEMPOTENCY_CAPACITY,
        }
    }
}

/// What happened to one received payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The handler processed the event.
    Handled,
    /// The event id was already handled and was skipped.
    Duplicate,
    /// The type is not one this service knows. Dropped.
    UnknownType,
    /// The payload was not a decodable event. Dropped.
    Malformed,
    /// The handler kept failing after every retry.
    Failed,
}

/// Stops a running subscription.
#[derive(Debug)]
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Stops receiving. In-flight handler invocations run to completion.
    pub async fn shutdown(self) {
        self.task.abort();
        // Cancellation is the expected outcome.
        let _ = self.task.await;
    }

    /// Whether the receive loop has ended, e.g. because the broker closed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Consumes the shared event channel on behalf of one handler.
pub struct EventSubscriber {
    broker: Arc<dyn Broker>,
    handler: Arc<dyn EventHandler>,
    retry: RetryExecutor,
    compressor: PayloadCompressor,
    seen: IdempotencyGuard,
    config: SubscriberConfig,
}

impl std::fmt::Debug for EventSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscriber")
            .field("handler", &self.handler.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EventSubscriber {
    /// Creates a subscriber that will deliver events to `handler`.
    pub fn new(
        broker: Arc<dyn Broker>,
        handler: Arc<dyn EventHandler>,
        config: SubscriberConfig,
    ) -> Self {
        Self {
            broker,
            handler,
            retry: RetryExecutor::default(),
            compressor: PayloadCompressor::default(),
            seen: IdempotencyGuard::new(config.idempotency_capacity),
            config,
        }
    }

    /// Replaces the retry executor.
    #[must_use]
    pub fn with_retry_executor(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    /// Connects with the `connect` retry profile, subscribes to the channel
    /// and spawns the receive loop. Each message is handled on its own task.
    ///
    /// If the broker ends the stream, the loop connects and subscribes again
    /// with the same profile, and keeps trying until the handle is shut down.
    ///
    /// # Errors
    ///
    /// Returns the broker error if the first connect and subscribe is
    /// exhausted.
    pub async fn start(self: Arc<Self>) -> Result<SubscriptionHandle, PipelineError> {
        let mut messages = self.open_stream().await?;
        info!(
            channel = %self.config.channel,
            handler = self.handler.name(),
            "subscribed to event channel"
        );

        let subscriber = Arc::clone(&self);
        let task = tokio::spawn(async move {
            loop {
                while let Some(payload) = messages.next().await {
                    let subscriber = Arc::clone(&subscriber);
                    tokio::spawn(async move {
                        subscriber.on_message(&payload).await;
                    });
                }
                warn!(channel = %subscriber.config.channel, "event subscription ended, resubscribing");
                messages = subscriber.reopen_stream().await;
                info!(channel = %subscriber.config.channel, "resubscribed to event channel");
            }
        });

        Ok(SubscriptionHandle { task })
    }

    async fn open_stream(&self) -> Result<MessageStream, BrokerError> {
        let broker = self.broker.as_ref();
        let channel = self.config.channel.as_str();
        self.retry
            .with_retry("broker.subscribe", &self.config.connect_retry, move || async move {
                broker.connect().await?;
                broker.subscribe(channel).await
            })
            .await
    }

    async fn reopen_stream(&self) -> MessageStream {
        loop {
            match self.open_stream().await {
                Ok(messages) => return messages,
                Err(err) => {
                    error!(channel = %self.config.channel, error = %err, "resubscribe failed after retries");
                    tokio::time::sleep(self.config.connect_retry.max_delay).await;
                }
            }
        }
    }

    /// Decodes one payload and hands it to the handler.
    pub async fn on_message(&self, payload: &str) -> DeliveryOutcome {
        let event = match self.decode(payload) {
            Ok(event) => event,
            Err(outcome) => return outcome,
        };

        if !self.seen.try_claim(event.id) {
            debug!(event_id = %event.id, "skipping already handled event");
            return DeliveryOutcome::Duplicate;
        }

        let handler = self.handler.as_ref();
        let received = &event;
        let result = self
            .retry
            .with_retry("handler.dispatch", &self.config.handling_retry, move || {
                dispatch(handler, received)
            })
            .await;

        match result {
            Ok(()) => {
                debug!(event_id = %event.id, event_type = %event.event_type, "event handled");
                DeliveryOutcome::Handled
            }
            Err(err) => {
                self.seen.release(event.id);
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    handler = handler.name(),
                    error = %err,
                    "event handling failed after retries"
                );
                DeliveryOutcome::Failed
            }
        }
    }

    fn decode(&self, payload: &str) -> Result<Event, DeliveryOutcome> {
        let raw: serde_json::Value = serde_json::from_str(payload).map_err(|err| {
            warn!(error = %err, "dropping malformed event payload");
            DeliveryOutcome::Malformed
        })?;

        let type_name = raw.get("type").and_then(serde_json::Value::as_str).unwrap_or_default();
        if type_name.parse::<EventType>().is_err() {
            warn!(event_type = type_name, "dropping event of unknown type");
            return Err(DeliveryOutcome::UnknownType);
        }

        let event: Event = serde_json::from_value(raw).map_err(|err| {
            warn!(error = %err, "dropping event with malformed envelope");
            DeliveryOutcome::Malformed
        })?;

        self.compressor.decompress(&event).map_err(|err| {
            error!(event_id = %event.id, error = %err, "dropping event with undecodable payload");
            DeliveryOutcome::Malformed
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use courier_test_support::{FixedClock, FixedRandom, RecordingBroker, RecordingHandler};
    use serde_json::json;

    use super::*;

    fn subscriber(broker: &Arc<RecordingBroker>, handler: &Arc<RecordingHandler>) -> Arc<EventSubscriber> {
        Arc::new(
            EventSubscriber::new(
                Arc::clone(broker) as Arc<dyn Broker>,
                Arc::clone(handler) as Arc<dyn EventHandler>,
                SubscriberConfig::default(),
            )
            .with_retry_executor(RetryExecutor::new(FixedRandom(0.0))),
        )
    }

    fn task_created() -> Event {
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());
        Event::new(
            EventType::TaskCreated,
            json!({"entityId": "t1", "currentState": {"title": "Write docs"}}),
            "task-service",
            &clock,
        )
    }

    fn wire(event: &Event) -> String {
        serde_json::to_string(event).unwrap()
    }

    #[tokio::test]
    async fn test_valid_event_is_handled() {
        let broker = Arc::new(RecordingBroker::new());
        let handler = Arc::new(RecordingHandler::new());
        let event = task_created();

        let outcome = subscriber(&broker, &handler).on_message(&wire(&event)).await;

        assert_eq!(outcome, DeliveryOutcome::Handled);
        assert_eq!(handler.handled(), vec![event]);
    }

    #[tokio::test]
    async fn test_unknown_type_is_dropped_without_calling_handler() {
        let broker = Arc::new(RecordingBroker::new());
        let handler = Arc::new(RecordingHandler::new());
        let mut payload = serde_json::to_value(task_created()).unwrap();
        payload["type"] = json!("task.archived");

        let outcome = subscriber(&broker, &handler)
            .on_message(&payload.to_string())
            .await;

        assert_eq!(outcome, DeliveryOutcome::UnknownType);
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_payloads_are_dropped() {
        let broker = Arc::new(RecordingBroker::new());
        let handler = Arc::new(RecordingHandler::new());
        let subscriber = subscriber(&broker, &handler);

        assert_eq!(subscriber.on_message("{not json").await, DeliveryOutcome::Malformed);
        assert_eq!(
            subscriber.on_message(r#"{"type": "task.created", "data": {}}"#).await,
            DeliveryOutcome::Malformed
        );
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn test_redelivered_event_is_handled_once() {
        let broker = Arc::new(RecordingBroker::new());
        let handler = Arc::new(RecordingHandler::new());
        let subscriber = subscriber(&broker, &handler);
        let payload = wire(&task_created());

        assert_eq!(subscriber.on_message(&payload).await, DeliveryOutcome::Handled);
        assert_eq!(subscriber.on_message(&payload).await, DeliveryOutcome::Duplicate);
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_failures_are_retried_with_handling_profile() {
        let broker = Arc::new(RecordingBroker::new());
        let handler = Arc::new(RecordingHandler::failing(2));

        let outcome = subscriber(&broker, &handler)
            .on_message(&wire(&task_created()))
            .await;

        assert_eq!(outcome, DeliveryOutcome::Handled);
        assert_eq!(handler.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_handling_fails_and_allows_redelivery() {
        // Arrange
        let broker = Arc::new(RecordingBroker::new());
        let handler = Arc::new(RecordingHandler::failing(3));
        let subscriber = subscriber(&broker, &handler);
        let payload = wire(&task_created());

        // Act
        let first = subscriber.on_message(&payload).await;
        let replayed = subscriber.on_message(&payload).await;

        // Assert
        assert_eq!(first, DeliveryOutcome::Failed);
        assert_eq!(replayed, DeliveryOutcome::Handled);
        assert_eq!(handler.calls(), 4);
        assert_eq!(handler.handled().len(), 1);
    }

    #[tokio::test]
    async fn test_compressed_payload_is_restored_before_handling() {
        let broker = Arc::new(RecordingBroker::new());
        let handler = Arc::new(RecordingHandler::new());
        let mut event = task_created();
        event.data = json!({"entityId": "t1", "currentState": {"body": "x".repeat(20_000)}});
        let compressed = PayloadCompressor::default().compress(&event).unwrap();
        assert!(compressed.is_compressed());

        let outcome = subscriber(&broker, &handler).on_message(&wire(&compressed)).await;

        assert_eq!(outcome, DeliveryOutcome::Handled);
        assert_eq!(handler.handled()[0].data, event.data);
        assert!(!handler.handled()[0].is_compressed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_retries_connect_and_receives_until_shutdown() {
        // Arrange
        let broker = Arc::new(RecordingBroker::new().failing_connects(2));
        let handler = Arc::new(RecordingHandler::new());
        let event = task_created();

        // Act
        let handle = subscriber(&broker, &handler).start().await.unwrap();
        let reached = broker.deliver(DEFAULT_CHANNEL, &wire(&event));
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Assert
        assert_eq!(broker.connect_calls(), 3);
        assert_eq!(reached, 1);
        assert_eq!(handler.handled(), vec![event]);

        handle.shutdown().await;
        assert_eq!(broker.deliver(DEFAULT_CHANNEL, &wire(&task_created())), 0);
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_is_restored_after_the_broker_drops_it() {
        // Arrange
        let broker = Arc::new(RecordingBroker::new());
        let handler = Arc::new(RecordingHandler::new());
        let handle = subscriber(&broker, &handler).start().await.unwrap();
        let event = task_created();

        // Act
        broker.close().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let reached = broker.deliver(DEFAULT_CHANNEL, &wire(&event));
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Assert
        assert!(!handle.is_finished());
        assert_eq!(broker.connect_calls(), 2);
        assert_eq!(reached, 1);
        assert_eq!(handler.handled(), vec![event]);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_fails_once_connect_attempts_are_exhausted() {
        let broker = Arc::new(RecordingBroker::new().failing_connects(u32::MAX));
        let handler = Arc::new(RecordingHandler::new());

        let result = subscriber(&broker, &handler).start().await;

        assert!(matches!(result, Err(PipelineError::Broker(_))));
        assert_eq!(broker.connect_calls(), RetryConfig::connect().max_attempts);
    }
}
