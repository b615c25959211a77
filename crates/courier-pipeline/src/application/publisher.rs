//! Emits single events onto the broker with bounded retry.
//!
//! The publisher guarantees only that an emit was attempted with the
//! `publish` retry profile. Eventual delivery is the event store's job.

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::broker::Broker;
use courier_core::clock::Clock;
use courier_core::event::{DomainEventPayload, Event, EventType};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::application::dispatch::EventDispatcher;
use crate::domain::compressor::PayloadCompressor;
use crate::domain::validator::EventValidator;
use crate::error::PipelineError;
use crate::retry::{RetryConfig, RetryExecutor};

/// Channel events are emitted on unless configured otherwise.
pub const DEFAULT_CHANNEL: &str = "domain-events";

/// Source stamped on events built by this service unless configured otherwise.
pub const DEFAULT_SOURCE: &str = "task-service";

/// Publisher settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherConfig {
    /// Broker channel to emit on.
    pub channel: String,
    /// Source stamped on events built by the publisher.
    pub source: String,
    /// Retry profile wrapped around each emit.
    pub retry: RetryConfig,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_owned(),
            source: DEFAULT_SOURCE.to_owned(),
            retry: RetryConfig::publish(),
        }
    }
}

/// A state change reported by domain code, before it becomes an [`Event`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEventInput {
    /// The event type.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// The entity whose state changed.
    pub entity_id: String,
    /// State after the change.
    pub current_state: serde_json::Value,
    /// State before the change.
    #[serde(default)]
    pub previous_state: Option<serde_json::Value>,
    /// Who made the change.
    #[serde(default)]
    pub actor_id: Option<String>,
    /// Free-form context.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Links this event to others from the same causal chain.
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl DomainEventInput {
    /// A state change with only the required fields.
    #[must_use]
    pub fn new(
        event_type: EventType,
        entity_id: impl Into<String>,
        current_state: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            entity_id: entity_id.into(),
            current_state,
            previous_state: None,
            actor_id: None,
            metadata: None,
            correlation_id: None,
        }
    }

    /// Sets the prior state.
    #[must_use]
    pub fn with_previous_state(mut self, previous_state: serde_json::Value) -> Self {
        self.previous_state = Some(previous_state);
        self
    }

    /// Sets the actor.
    #[must_use]
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Sets the free-form context.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Builds, validates, compresses and emits events.
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
    clock: Arc<dyn Clock>,
    retry: RetryExecutor,
    validator: EventValidator,
    compressor: PayloadCompressor,
    config: PublisherConfig,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EventPublisher {
    /// Creates a publisher with default validation limits, compression
    /// threshold and jitter source.
    pub fn new(broker: Arc<dyn Broker>, clock: Arc<dyn Clock>, config: PublisherConfig) -> Self {
        Self {
            broker,
            validator: EventValidator::new(Arc::clone(&clock)),
            clock,
            retry: RetryExecutor::default(),
            compressor: PayloadCompressor::default(),
            config,
        }
    }

    /// Replaces the retry executor.
    #[must_use]
    pub fn with_retry_executor(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the validator.
    #[must_use]
    pub fn with_validator(mut self, validator: EventValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Replaces the compressor.
    #[must_use]
    pub fn with_compressor(mut self, compressor: PayloadCompressor) -> Self {
        self.compressor = compressor;
        self
    }

    /// The publisher's settings.
    #[must_use]
    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// The validator applied before publishing new events.
    #[must_use]
    pub fn validator(&self) -> &EventValidator {
        &self.validator
    }

    /// Builds a new event stamped with the publisher's clock. `source`
    /// defaults to the configured service name.
    #[must_use]
    pub fn build_event(
        &self,
        event_type: EventType,
        data: serde_json::Value,
        source: Option<&str>,
        correlation_id: Option<String>,
    ) -> Event {
        Event::new(
            event_type,
            data,
            source.unwrap_or(&self.config.source),
            self.clock.as_ref(),
        )
        .with_correlation_id(correlation_id)
    }

    /// Builds an event with the standard domain payload shape.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Serialization` if the payload cannot be encoded.
    pub fn build_domain_event(&self, input: DomainEventInput) -> Result<Event, PipelineError> {
        let payload = DomainEventPayload {
            entity_id: input.entity_id,
            previous_state: input.previous_state,
            current_state: input.current_state,
            actor_id: input.actor_id,
            metadata: input.metadata,
        };
        let data = serde_json::to_value(payload)?;
        Ok(self.build_event(input.event_type, data, None, input.correlation_id))
    }

    /// Builds, validates and emits a new event.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Validation` without emitting if the event is
    /// rejected, or the last broker error once retries are exhausted.
    pub async fn publish(
        &self,
        event_type: EventType,
        data: serde_json::Value,
        source: Option<&str>,
        correlation_id: Option<String>,
    ) -> Result<Event, PipelineError> {
        let event = self.build_event(event_type, data, source, correlation_id);
        self.validator.validate(&event)?;
        self.publish_event(&event).await?;
        Ok(event)
    }

    /// Publishes a domain state change with the standard payload shape.
    ///
    /// # Errors
    ///
    /// As [`EventPublisher::publish`].
    pub async fn publish_domain_event(&self, input: DomainEventInput) -> Result<Event, PipelineError> {
        let event = self.build_domain_event(input)?;
        self.validator.validate(&event)?;
        self.publish_event(&event).await?;
        Ok(event)
    }

    /// Emits an already-built event as-is, compressing oversized payloads.
    /// No validation is applied, so stored events can be replayed verbatim.
    ///
    /// Every attempt (re)establishes the broker connection first, so a
    /// connection lost between publishes is rebuilt by the retry loop.
    ///
    /// # Errors
    ///
    /// Returns the last broker error once the `publish` retry profile is
    /// exhausted.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn publish_event(&self, event: &Event) -> Result<(), PipelineError> {
        let outgoing = self.compressor.compress_or_original(event);
        let serialized = serde_json::to_string(&outgoing)?;
        let payload = serialized.as_str();
        let channel = self.config.channel.as_str();
        let broker = self.broker.as_ref();

        self.retry
            .with_retry("broker.emit", &self.config.retry, move || async move {
                broker.connect().await?;
                broker.emit(channel, payload).await
            })
            .await?;

        debug!(channel, bytes = payload.len(), "event emitted");
        Ok(())
    }
}

#[async_trait]
impl EventDispatcher for EventPublisher {
    async fn dispatch(&self, event: &Event) -> Result<(), PipelineError> {
        self.publish_event(event).await
    }
}
