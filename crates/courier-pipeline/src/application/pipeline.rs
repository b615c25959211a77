//! Facade wiring validation, storage, batching and publishing together.
//!
//! Every accepted event is stored before it is published or batched, so an
//! event lost from the batch buffer or rejected by the broker is still
//! recovered by `EventStore::replay_unprocessed_events`.

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::clock::Clock;
use courier_core::event::Event;
use courier_core::repository::EventRepository;
use tracing::{error, info, instrument};

use crate::application::batcher::{BatchConfig, BatchReport, EventBatcher};
use crate::application::dispatch::EventDispatcher;
use crate::application::event_store::EventStore;
use crate::application::publisher::{DomainEventInput, EventPublisher};
use crate::error::PipelineError;

/// Publishes an event, then marks its stored copy processed.
pub struct TrackingDispatcher {
    publisher: Arc<EventPublisher>,
    store: Arc<EventStore>,
}

impl TrackingDispatcher {
    /// Creates a dispatcher over `publisher` that confirms into `store`.
    pub fn new(publisher: Arc<EventPublisher>, store: Arc<EventStore>) -> Self {
        Self { publisher, store }
    }
}

#[async_trait]
impl EventDispatcher for TrackingDispatcher {
    async fn dispatch(&self, event: &Event) -> Result<(), PipelineError> {
        self.publisher.publish_event(event).await?;
        if let Err(err) = self.store.mark_as_processed(event.id, None).await {
            // Published but unconfirmed: replay will deliver it again.
            error!(event_id = %event.id, error = %err, "published event could not be marked processed");
        }
        Ok(())
    }
}

/// Entry point for domain code and the admin surface.
pub struct EventPipeline {
    publisher: Arc<EventPublisher>,
    store: Arc<EventStore>,
    batcher: EventBatcher,
}

impl std::fmt::Debug for EventPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPipeline")
            .field("publisher", &self.publisher)
            .field("batcher", &self.batcher)
            .finish_non_exhaustive()
    }
}

impl EventPipeline {
    /// Builds the store and batcher around `publisher`.
    pub fn new(
        publisher: Arc<EventPublisher>,
        repository: Arc<dyn EventRepository>,
        clock: Arc<dyn Clock>,
        batch: BatchConfig,
    ) -> Self {
        let store = Arc::new(EventStore::new(repository, Arc::clone(&publisher), clock));
        let dispatcher = TrackingDispatcher::new(Arc::clone(&publisher), Arc::clone(&store));
        Self {
            publisher,
            store,
            batcher: EventBatcher::new(Arc::new(dispatcher), batch),
        }
    }

    /// The durable store, for queries, replay and cleanup.
    #[must_use]
    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// The publisher used for live delivery and replay.
    #[must_use]
    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// The batcher behind [`EventPipeline::enqueue_domain_event`].
    #[must_use]
    pub fn batcher(&self) -> &EventBatcher {
        &self.batcher
    }

    /// Validates, stores and immediately publishes a domain event, marking it
    /// processed on success.
    ///
    /// # Errors
    ///
    /// Returns validation errors before anything is stored. A publish failure
    /// is returned after the event was stored, leaving it for replay.
    #[instrument(skip(self, input), fields(event_type = %input.event_type, entity_id = %input.entity_id))]
    pub async fn publish_domain_event(&self, input: DomainEventInput) -> Result<Event, PipelineError> {
        let event = self.accept(self.publisher.build_domain_event(input)?).await?;
        self.publisher.publish_event(&event).await?;
        if let Err(err) = self.store.mark_as_processed(event.id, None).await {
            error!(event_id = %event.id, error = %err, "published event could not be marked processed");
        }
        Ok(event)
    }

    /// Validates and stores a domain event, then hands it to the batcher.
    ///
    /// # Errors
    ///
    /// Returns validation and storage errors.
    pub async fn enqueue_domain_event(&self, input: DomainEventInput) -> Result<Event, PipelineError> {
        let event = self.accept(self.publisher.build_domain_event(input)?).await?;
        self.batcher.add(event.clone()).await;
        Ok(event)
    }

    /// Parses and validates an untrusted JSON event, stores it and hands it
    /// to the batcher.
    ///
    /// # Errors
    ///
    /// Returns validation and storage errors.
    pub async fn ingest(&self, raw: &serde_json::Value) -> Result<Event, PipelineError> {
        let event = self.publisher.validator().parse(raw)?;
        self.store.store_event(&event).await?;
        self.batcher.add(event.clone()).await;
        Ok(event)
    }

    /// Dispatches whatever the batcher holds. Called on shutdown.
    pub async fn flush_batch(&self) -> BatchReport {
        let report = self.batcher.flush().await;
        info!(dispatched = report.dispatched, failed = report.failed, "event batch flushed on request");
        report
    }

    async fn accept(&self, event: Event) -> Result<Event, PipelineError> {
        self.publisher.validator().validate(&event)?;
        self.store.store_event(&event).await?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use courier_core::broker::Broker;
    use courier_core::event::EventType;
    use courier_core::handler::EventHandler;
    use courier_test_support::{
        FixedClock, FixedRandom, InMemoryEventRepository, RecordingBroker, RecordingHandler,
    };
    use serde_json::json;

    use super::*;
    use crate::application::publisher::PublisherConfig;
    use crate::application::subscriber::{DeliveryOutcome, EventSubscriber, SubscriberConfig};
    use crate::domain::validator::ValidationError;
    use crate::retry::RetryExecutor;

    struct Fixture {
        repository: Arc<InMemoryEventRepository>,
        broker: Arc<RecordingBroker>,
        pipeline: EventPipeline,
    }

    fn fixture_with(broker: RecordingBroker, config: PublisherConfig) -> Fixture {
        let repository = Arc::new(InMemoryEventRepository::new());
        let broker = Arc::new(broker);
        let clock: Arc<dyn Clock> =
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()));
        let publisher = Arc::new(
            EventPublisher::new(Arc::clone(&broker) as Arc<dyn Broker>, Arc::clone(&clock), config)
                .with_retry_executor(RetryExecutor::new(FixedRandom(0.0))),
        );
        let pipeline = EventPipeline::new(
            publisher,
            Arc::clone(&repository) as Arc<dyn EventRepository>,
            clock,
            BatchConfig::default(),
        );
        Fixture {
            repository,
            broker,
            pipeline,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingBroker::new(), PublisherConfig::default())
    }

    fn task_created() -> DomainEventInput {
        DomainEventInput::new(
            EventType::TaskCreated,
            "t1",
            json!({"title": "Write docs", "status": "todo"}),
        )
    }

    #[tokio::test]
    async fn test_publish_domain_event_stores_and_emits_once() {
        // Arrange
        let f = fixture();

        // Act
        let event = f.pipeline.publish_domain_event(task_created()).await.unwrap();

        // Assert
        let rows = f.repository.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event.event_type, EventType::TaskCreated);
        assert_eq!(rows[0].event.source, "task-service");
        assert!(rows[0].processed);

        let emitted = f.broker.emitted_events();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].data["entityId"], "t1");
        assert_eq!(emitted[0].id, event.id);
    }

    #[tokio::test]
    async fn test_invalid_event_is_neither_stored_nor_emitted() {
        let f = fixture_with(
            RecordingBroker::new(),
            PublisherConfig {
                source: String::new(),
                ..PublisherConfig::default()
            },
        );

        let result = f.pipeline.publish_domain_event(task_created()).await;

        assert!(matches!(
            result,
            Err(PipelineError::Validation(ValidationError::EmptySource))
        ));
        assert!(f.repository.rows().is_empty());
        assert_eq!(f.broker.emit_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_publish_leaves_stored_event_for_replay() {
        // Arrange
        let f = fixture_with(RecordingBroker::new().failing_emits(5), PublisherConfig::default());

        // Act
        let result = f.pipeline.publish_domain_event(task_created()).await;
        let report = f.pipeline.store().replay_unprocessed_events().await.unwrap();

        // Assert
        assert!(matches!(result, Err(PipelineError::Broker(_))));
        assert_eq!(report.succeeded, 1);
        assert_eq!(f.broker.emitted().len(), 1);
        assert!(f.repository.rows()[0].processed);
    }

    #[tokio::test]
    async fn test_enqueued_event_is_stored_before_flush_and_processed_after() {
        let f = fixture();

        let event = f.pipeline.enqueue_domain_event(task_created()).await.unwrap();
        assert!(!f.repository.get(event.id).unwrap().processed);
        assert!(f.broker.emitted().is_empty());

        let report = f.pipeline.flush_batch().await;

        assert_eq!(report, BatchReport { dispatched: 1, failed: 0 });
        assert!(f.repository.get(event.id).unwrap().processed);
        assert_eq!(f.broker.emitted_events()[0].id, event.id);
    }

    #[tokio::test]
    async fn test_ingest_parses_stores_and_batches_raw_event() {
        let f = fixture();
        let raw = json!({
            "type": "task.status_changed",
            "data": {"entityId": "t1", "currentState": {"status": "done"}},
            "source": "mobile-gateway",
            "correlationId": "req-5",
            "timestamp": "2026-01-15T10:01:00Z"
        });

        let event = f.pipeline.ingest(&raw).await.unwrap();

        assert_eq!(event.event_type, EventType::TaskStatusChanged);
        assert_eq!(event.source, "mobile-gateway");
        assert!(f.repository.get(event.id).is_some());
        assert_eq!(f.pipeline.batcher().pending().await, 1);
    }

    #[tokio::test]
    async fn test_ingested_event_with_forged_compression_flag_reaches_handler() {
        // Arrange
        let f = fixture();
        let handler = Arc::new(RecordingHandler::new());
        let subscriber = EventSubscriber::new(
            Arc::clone(&f.broker) as Arc<dyn Broker>,
            Arc::clone(&handler) as Arc<dyn EventHandler>,
            SubscriberConfig::default(),
        );
        let raw = json!({
            "type": "task.updated",
            "data": {"entityId": "t1", "currentState": {"title": "Renamed"}},
            "source": "mobile-gateway",
            "timestamp": "2026-01-15T10:00:00Z",
            "metadata": {"compressed": true}
        });

        // Act
        let event = f.pipeline.ingest(&raw).await.unwrap();
        f.pipeline.flush_batch().await;
        let (_, payload) = f.broker.emitted().remove(0);
        let outcome = subscriber.on_message(&payload).await;

        // Assert
        assert_eq!(outcome, DeliveryOutcome::Handled);
        assert_eq!(handler.handled()[0].data, event.data);
        assert!(f.repository.get(event.id).unwrap().processed);
    }

    #[tokio::test]
    async fn test_ingest_rejects_unknown_type_without_storing() {
        let f = fixture();
        let raw = json!({
            "type": "task.archived",
            "data": {},
            "source": "mobile-gateway",
            "timestamp": "2026-01-15T10:00:00Z"
        });

        let result = f.pipeline.ingest(&raw).await;

        assert!(matches!(
            result,
            Err(PipelineError::Validation(ValidationError::UnknownType(_)))
        ));
        assert!(f.repository.rows().is_empty());
    }
}
