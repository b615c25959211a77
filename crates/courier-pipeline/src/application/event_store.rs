//! Durable record of every accepted event, with replay and retention.
//!
//! A stored event starts unprocessed, becomes processed once publication is
//! confirmed, and is only ever deleted from the processed state by retention
//! cleanup. Failed replays leave it unprocessed with `retry_count + 1`. The
//! store never schedules itself; the composition root drives replay and
//! cleanup.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use courier_core::clock::Clock;
use courier_core::error::DomainError;
use courier_core::event::{Event, EventType};
use courier_core::repository::{
    CounterField, DEFAULT_QUERY_LIMIT, EventQuery, EventRepository, EventUpdate, StoredEvent,
};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::application::publisher::EventPublisher;

/// Age in days after which processed events are deleted by default.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Counts of stored events by processing state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    /// Every stored event.
    pub total: u64,
    /// Events confirmed published.
    pub processed: u64,
    /// Events awaiting publication or replay.
    pub unprocessed: u64,
}

/// Outcome of one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    /// Events re-published.
    pub attempted: usize,
    /// Events the broker accepted.
    pub succeeded: usize,
    /// Events whose publish failed after retries.
    pub failed: usize,
}

/// Persists events and replays the ones the broker never confirmed.
pub struct EventStore {
    repository: Arc<dyn EventRepository>,
    publisher: Arc<EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore").finish_non_exhaustive()
    }
}

impl EventStore {
    /// Creates a store over `repository` that replays through `publisher`.
    pub fn new(
        repository: Arc<dyn EventRepository>,
        publisher: Arc<EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            publisher,
            clock,
        }
    }

    /// Persists `event` as unprocessed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::DuplicateEvent` if the id is already stored, or
    /// an infrastructure error from the repository.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn store_event(&self, event: &Event) -> Result<StoredEvent, DomainError> {
        let stored = StoredEvent::unprocessed(event.clone(), self.clock.now());
        self.repository.save(&stored).await?;
        Ok(stored)
    }

    /// Marks an event processed now. A non-fatal `error` is recorded alongside.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::EventNotFound` if the id is unknown.
    pub async fn mark_as_processed(&self, id: Uuid, error: Option<String>) -> Result<(), DomainError> {
        let update = EventUpdate::mark_processed(self.clock.now(), error);
        self.repository.update_by_id(id, &update).await
    }

    /// Records one more failed replay attempt.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::EventNotFound` if the id is unknown.
    pub async fn increment_retry_count(&self, id: Uuid) -> Result<(), DomainError> {
        self.repository.increment(id, CounterField::RetryCount, 1).await
    }

    /// Unprocessed events, oldest first.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    pub async fn find_unprocessed_events(&self, limit: i64) -> Result<Vec<StoredEvent>, DomainError> {
        self.repository
            .find(&EventQuery::unprocessed().limit(limit))
            .await
    }

    /// Events of one type, oldest first.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    pub async fn find_events_by_type(
        &self,
        event_type: EventType,
        limit: i64,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        self.repository
            .find(&EventQuery::of_type(event_type).limit(limit))
            .await
    }

    /// Events sharing a correlation id, oldest first.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    pub async fn find_events_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        self.repository
            .find(&EventQuery::correlated(correlation_id))
            .await
    }

    /// Events whose timestamp lies in `[start, end]`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    pub async fn find_events_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        self.repository.find(&EventQuery::between(start, end)).await
    }

    /// Events matching an arbitrary filter.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    pub async fn find(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, DomainError> {
        self.repository.find(query).await
    }

    /// Processed and unprocessed counts.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    pub async fn stats(&self) -> Result<EventStats, DomainError> {
        let total = self.repository.count(&EventQuery::all()).await?;
        let unprocessed = self.repository.count(&EventQuery::unprocessed()).await?;
        Ok(EventStats {
            total,
            processed: total.saturating_sub(unprocessed),
            unprocessed,
        })
    }

    /// Re-publishes up to one page of unprocessed events, oldest first.
    /// Successes are marked processed; failures get `retry_count + 1` and
    /// their error recorded. One event's failure does not stop the run.
    ///
    /// # Errors
    ///
    /// Returns repository errors from loading the page. Per-event
    /// bookkeeping failures are logged.
    #[instrument(skip(self))]
    pub async fn replay_unprocessed_events(&self) -> Result<ReplayReport, DomainError> {
        let pending = self.find_unprocessed_events(DEFAULT_QUERY_LIMIT).await?;
        let mut report = ReplayReport::default();

        for stored in &pending {
            let id = stored.id();
            report.attempted += 1;
            match self.publisher.publish_event(&stored.event).await {
                Ok(()) => {
                    report.succeeded += 1;
                    if let Err(err) = self.mark_as_processed(id, None).await {
                        error!(event_id = %id, error = %err, "replayed event could not be marked processed");
                    }
                }
                Err(publish_err) => {
                    report.failed += 1;
                    warn!(
                        event_id = %id,
                        retry_count = stored.retry_count + 1,
                        error = %publish_err,
                        "event replay failed"
                    );
                    self.record_replay_failure(id, &publish_err.to_string()).await;
                }
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                failed = report.failed,
                "replayed unprocessed events"
            );
        }
        Ok(report)
    }

    /// Re-publishes events of one type without processed bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns repository errors from loading the events.
    #[instrument(skip(self))]
    pub async fn replay_events_by_type(&self, event_type: EventType) -> Result<ReplayReport, DomainError> {
        let events = self
            .find_events_by_type(event_type, DEFAULT_QUERY_LIMIT)
            .await?;
        Ok(self.republish(&events).await)
    }

    /// Re-publishes a causal chain without processed bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns repository errors from loading the events.
    #[instrument(skip(self))]
    pub async fn replay_events_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<ReplayReport, DomainError> {
        let events = self.find_events_by_correlation_id(correlation_id).await?;
        Ok(self.republish(&events).await)
    }

    /// Permanently deletes processed events stored more than
    /// `older_than_days` ago. Unprocessed events are never deleted.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    #[instrument(skip(self))]
    pub async fn cleanup_old_events(&self, older_than_days: i64) -> Result<u64, DomainError> {
        let cutoff = self.clock.now() - Duration::days(older_than_days.max(0));
        let deleted = self
            .repository
            .delete_by_filter(&EventQuery::processed_before(cutoff))
            .await?;
        info!(deleted, %cutoff, "retention cleanup finished");
        Ok(deleted)
    }

    async fn record_replay_failure(&self, id: Uuid, reason: &str) {
        if let Err(err) = self.increment_retry_count(id).await {
            error!(event_id = %id, error = %err, "retry count could not be incremented");
        }
        let update = EventUpdate {
            error: Some(reason.to_owned()),
            ..EventUpdate::default()
        };
        if let Err(err) = self.repository.update_by_id(id, &update).await {
            error!(event_id = %id, error = %err, "replay failure could not be recorded");
        }
    }

    async fn republish(&self, events: &[StoredEvent]) -> ReplayReport {
        let mut report = ReplayReport::default();
        for stored in events {
            report.attempted += 1;
            match self.publisher.publish_event(&stored.event).await {
                Ok(()) => report.succeeded += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(event_id = %stored.id(), error = %err, "manual replay failed");
                }
            }
        }
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            "manual replay finished"
        );
        report
    }
}
