//! Event repository abstraction.
//!
//! The durable store behind `EventStore` is reached only through
//! [`EventRepository`]: save, filtered find, update-by-id, delete-by-filter
//! and numeric-field increment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::{Event, EventType};

/// Default row limit for unprocessed and by-type queries.
pub const DEFAULT_QUERY_LIMIT: i64 = 100;

/// At-rest representation of an event plus its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    /// The event as it was accepted into the pipeline.
    #[serde(flatten)]
    pub event: Event,
    /// Whether publication has been confirmed.
    pub processed: bool,
    /// When the event was marked processed.
    pub processed_at: Option<DateTime<Utc>>,
    /// Last failure message, if any.
    pub error: Option<String>,
    /// Number of failed replay attempts.
    pub retry_count: i32,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Wraps a freshly accepted event as an unprocessed row.
    #[must_use]
    pub fn unprocessed(event: Event, created_at: DateTime<Utc>) -> Self {
        Self {
            event,
            processed: false,
            processed_at: None,
            error: None,
            retry_count: 0,
            created_at,
        }
    }

    /// The event id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.event.id
    }
}

/// Filter over stored events. Every populated field must match.
///
/// Results are always ordered oldest-first by `created_at`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    /// Restrict to one event type.
    pub event_type: Option<EventType>,
    /// Restrict to one correlation id.
    pub correlation_id: Option<String>,
    /// Restrict by processed flag.
    pub processed: Option<bool>,
    /// Inclusive lower bound on the event timestamp.
    pub occurred_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the event timestamp.
    pub occurred_to: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the row creation time.
    pub created_before: Option<DateTime<Utc>>,
    /// Maximum number of rows to return.
    pub limit: Option<i64>,
}

impl EventQuery {
    /// Matches every stored event.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches events that have not been confirmed delivered.
    #[must_use]
    pub fn unprocessed() -> Self {
        Self {
            processed: Some(false),
            ..Self::default()
        }
    }

    /// Matches events of one type.
    #[must_use]
    pub fn of_type(event_type: EventType) -> Self {
        Self {
            event_type: Some(event_type),
            ..Self::default()
        }
    }

    /// Matches events sharing a correlation id.
    #[must_use]
    pub fn correlated(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..Self::default()
        }
    }

    /// Matches events whose timestamp lies in `[start, end]`.
    #[must_use]
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            occurred_from: Some(start),
            occurred_to: Some(end),
            ..Self::default()
        }
    }

    /// Matches processed events stored before `cutoff`. Used by retention cleanup.
    #[must_use]
    pub fn processed_before(cutoff: DateTime<Utc>) -> Self {
        Self {
            processed: Some(true),
            created_before: Some(cutoff),
            ..Self::default()
        }
    }

    /// Caps the number of returned rows.
    #[must_use]
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a stored event satisfies every populated criterion.
    /// `limit` is not considered.
    #[must_use]
    pub fn matches(&self, stored: &StoredEvent) -> bool {
        self.event_type
            .is_none_or(|event_type| stored.event.event_type == event_type)
            && self
                .correlation_id
                .as_deref()
                .is_none_or(|id| stored.event.correlation_id.as_deref() == Some(id))
            && self.processed.is_none_or(|flag| stored.processed == flag)
            && self
                .occurred_from
                .is_none_or(|from| stored.event.timestamp >= from)
            && self.occurred_to.is_none_or(|to| stored.event.timestamp <= to)
            && self
                .created_before
                .is_none_or(|cutoff| stored.created_at < cutoff)
    }
}

/// Partial update applied by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventUpdate {
    /// New processed flag.
    pub processed: Option<bool>,
    /// New processed timestamp.
    pub processed_at: Option<DateTime<Utc>>,
    /// New error message.
    pub error: Option<String>,
}

impl EventUpdate {
    /// Marks an event processed at `at`, optionally recording a non-fatal error.
    #[must_use]
    pub fn mark_processed(at: DateTime<Utc>, error: Option<String>) -> Self {
        Self {
            processed: Some(true),
            processed_at: Some(at),
            error,
        }
    }

    /// Applies the populated fields to a stored event.
    pub fn apply_to(&self, stored: &mut StoredEvent) {
        if let Some(processed) = self.processed {
            stored.processed = processed;
        }
        if let Some(processed_at) = self.processed_at {
            stored.processed_at = Some(processed_at);
        }
        if let Some(error) = &self.error {
            stored.error = Some(error.clone());
        }
    }
}

/// Numeric columns that support atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterField {
    /// Failed replay attempts.
    RetryCount,
}

impl CounterField {
    /// Column name in the persistent store.
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            CounterField::RetryCount => "retry_count",
        }
    }
}

/// Repository trait for persisting and querying stored events.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Inserts a new row. Fails with `DuplicateEvent` if the id exists.
    async fn save(&self, stored: &StoredEvent) -> Result<(), DomainError>;

    /// Returns rows matching `query`, oldest first.
    async fn find(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, DomainError>;

    /// Counts rows matching `query`, ignoring its limit.
    async fn count(&self, query: &EventQuery) -> Result<u64, DomainError>;

    /// Applies `update` to one row. Fails with `EventNotFound` if absent.
    async fn update_by_id(&self, id: Uuid, update: &EventUpdate) -> Result<(), DomainError>;

    /// Deletes every row matching `query` and returns how many were removed.
    async fn delete_by_filter(&self, query: &EventQuery) -> Result<u64, DomainError>;

    /// Adds `by` to a numeric field of one row. Fails with `EventNotFound` if absent.
    async fn increment(&self, id: Uuid, field: CounterField, by: i32) -> Result<(), DomainError>;
}
