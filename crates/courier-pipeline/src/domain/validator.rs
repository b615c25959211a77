//! Structural, size and freshness checks applied before an event is accepted.
//!
//! Rules are checked in a fixed order and the first violation is returned:
//! type, data, source, timestamp. Validation failures are never retried.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use courier_core::clock::Clock;
use courier_core::event::{
    DEFAULT_EVENT_VERSION, Event, EventMetadata, EventType, METADATA_COMPRESSED,
    METADATA_ORIGINAL_SIZE,
};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

/// Largest accepted serialized `data` size (1 MiB).
pub const MAX_DATA_BYTES: usize = 1024 * 1024;

/// Longest accepted `source`, in characters.
pub const MAX_SOURCE_LEN: usize = 100;

/// Allowed distance between an event's timestamp and the current time, in minutes.
pub const MAX_CLOCK_SKEW_MINUTES: i64 = 5;

/// A rule an event failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// The payload was not a JSON object or did not match the event shape.
    #[error("malformed event: {0}")]
    Malformed(String),

    /// `type` is missing or not a recognized event type.
    #[error("unknown event type: {0:?}")]
    UnknownType(String),

    /// `data` is missing or null.
    #[error("event data is required")]
    MissingData,

    /// `data` is present but not an object.
    #[error("event data must be an object")]
    DataNotObject,

    /// `data` serializes to more bytes than allowed.
    #[error("event data is {size} bytes, limit is {limit}")]
    DataTooLarge {
        /// Serialized size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// `source` is missing or blank.
    #[error("event source is required")]
    EmptySource,

    /// `source` is longer than allowed.
    #[error("event source is {length} characters, limit is {limit}")]
    SourceTooLong {
        /// Character count.
        length: usize,
        /// Configured limit.
        limit: usize,
    },

    /// `timestamp` is missing or not an RFC 3339 instant.
    #[error("event timestamp is not a valid instant: {0}")]
    InvalidTimestamp(String),

    /// `timestamp` lies outside the allowed skew window.
    #[error("event timestamp {timestamp} is more than {skew_minutes} minutes away from {now}")]
    TimestampOutOfRange {
        /// The event's timestamp.
        timestamp: DateTime<Utc>,
        /// Validation time.
        now: DateTime<Utc>,
        /// Allowed skew.
        skew_minutes: i64,
    },
}

/// Thresholds used by [`EventValidator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationLimits {
    /// Largest accepted serialized `data` size in bytes.
    pub max_data_bytes: usize,
    /// Longest accepted `source` in characters.
    pub max_source_len: usize,
    /// Allowed timestamp skew in either direction.
    pub max_clock_skew: Duration,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_data_bytes: MAX_DATA_BYTES,
            max_source_len: MAX_SOURCE_LEN,
            max_clock_skew: Duration::minutes(MAX_CLOCK_SKEW_MINUTES),
        }
    }
}

/// Untrusted event as received from outside the process.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingEvent {
    id: Option<Uuid>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
    source: Option<String>,
    correlation_id: Option<String>,
    timestamp: Option<String>,
    version: Option<i32>,
    #[serde(default)]
    metadata: EventMetadata,
}

/// Applies the acceptance rules to events.
#[derive(Clone)]
pub struct EventValidator {
    clock: Arc<dyn Clock>,
    limits: ValidationLimits,
}

impl std::fmt::Debug for EventValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventValidator")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl EventValidator {
    /// Creates a validator with the default limits.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(clock, ValidationLimits::default())
    }

    /// Creates a validator with custom limits.
    pub fn with_limits(clock: Arc<dyn Clock>, limits: ValidationLimits) -> Self {
        Self { clock, limits }
    }

    /// Validates a typed event. The type rule holds by construction.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self, event: &Event) -> Result<(), ValidationError> {
        self.check_data(Some(&event.data))?;
        self.check_source(Some(&event.source))?;
        self.check_timestamp(event.timestamp)
    }

    /// Parses and validates an untrusted JSON event. A missing `id` is
    /// generated and a missing `version` defaults to 1. The compression
    /// keys of `metadata` are dropped; only the publisher sets them.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule, or `Malformed` when the payload does
    /// not have the event shape at all.
    pub fn parse(&self, raw: &serde_json::Value) -> Result<Event, ValidationError> {
        if !raw.is_object() {
            return Err(ValidationError::Malformed(
                "event must be a JSON object".to_owned(),
            ));
        }
        let incoming: IncomingEvent = serde_json::from_value(raw.clone())
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;

        let type_name = incoming.event_type.unwrap_or_default();
        let event_type: EventType = type_name
            .parse()
            .map_err(|_| ValidationError::UnknownType(type_name.clone()))?;

        self.check_data(incoming.data.as_ref())?;
        self.check_source(incoming.source.as_deref())?;

        let raw_timestamp = incoming
            .timestamp
            .ok_or_else(|| ValidationError::InvalidTimestamp("missing".to_owned()))?;
        let timestamp = DateTime::parse_from_rfc3339(&raw_timestamp)
            .map_err(|e| ValidationError::InvalidTimestamp(format!("{raw_timestamp}: {e}")))?
            .with_timezone(&Utc);
        self.check_timestamp(timestamp)?;

        let mut metadata = incoming.metadata;
        metadata.remove(METADATA_COMPRESSED);
        metadata.remove(METADATA_ORIGINAL_SIZE);

        Ok(Event {
            id: incoming.id.unwrap_or_else(Uuid::now_v7),
            event_type,
            data: incoming.data.unwrap_or(serde_json::Value::Null),
            source: incoming.source.unwrap_or_default(),
            correlation_id: incoming.correlation_id,
            timestamp,
            version: incoming.version.unwrap_or(DEFAULT_EVENT_VERSION),
            metadata,
        })
    }

    fn check_data(&self, data: Option<&serde_json::Value>) -> Result<(), ValidationError> {
        let data = match data {
            None | Some(serde_json::Value::Null) => return Err(ValidationError::MissingData),
            Some(data) => data,
        };
        if !data.is_object() {
            return Err(ValidationError::DataNotObject);
        }
        let size = serde_json::to_vec(data)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?
            .len();
        if size > self.limits.max_data_bytes {
            return Err(ValidationError::DataTooLarge {
                size,
                limit: self.limits.max_data_bytes,
            });
        }
        Ok(())
    }

    fn check_source(&self, source: Option<&str>) -> Result<(), ValidationError> {
        let source = source.unwrap_or_default();
        if source.trim().is_empty() {
            return Err(ValidationError::EmptySource);
        }
        let length = source.chars().count();
        if length > self.limits.max_source_len {
            return Err(ValidationError::SourceTooLong {
                length,
                limit: self.limits.max_source_len,
            });
        }
        Ok(())
    }

    fn check_timestamp(&self, timestamp: DateTime<Utc>) -> Result<(), ValidationError> {
        let now = self.clock.now();
        if (now - timestamp).abs() > self.limits.max_clock_skew {
            return Err(ValidationError::TimestampOutOfRange {
                timestamp,
                now,
                skew_minutes: self.limits.max_clock_skew.num_minutes(),
            });
        }
        Ok(())
    }
}
