//! The event envelope and the closed set of event types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::clock::Clock;

/// Metadata key set to `true` when `data` holds a compressed payload.
pub const METADATA_COMPRESSED: &str = "compressed";

/// Metadata key carrying the uncompressed payload size in bytes.
pub const METADATA_ORIGINAL_SIZE: &str = "originalSize";

/// Schema version stamped on events that do not specify one.
pub const DEFAULT_EVENT_VERSION: i32 = 1;

/// Open key-value bag attached to every event.
pub type EventMetadata = serde_json::Map<String, serde_json::Value>;

/// Every event type the pipeline accepts.
///
/// Adding a variant is a breaking change for [`crate::handler::dispatch`],
/// which matches exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    /// A task was created.
    #[serde(rename = "task.created")]
    TaskCreated,
    /// A task's fields were updated.
    #[serde(rename = "task.updated")]
    TaskUpdated,
    /// A task was deleted.
    #[serde(rename = "task.deleted")]
    TaskDeleted,
    /// A task moved to a different status.
    #[serde(rename = "task.status_changed")]
    TaskStatusChanged,
    /// A task was assigned to a user.
    #[serde(rename = "task.assigned")]
    TaskAssigned,
    /// A task was completed.
    #[serde(rename = "task.completed")]
    TaskCompleted,
    /// A service instance came up.
    #[serde(rename = "service.started")]
    ServiceStarted,
    /// A service instance shut down.
    #[serde(rename = "service.stopped")]
    ServiceStopped,
    /// A service reported degraded health.
    #[serde(rename = "service.health_degraded")]
    ServiceHealthDegraded,
}

impl EventType {
    /// All variants, in declaration order.
    pub const ALL: [EventType; 9] = [
        EventType::TaskCreated,
        EventType::TaskUpdated,
        EventType::TaskDeleted,
        EventType::TaskStatusChanged,
        EventType::TaskAssigned,
        EventType::TaskCompleted,
        EventType::ServiceStarted,
        EventType::ServiceStopped,
        EventType::ServiceHealthDegraded,
    ];

    /// The wire name of this type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::TaskCreated => "task.created",
            EventType::TaskUpdated => "task.updated",
            EventType::TaskDeleted => "task.deleted",
            EventType::TaskStatusChanged => "task.status_changed",
            EventType::TaskAssigned => "task.assigned",
            EventType::TaskCompleted => "task.completed",
            EventType::ServiceStarted => "service.started",
            EventType::ServiceStopped => "service.stopped",
            EventType::ServiceHealthDegraded => "service.health_degraded",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not the wire name of any [`EventType`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|event_type| event_type.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_owned()))
    }
}

fn default_version() -> i32 {
    DEFAULT_EVENT_VERSION
}

/// A domain event as it travels through the pipeline and over the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Globally unique identifier, assigned at creation.
    pub id: Uuid,
    /// The event type.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Structured payload, or a base64 string when `metadata.compressed` is set.
    pub data: serde_json::Value,
    /// Origin identifier, usually the emitting service name.
    pub source: String,
    /// Links events produced by one causal chain.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Schema version tag.
    #[serde(default = "default_version")]
    pub version: i32,
    /// Open metadata bag.
    #[serde(default)]
    pub metadata: EventMetadata,
}

impl Event {
    /// Creates a new event stamped with a fresh id and the clock's current time.
    #[must_use]
    pub fn new(
        event_type: EventType,
        data: serde_json::Value,
        source: impl Into<String>,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type,
            data,
            source: source.into(),
            correlation_id: None,
            timestamp: clock.now(),
            version: DEFAULT_EVENT_VERSION,
            metadata: EventMetadata::new(),
        }
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Replaces the metadata bag.
    #[must_use]
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether `data` currently holds a compressed payload.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.metadata
            .get(METADATA_COMPRESSED)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// The uncompressed payload size recorded at compression time.
    #[must_use]
    pub fn original_size(&self) -> Option<u64> {
        self.metadata
            .get(METADATA_ORIGINAL_SIZE)
            .and_then(serde_json::Value::as_u64)
    }
}

/// Standard payload shape for entity state changes published by domain code.
///
/// Every key is always present; absent optional values serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEventPayload {
    /// The entity whose state changed.
    pub entity_id: String,
    /// State before the change, when known.
    #[serde(default)]
    pub previous_state: Option<serde_json::Value>,
    /// State after the change.
    pub current_state: serde_json::Value,
    /// The user or system that made the change.
    #[serde(default)]
    pub actor_id: Option<String>,
    /// Free-form context supplied by the caller.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}
