//! Subscriber-side event handling.
//!
//! Handlers implement one method per event category and [`dispatch`] routes
//! by matching exhaustively on [`EventType`], so introducing a new type fails
//! to compile until every dispatch arm is written.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::{Event, EventType};

/// A handler failed to process an event.
#[derive(Debug, Clone, Error)]
#[error("handler {handler} failed: {reason}")]
pub struct HandlerError {
    /// Name of the failing handler.
    pub handler: String,
    /// Failure description.
    pub reason: String,
}

impl HandlerError {
    /// Creates a new handler error.
    pub fn new(handler: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            reason: reason.into(),
        }
    }
}

/// Consumer of events received from the broker.
///
/// Handlers may see the same event id more than once (replay is
/// at-least-once); the subscriber filters ids it has already handled.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name used in logs and errors.
    fn name(&self) -> &str;

    /// Handles `task.created`.
    async fn on_task_created(&self, event: &Event) -> Result<(), HandlerError>;

    /// Handles `task.updated`.
    async fn on_task_updated(&self, event: &Event) -> Result<(), HandlerError>;

    /// Handles `task.deleted`.
    async fn on_task_deleted(&self, event: &Event) -> Result<(), HandlerError>;

    /// Handles `task.status_changed`.
    async fn on_task_status_changed(&self, event: &Event) -> Result<(), HandlerError>;

    /// Handles `task.assigned`.
    async fn on_task_assigned(&self, event: &Event) -> Result<(), HandlerError>;

    /// Handles `task.completed`.
    async fn on_task_completed(&self, event: &Event) -> Result<(), HandlerError>;

    /// Handles `service.started` and `service.stopped`.
    async fn on_service_lifecycle(&self, event: &Event) -> Result<(), HandlerError>;

    /// Handles `service.health_degraded`.
    async fn on_health_degraded(&self, event: &Event) -> Result<(), HandlerError>;
}

/// Routes an event to the handler method for its type.
///
/// # Errors
///
/// Returns whatever the selected handler method returns.
pub async fn dispatch(handler: &dyn EventHandler, event: &Event) -> Result<(), HandlerError> {
    match event.event_type {
        EventType::TaskCreated => handler.on_task_created(event).await,
        EventType::TaskUpdated => handler.on_task_updated(event).await,
        EventType::TaskDeleted => handler.on_task_deleted(event).await,
        EventType::TaskStatusChanged => handler.on_task_status_changed(event).await,
        EventType::TaskAssigned => handler.on_task_assigned(event).await,
        EventType::TaskCompleted => handler.on_task_completed(event).await,
        EventType::ServiceStarted | EventType::ServiceStopped => {
            handler.on_service_lifecycle(event).await
        }
        EventType::ServiceHealthDegraded => handler.on_health_degraded(event).await,
    }
}
