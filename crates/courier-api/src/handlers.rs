//! Subscriber handlers run by the service.

use async_trait::async_trait;
use courier_core::event::Event;
use courier_core::handler::{EventHandler, HandlerError};
use tracing::{info, warn};

/// Logs every received domain event.
#[derive(Debug, Default)]
pub struct AuditLogHandler;

impl AuditLogHandler {
    fn record(event: &Event, category: &'static str) {
        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            source = %event.source,
            correlation_id = event.correlation_id.as_deref().unwrap_or("-"),
            entity_id = event.data.get("entityId").and_then(|v| v.as_str()).unwrap_or("-"),
            category,
            "domain event received"
        );
    }
}

#[async_trait]
impl EventHandler for AuditLogHandler {
    fn name(&self) -> &str {
        "audit-log"
    }

    async fn on_task_created(&self, event: &Event) -> Result<(), HandlerError> {
        Self::record(event, "task");
        Ok(())
    }

    async fn on_task_updated(&self, event: &Event) -> Result<(), HandlerError> {
        Self::record(event, "task");
        Ok(())
    }

    async fn on_task_deleted(&self, event: &Event) -> Result<(), HandlerError> {
        Self::record(event, "task");
        Ok(())
    }

    async fn on_task_status_changed(&self, event: &Event) -> Result<(), HandlerError> {
        Self::record(event, "task");
        Ok(())
    }

    async fn on_task_assigned(&self, event: &Event) -> Result<(), HandlerError> {
        Self::record(event, "task");
        Ok(())
    }

    async fn on_task_completed(&self, event: &Event) -> Result<(), HandlerError> {
        Self::record(event, "task");
        Ok(())
    }

    async fn on_service_lifecycle(&self, event: &Event) -> Result<(), HandlerError> {
        Self::record(event, "service");
        Ok(())
    }

    async fn on_health_degraded(&self, event: &Event) -> Result<(), HandlerError> {
        warn!(
            event_id = %event.id,
            source = %event.source,
            details = %event.data,
            "peer service reported degraded health"
        );
        Ok(())
    }
}
