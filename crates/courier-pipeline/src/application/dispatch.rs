//! The seam between the batcher and whatever delivers a single event.

use async_trait::async_trait;
use courier_core::event::Event;

use crate::error::PipelineError;

/// Delivers one event. The batcher fans flushed events out through this trait.
#[async_trait]
pub trait EventDispatcher: Send + Sync {
    /// Delivers `event`, returning once delivery succeeded or was abandoned.
    async fn dispatch(&self, event: &Event) -> Result<(), PipelineError>;
}
