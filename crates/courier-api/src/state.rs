//! Shared application state.

use std::sync::Arc;

use courier_pipeline::application::pipeline::EventPipeline;

/// Application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The event pipeline the admin API drives.
    pub pipeline: Arc<EventPipeline>,
    /// Default age for `POST /api/v1/events/cleanup` without a query.
    pub retention_days: i64,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(pipeline: Arc<EventPipeline>, retention_days: i64) -> Self {
        Self {
            pipeline,
            retention_days,
        }
    }
}
