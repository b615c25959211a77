//! Test handler: records every event it is asked to handle.

use std::sync::Mutex;

use async_trait::async_trait;
use courier_core::event::Event;
use courier_core::handler::{EventHandler, HandlerError};

#[derive(Debug, Default)]
struct HandlerState {
    calls: u32,
    failures_left: u32,
    handled: Vec<Event>,
}

/// An `EventHandler` that records successfully handled events and can be
/// scripted to fail its first `n` invocations.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    state: Mutex<HandlerState>,
}

impl RecordingHandler {
    /// Create a handler that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handler whose first `count` invocations fail.
    #[must_use]
    pub fn failing(count: u32) -> Self {
        Self {
            state: Mutex::new(HandlerState {
                failures_left: count,
                ..HandlerState::default()
            }),
        }
    }

    /// Returns a snapshot of successfully handled events.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn handled(&self) -> Vec<Event> {
        self.state.lock().unwrap().handled.clone()
    }

    /// Number of invocations, successful or not.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn calls(&self) -> u32 {
        self.state.lock().unwrap().calls
    }

    fn record(&self, event: &Event) -> Result<(), HandlerError> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(HandlerError::new(self.name(), "handler exploded"));
        }
        state.handled.push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_task_created(&self, event: &Event) -> Result<(), HandlerError> {
        self.record(event)
    }

    async fn on_task_updated(&self, event: &Event) -> Result<(), HandlerError> {
        self.record(event)
    }

    async fn on_task_deleted(&self, event: &Event) -> Result<(), HandlerError> {
        self.record(event)
    }

    async fn on_task_status_changed(&self, event: &Event) -> Result<(), HandlerError> {
        self.record(event)
    }

    async fn on_task_assigned(&self, event: &Event) -> Result<(), HandlerError> {
        self.record(event)
    }

    async fn on_task_completed(&self, event: &Event) -> Result<(), HandlerError> {
        self.record(event)
    }

    async fn on_service_lifecycle(&self, event: &Event) -> Result<(), HandlerError> {
        self.record(event)
    }

    async fn on_health_degraded(&self, event: &Event) -> Result<(), HandlerError> {
        self.record(event)
    }
}
