//! Shared test mocks and utilities for the Courier event pipeline.

mod broker;
mod clock;
mod handler;
mod repository;
mod rng;

pub use broker::RecordingBroker;
pub use clock::{FixedClock, ManualClock};
pub use handler::RecordingHandler;
pub use repository::{FailingEventRepository, InMemoryEventRepository};
pub use rng::{FixedRandom, SequenceRandom};
