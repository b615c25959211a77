//! Pipeline services that move events between domain code, the durable
//! store and the broker.

pub mod batcher;
pub mod dispatch;
pub mod event_store;
pub mod idempotency;
pub mod pipeline;
pub mod publisher;
pub mod subscriber;
