//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Error type shared by repository implementations and the event store.
#[derive(Debug, Error)]
pub enum DomainError {
    /// No stored event exists with the given id.
    #[error("event not found: {0}")]
    EventNotFound(Uuid),

    /// An event with the same id has already been stored.
    #[error("duplicate event id: {0}")]
    DuplicateEvent(Uuid),

    /// Input or a stored row broke a domain rule.
    #[error("validation error: {0}")]
    Validation(String),

    /// The backing store failed or could not be reached.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}
