//! Pipeline error type.

use courier_core::broker::BrokerError;
use courier_core::error::DomainError;
use thiserror::Error;

use crate::domain::validator::ValidationError;

/// Errors surfaced by pipeline operations.
///
/// Compression failures never reach this type: the publisher falls back to
/// the uncompressed event and the subscriber drops undecodable payloads.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The event was rejected before it entered the pipeline.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The broker rejected or could not be reached.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The durable store failed.
    #[error(transparent)]
    Store(#[from] DomainError),

    /// An event could not be serialized for the wire.
    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
