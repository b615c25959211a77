//! Broker client abstraction.
//!
//! The pipeline never talks to a message transport directly. The composition
//! root constructs one [`Broker`], calls `connect`/`close` around its
//! lifetime and hands it to the publisher and subscriber.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

/// Stream of raw payloads received on a subscribed channel.
pub type MessageStream = BoxStream<'static, String>;

/// Errors raised by broker clients.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// An operation was attempted before `connect` succeeded or after `close`.
    #[error("broker is not connected")]
    NotConnected,

    /// The connection could not be established.
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// A payload could not be emitted.
    #[error("emit to channel {channel} failed: {reason}")]
    Emit {
        /// Target channel.
        channel: String,
        /// Underlying failure.
        reason: String,
    },

    /// A subscription could not be opened.
    #[error("subscribe to channel {channel} failed: {reason}")]
    Subscribe {
        /// Target channel.
        channel: String,
        /// Underlying failure.
        reason: String,
    },
}

/// Client for the shared message transport.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Establishes the connection. Calling it again on a live connection is a no-op.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Emits one payload onto a channel.
    async fn emit(&self, channel: &str, payload: &str) -> Result<(), BrokerError>;

    /// Opens a subscription and returns the stream of payloads received on it.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, BrokerError>;

    /// Releases the connection.
    async fn close(&self) -> Result<(), BrokerError>;
}
