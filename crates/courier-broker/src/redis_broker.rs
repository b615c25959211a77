//! Redis pub/sub implementation of the `Broker` trait.
//!
//! Emits go through one multiplexed connection opened by `connect` and
//! dropped by `close`, or by an emit that finds the connection broken so the
//! next `connect` opens a fresh one. Each subscription opens its own pub/sub
//! connection, which ends when the returned stream is dropped.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use courier_core::broker::{Broker, BrokerError, MessageStream};

/// Redis-backed broker client.
pub struct RedisBroker {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("server", &self.client.get_connection_info().addr)
            .finish_non_exhaustive()
    }
}

impl RedisBroker {
    /// Creates a client for `redis_url` without connecting.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Connection` if the URL is invalid.
    pub fn new(redis_url: &str) -> Result<Self, BrokerError> {
        let client =
            Client::open(redis_url).map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            connection: RwLock::new(None),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, BrokerError> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or(BrokerError::NotConnected)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        let mut slot = self.connection.write().await;
        if slot.is_some() {
            return Ok(());
        }
        let connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        *slot = Some(connection);
        info!(server = %self.client.get_connection_info().addr, "connected to redis");
        Ok(())
    }

    async fn emit(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        let mut connection = self.connection().await?;
        let published: redis::RedisResult<i64> = connection.publish(channel, payload).await;
        match published {
            Ok(receivers) => {
                debug!(channel, receivers, "published to redis channel");
                Ok(())
            }
            Err(err) => {
                if is_broken_connection(&err) && self.connection.write().await.take().is_some() {
                    warn!(error = %err, "discarding broken redis connection");
                }
                Err(BrokerError::Emit {
                    channel: channel.to_owned(),
                    reason: err.to_string(),
                })
            }
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, BrokerError> {
        if self.connection.read().await.is_none() {
            return Err(BrokerError::NotConnected);
        }
        let subscribe_error = |e: redis::RedisError| BrokerError::Subscribe {
            channel: channel.to_owned(),
            reason: e.to_string(),
        };

        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(subscribe_error)?;
        pubsub.subscribe(channel).await.map_err(subscribe_error)?;
        info!(channel, "subscribed to redis channel");

        let messages = pubsub.into_on_message().filter_map(|message| async move {
            match message.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(err) => {
                    warn!(channel = message.get_channel_name(), error = %err, "dropping non-text redis message");
                    None
                }
            }
        });
        Ok(messages.boxed())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.connection.write().await.take().is_some() {
            info!("redis connection closed");
        }
        Ok(())
    }
}

fn is_broken_connection(err: &redis::RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_is_a_connection_error() {
        let result = RedisBroker::new("definitely not a url");

        assert!(matches!(result, Err(BrokerError::Connection(_))));
    }

    #[tokio::test]
    async fn test_operations_before_connect_are_rejected() {
        let broker = RedisBroker::new("redis://127.0.0.1:6379").unwrap();

        let emitted = broker.emit("domain-events", "{}").await;
        let subscribed = broker.subscribe("domain-events").await;

        assert!(matches!(emitted, Err(BrokerError::NotConnected)));
        assert!(matches!(subscribed, Err(BrokerError::NotConnected)));
    }

    #[test]
    fn test_io_failures_mark_the_connection_broken() {
        let dropped = redis::RedisError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        let bad_reply = redis::RedisError::from((redis::ErrorKind::TypeError, "unexpected reply"));

        assert!(is_broken_connection(&dropped));
        assert!(!is_broken_connection(&bad_reply));
    }

    #[tokio::test]
    async fn test_close_without_connect_is_a_no_op() {
        let broker = RedisBroker::new("redis://127.0.0.1:6379").unwrap();

        assert!(broker.close().await.is_ok());
    }
}
