//! Service configuration read from the environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use courier_pipeline::application::batcher::BatchConfig;
use courier_pipeline::application::event_store::DEFAULT_RETENTION_DAYS;
use courier_pipeline::application::publisher::{DEFAULT_CHANNEL, DEFAULT_SOURCE};

use crate::error::AppError;

/// Settings for the courier service process.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Redis connection string.
    pub redis_url: String,
    /// Interface the admin API binds to.
    pub host: String,
    /// Port the admin API binds to.
    pub port: u16,
    /// Source stamped on events this service builds.
    pub service_name: String,
    /// Broker channel for domain events.
    pub event_channel: String,
    /// Batching thresholds.
    pub batch: BatchConfig,
    /// Period of the unprocessed-event replay job.
    pub replay_interval: Duration,
    /// Age in days after which processed events are deleted.
    pub retention_days: i64,
    /// Period of the retention cleanup job.
    pub cleanup_interval: Duration,
    /// OTLP/gRPC collector endpoint; span export is off when unset.
    pub otlp_endpoint: Option<String>,
}

impl AppConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a required variable is missing or a
    /// value does not parse.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of a
    /// variable if it is set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a required variable is missing or a
    /// value does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| AppError::Config(format!("{key} environment variable must be set")))
        };
        let defaults = BatchConfig::default();

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            redis_url: required("REDIS_URL")?,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: parse_or(&lookup, "PORT", 3000)?,
            service_name: lookup("SERVICE_NAME").unwrap_or_else(|| DEFAULT_SOURCE.to_owned()),
            event_channel: lookup("EVENT_CHANNEL").unwrap_or_else(|| DEFAULT_CHANNEL.to_owned()),
            batch: BatchConfig {
                batch_size: parse_or(&lookup, "BATCH_SIZE", defaults.batch_size)?,
                flush_timeout: Duration::from_millis(parse_or(&lookup, "BATCH_TIMEOUT_MS", 5_000)?),
                chunk_size: defaults.chunk_size,
            },
            replay_interval: Duration::from_secs(parse_or(&lookup, "REPLAY_INTERVAL_SECS", 60)?),
            retention_days: parse_or(&lookup, "RETENTION_DAYS", DEFAULT_RETENTION_DAYS)?,
            cleanup_interval: Duration::from_secs(parse_or(&lookup, "CLEANUP_INTERVAL_SECS", 3_600)?),
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|v| !v.trim().is_empty()),
        })
    }

    /// The socket address the admin API listens on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `host:port` is not a socket address.
    pub fn listen_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key} has invalid value {raw:?}: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://localhost/courier"),
        ("REDIS_URL", "redis://localhost:6379"),
    ];

    #[test]
    fn test_defaults_apply_when_only_required_vars_are_set() {
        let config = AppConfig::from_lookup(lookup_from(&REQUIRED)).unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.service_name, "task-service");
        assert_eq!(config.event_channel, "domain-events");
        assert_eq!(config.batch, BatchConfig::default());
        assert_eq!(config.replay_interval, Duration::from_secs(60));
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.cleanup_interval, Duration::from_secs(3600));
        assert_eq!(config.otlp_endpoint, None);
    }

    #[test]
    fn test_overrides_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("PORT", "8081"),
            ("BATCH_SIZE", "5"),
            ("BATCH_TIMEOUT_MS", "250"),
            ("EVENT_CHANNEL", "audit-events"),
        ]);

        let config = AppConfig::from_lookup(lookup_from(&pairs)).unwrap();

        assert_eq!(config.port, 8081);
        assert_eq!(config.batch.batch_size, 5);
        assert_eq!(config.batch.flush_timeout, Duration::from_millis(250));
        assert_eq!(config.event_channel, "audit-events");
        assert_eq!(config.listen_addr().unwrap().port(), 8081);
    }

    #[test]
    fn test_missing_database_url_is_a_config_error() {
        let result = AppConfig::from_lookup(lookup_from(&[("REDIS_URL", "redis://localhost")]));

        match result {
            Err(AppError::Config(message)) => assert!(message.contains("DATABASE_URL")),
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_unparseable_port_is_a_config_error() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PORT", "eighty"));

        let result = AppConfig::from_lookup(lookup_from(&pairs));

        assert!(matches!(result, Err(AppError::Config(message)) if message.contains("PORT")));
    }
}
