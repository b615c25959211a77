//! Conditional gzip compression of event payloads.
//!
//! Payloads above the threshold travel as a base64 string of a gzip stream
//! with `metadata.compressed = true` and `metadata.originalSize` set.
//! Compression is an optimization only; [`PayloadCompressor::compress_or_original`]
//! falls back to the uncompressed event on failure.

use std::io::{Read, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use courier_core::event::{Event, EventMetadata, METADATA_COMPRESSED, METADATA_ORIGINAL_SIZE};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;
use tracing::{debug, error};

use crate::domain::validator::MAX_DATA_BYTES;

/// Payloads up to this many serialized bytes are sent as-is (10 KiB).
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 10 * 1024;

/// Errors raised while compressing or restoring a payload.
#[derive(Debug, Error)]
pub enum CompressionError {
    /// The payload could not be serialized or parsed back.
    #[error("payload serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The gzip stream could not be written or read.
    #[error("gzip stream failed: {0}")]
    Gzip(#[from] std::io::Error),

    /// The compressed payload was not valid base64.
    #[error("compressed payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// An event flagged as compressed did not carry a string payload.
    #[error("compressed payload must be a base64 string")]
    NotEncoded,

    /// The payload inflated past the configured limit.
    #[error("decompressed payload exceeds {limit} bytes")]
    TooLarge {
        /// Configured limit.
        limit: usize,
    },
}

/// Compression settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionConfig {
    /// Serialized size above which payloads are compressed.
    pub threshold_bytes: usize,
    /// gzip level, 0-9.
    pub level: u32,
    /// Largest payload `decompress` will inflate.
    pub max_decompressed_bytes: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD,
            level: 6,
            max_decompressed_bytes: MAX_DATA_BYTES,
        }
    }
}

/// Compresses oversized payloads and restores them on the receiving side.
#[derive(Debug, Clone, Default)]
pub struct PayloadCompressor {
    config: CompressionConfig,
}

impl PayloadCompressor {
    /// Creates a compressor with the given settings.
    #[must_use]
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Returns the event unchanged when its payload is at or below the
    /// threshold or already compressed, otherwise a copy with `data`
    /// compressed.
    ///
    /// # Errors
    ///
    /// Returns `CompressionError` if serialization or encoding fails.
    pub fn compress(&self, event: &Event) -> Result<Event, CompressionError> {
        if event.is_compressed() {
            return Ok(event.clone());
        }
        let serialized = serde_json::to_vec(&event.data)?;
        if serialized.len() <= self.config.threshold_bytes {
            return Ok(event.clone());
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.config.level));
        encoder.write_all(&serialized)?;
        let compressed = encoder.finish()?;

        debug!(
            event_id = %event.id,
            original_size = serialized.len(),
            compressed_size = compressed.len(),
            "compressed event payload"
        );

        let mut metadata = event.metadata.clone();
        metadata.insert(METADATA_COMPRESSED.to_owned(), true.into());
        metadata.insert(METADATA_ORIGINAL_SIZE.to_owned(), serialized.len().into());

        Ok(with_payload(
            event,
            serde_json::Value::String(STANDARD.encode(compressed)),
            metadata,
        ))
    }

    /// Restores a compressed payload and clears the compression metadata.
    /// Events without the `compressed` flag are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `CompressionError` if the payload cannot be decoded or
    /// inflates past `max_decompressed_bytes`.
    pub fn decompress(&self, event: &Event) -> Result<Event, CompressionError> {
        if !event.is_compressed() {
            return Ok(event.clone());
        }
        let encoded = event.data.as_str().ok_or(CompressionError::NotEncoded)?;
        let compressed = STANDARD.decode(encoded)?;

        let limit = self.config.max_decompressed_bytes;
        let capacity = event
            .original_size()
            .and_then(|size| usize::try_from(size).ok())
            .unwrap_or_default()
            .min(limit);
        let mut serialized = Vec::with_capacity(capacity);
        GzDecoder::new(compressed.as_slice())
            .take(u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1))
            .read_to_end(&mut serialized)?;
        if serialized.len() > limit {
            return Err(CompressionError::TooLarge { limit });
        }
        let data: serde_json::Value = serde_json::from_slice(&serialized)?;

        let mut metadata = event.metadata.clone();
        metadata.remove(METADATA_COMPRESSED);
        metadata.remove(METADATA_ORIGINAL_SIZE);

        Ok(with_payload(event, data, metadata))
    }

    /// Compresses when worthwhile, logging and returning the original event
    /// if compression fails.
    #[must_use]
    pub fn compress_or_original(&self, event: &Event) -> Event {
        match self.compress(event) {
            Ok(compressed) => compressed,
            Err(err) => {
                error!(event_id = %event.id, error = %err, "payload compression failed, sending uncompressed");
                event.clone()
            }
        }
    }
}

fn with_payload(event: &Event, data: serde_json::Value, metadata: EventMetadata) -> Event {
    Event {
        id: event.id,
        event_type: event.event_type,
        data,
        source: event.source.clone(),
        correlation_id: event.correlation_id.clone(),
        timestamp: event.timestamp,
        version: event.version,
        metadata,
    }
}
