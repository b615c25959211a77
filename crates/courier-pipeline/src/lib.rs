//! Courier: event reliability pipeline.
//!
//! Turns a locally observed domain change into an at-least-once message on
//! the shared broker: validate, persist, optionally compress, batch or
//! publish with bounded retry, and replay whatever the broker never
//! confirmed.
//!
//! Events that only ever reached the batcher's in-memory buffer are lost on
//! crash. `EventPipeline` stores every accepted event before batching, so only
//! events rejected by validation or never handed to the pipeline are outside
//! the replay guarantee.

pub mod application;
pub mod domain;
pub mod error;
pub mod retry;
