//! Broker clients for the Courier event pipeline.

pub mod redis_broker;
