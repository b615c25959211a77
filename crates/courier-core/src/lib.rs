//! Courier Core: shared event pipeline abstractions.
//!
//! This crate defines the event envelope and the seams every other crate
//! plugs into: the persistent repository, the broker client and the
//! subscriber-side handler. It contains no infrastructure code.

pub mod broker;
pub mod clock;
pub mod error;
pub mod event;
pub mod handler;
pub mod repository;
pub mod rng;
