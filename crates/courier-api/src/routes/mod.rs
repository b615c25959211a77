//! Admin HTTP routes.

pub mod events;
pub mod health;
