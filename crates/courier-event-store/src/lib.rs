//! `PostgreSQL` storage for pipeline events.
//!
//! Schema changes live in the workspace `migrations/` directory and are
//! applied through [`MIGRATOR`].

pub mod pg_event_repository;

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");
