//! Test repositories: `EventRepository` implementations for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use courier_core::error::DomainError;
use courier_core::repository::{CounterField, EventQuery, EventRepository, EventUpdate, StoredEvent};
use uuid::Uuid;

/// An in-memory event repository with the same filter, ordering and
/// uniqueness semantics as the PostgreSQL implementation.
#[derive(Debug, Default)]
pub struct InMemoryEventRepository {
    rows: Mutex<Vec<StoredEvent>>,
}

impl InMemoryEventRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository pre-populated with `rows`, bypassing uniqueness
    /// checks.
    #[must_use]
    pub fn with_rows(rows: Vec<StoredEvent>) -> Self {
        Self {
            rows: Mutex::new(rows),
        }
    }

    /// Returns a snapshot of every stored row in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn rows(&self) -> Vec<StoredEvent> {
        self.rows.lock().unwrap().clone()
    }

    /// Returns the row with `id`, if present.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn get(&self, id: Uuid) -> Option<StoredEvent> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.id() == id)
            .cloned()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn save(&self, stored: &StoredEvent) -> Result<(), DomainError> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|row| row.id() == stored.id()) {
            return Err(DomainError::DuplicateEvent(stored.id()));
        }
        rows.push(stored.clone());
        Ok(())
    }

    async fn find(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, DomainError> {
        let mut matched: Vec<StoredEvent> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| query.matches(row))
            .cloned()
            .collect();
        matched.sort_by_key(|row| row.created_at);
        if let Some(limit) = query.limit {
            matched.truncate(usize::try_from(limit).unwrap_or(0));
        }
        Ok(matched)
    }

    async fn count(&self, query: &EventQuery) -> Result<u64, DomainError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().filter(|row| query.matches(row)).count() as u64)
    }

    async fn update_by_id(&self, id: Uuid, update: &EventUpdate) -> Result<(), DomainError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|row| row.id() == id)
            .ok_or(DomainError::EventNotFound(id))?;
        update.apply_to(row);
        Ok(())
    }

    async fn delete_by_filter(&self, query: &EventQuery) -> Result<u64, DomainError> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|row| !query.matches(row));
        Ok((before - rows.len()) as u64)
    }

    async fn increment(&self, id: Uuid, field: CounterField, by: i32) -> Result<(), DomainError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|row| row.id() == id)
            .ok_or(DomainError::EventNotFound(id))?;
        match field {
            CounterField::RetryCount => row.retry_count += by,
        }
        Ok(())
    }
}

/// An event repository that always returns an infrastructure error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventRepository;

fn refused() -> DomainError {
    DomainError::Infrastructure("connection refused".into())
}

#[async_trait]
impl EventRepository for FailingEventRepository {
    async fn save(&self, _stored: &StoredEvent) -> Result<(), DomainError> {
        Err(refused())
    }

    async fn find(&self, _query: &EventQuery) -> Result<Vec<StoredEvent>, DomainError> {
        Err(refused())
    }

    async fn count(&self, _query: &EventQuery) -> Result<u64, DomainError> {
        Err(refused())
    }

    async fn update_by_id(&self, _id: Uuid, _update: &EventUpdate) -> Result<(), DomainError> {
        Err(refused())
    }

    async fn delete_by_filter(&self, _query: &EventQuery) -> Result<u64, DomainError> {
        Err(refused())
    }

    async fn increment(&self, _id: Uuid, _field: CounterField, _by: i32) -> Result<(), DomainError> {
        Err(refused())
    }
}
