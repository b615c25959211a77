//! `PostgreSQL` implementation of the `EventRepository` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use courier_core::error::DomainError;
use courier_core::event::{Event, EventMetadata};
use courier_core::repository::{CounterField, EventQuery, EventRepository, EventUpdate, StoredEvent};

const SELECT_COLUMNS: &str = "SELECT id, event_type, data, source, correlation_id, occurred_at, \
     version, metadata, processed, processed_at, error, retry_count, created_at \
     FROM pipeline_events";

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    event_type: String,
    data: serde_json::Value,
    source: String,
    correlation_id: Option<String>,
    occurred_at: DateTime<Utc>,
    version: i32,
    metadata: serde_json::Value,
    processed: bool,
    processed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    retry_count: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for StoredEvent {
    type Error = DomainError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let event_type = row
            .event_type
            .parse()
            .map_err(|e| DomainError::Validation(format!("stored event {}: {e}", row.id)))?;
        let metadata = match row.metadata {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => EventMetadata::new(),
            other => {
                return Err(DomainError::Validation(format!(
                    "stored event {} has non-object metadata: {other}",
                    row.id
                )));
            }
        };

        Ok(StoredEvent {
            event: Event {
                id: row.id,
                event_type,
                data: row.data,
                source: row.source,
                correlation_id: row.correlation_id,
                timestamp: row.occurred_at,
                version: row.version,
                metadata,
            },
            processed: row.processed,
            processed_at: row.processed_at,
            error: row.error,
            retry_count: row.retry_count,
            created_at: row.created_at,
        })
    }
}

fn infrastructure(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(err.to_string())
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &EventQuery) {
    builder.push(" WHERE TRUE");
    if let Some(event_type) = query.event_type {
        builder.push(" AND event_type = ").push_bind(event_type.as_str());
    }
    if let Some(correlation_id) = &query.correlation_id {
        builder
            .push(" AND correlation_id = ")
            .push_bind(correlation_id.clone());
    }
    if let Some(processed) = query.processed {
        builder.push(" AND processed = ").push_bind(processed);
    }
    if let Some(from) = query.occurred_from {
        builder.push(" AND occurred_at >= ").push_bind(from);
    }
    if let Some(to) = query.occurred_to {
        builder.push(" AND occurred_at <= ").push_bind(to);
    }
    if let Some(cutoff) = query.created_before {
        builder.push(" AND created_at < ").push_bind(cutoff);
    }
}

/// PostgreSQL-backed event repository.
#[derive(Debug, Clone)]
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    /// Creates a new `PgEventRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn save(&self, stored: &StoredEvent) -> Result<(), DomainError> {
        let event = &stored.event;
        let result = sqlx::query(
            "INSERT INTO pipeline_events \
             (id, event_type, data, source, correlation_id, occurred_at, version, metadata, \
              processed, processed_at, error, retry_count, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(event.id)
        .bind(event.event_type.as_str())
        .bind(&event.data)
        .bind(&event.source)
        .bind(&event.correlation_id)
        .bind(event.timestamp)
        .bind(event.version)
        .bind(serde_json::Value::Object(event.metadata.clone()))
        .bind(stored.processed)
        .bind(stored.processed_at)
        .bind(&stored.error)
        .bind(stored.retry_count)
        .bind(stored.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(event_id = %event.id, "event row inserted");
                Ok(())
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(DomainError::DuplicateEvent(event.id))
            }
            Err(err) => Err(infrastructure(err)),
        }
    }

    async fn find(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, DomainError> {
        let mut builder = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        push_filters(&mut builder, query);
        builder.push(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(limit.max(0));
        }

        let rows: Vec<EventRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(infrastructure)?;

        rows.into_iter().map(StoredEvent::try_from).collect()
    }

    async fn count(&self, query: &EventQuery) -> Result<u64, DomainError> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM pipeline_events");
        push_filters(&mut builder, query);

        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(infrastructure)?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn update_by_id(&self, id: Uuid, update: &EventUpdate) -> Result<(), DomainError> {
        let result = sqlx::query(
            "UPDATE pipeline_events SET \
             processed = COALESCE($2, processed), \
             processed_at = COALESCE($3, processed_at), \
             error = COALESCE($4, error) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.processed)
        .bind(update.processed_at)
        .bind(&update.error)
        .execute(&self.pool)
        .await
        .map_err(infrastructure)?;

        if result.rows_affected() == 0 {
            return Err(DomainError::EventNotFound(id));
        }
        Ok(())
    }

    async fn delete_by_filter(&self, query: &EventQuery) -> Result<u64, DomainError> {
        let mut builder = QueryBuilder::<Postgres>::new("DELETE FROM pipeline_events");
        push_filters(&mut builder, query);

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(infrastructure)?;

        Ok(result.rows_affected())
    }

    async fn increment(&self, id: Uuid, field: CounterField, by: i32) -> Result<(), DomainError> {
        let column = field.column();
        let sql = format!("UPDATE pipeline_events SET {column} = {column} + $2 WHERE id = $1");

        let result = sqlx::query(&sql)
            .bind(id)
            .bind(by)
            .execute(&self.pool)
            .await
            .map_err(infrastructure)?;

        if result.rows_affected() == 0 {
            return Err(DomainError::EventNotFound(id));
        }
        Ok(())
    }
}
