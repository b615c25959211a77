//! Integration tests for `PgEventRepository`.
//!
//! These need a PostgreSQL server reachable through `DATABASE_URL`; run them
//! with `cargo test -p courier-event-store -- --ignored`.

use chrono::{Duration, DurationRound, Utc};
use courier_core::error::DomainError;
use courier_core::event::{Event, EventMetadata, EventType};
use courier_core::repository::{CounterField, EventQuery, EventRepository, EventUpdate, StoredEvent};
use courier_event_store::pg_event_repository::PgEventRepository;
use sqlx::PgPool;
use uuid::Uuid;

/// Helper to build an unprocessed `StoredEvent` created `age` ago.
/// Timestamps are truncated to microseconds, the `TIMESTAMPTZ` precision.
fn make_stored_event(event_type: EventType, correlation_id: Option<&str>, age: Duration) -> StoredEvent {
    let now = Utc::now()
        .duration_trunc(Duration::microseconds(1))
        .unwrap();
    let mut metadata = EventMetadata::new();
    metadata.insert("traceparent".into(), serde_json::json!("00-abc-def-01"));
    let event = Event {
        id: Uuid::now_v7(),
        event_type,
        data: serde_json::json!({"entityId": "t1", "currentState": {"title": "Write docs"}}),
        source: "task-service".to_string(),
        correlation_id: correlation_id.map(str::to_owned),
        timestamp: now - age,
        version: 1,
        metadata,
    };
    StoredEvent::unprocessed(event, now - age)
}

// --- save + find round-trip ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn test_save_and_find_round_trip(pool: PgPool) {
    let repo = PgEventRepository::new(pool);
    let stored = make_stored_event(EventType::TaskCreated, Some("req-1"), Duration::zero());

    repo.save(&stored).await.unwrap();

    let loaded = repo.find(&EventQuery::all()).await.unwrap();
    assert_eq!(loaded, vec![stored]);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn test_duplicate_id_is_rejected(pool: PgPool) {
    let repo = PgEventRepository::new(pool);
    let stored = make_stored_event(EventType::TaskCreated, None, Duration::zero());
    repo.save(&stored).await.unwrap();

    let result = repo.save(&stored).await;

    match result {
        Err(DomainError::DuplicateEvent(id)) => assert_eq!(id, stored.id()),
        other => panic!("expected DuplicateEvent, got {other:?}"),
    }
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn test_long_correlation_id_is_stored_intact(pool: PgPool) {
    let repo = PgEventRepository::new(pool);
    let correlation_id = format!("trace-{}", "a".repeat(1_000));
    let stored = make_stored_event(EventType::TaskUpdated, Some(&correlation_id), Duration::zero());

    repo.save(&stored).await.unwrap();

    let loaded = repo.find(&EventQuery::correlated(&correlation_id)).await.unwrap();
    assert_eq!(loaded, vec![stored]);
}

// --- filtering and ordering ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn test_find_orders_oldest_first_and_applies_limit(pool: PgPool) {
    let repo = PgEventRepository::new(pool);
    let newest = make_stored_event(EventType::TaskCreated, None, Duration::minutes(1));
    let oldest = make_stored_event(EventType::TaskCreated, None, Duration::minutes(3));
    let middle = make_stored_event(EventType::TaskCreated, None, Duration::minutes(2));
    for stored in [&newest, &oldest, &middle] {
        repo.save(stored).await.unwrap();
    }

    let page = repo.find(&EventQuery::unprocessed().limit(2)).await.unwrap();

    let ids: Vec<Uuid> = page.iter().map(StoredEvent::id).collect();
    assert_eq!(ids, vec![oldest.id(), middle.id()]);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn test_find_filters_by_type_and_correlation_id(pool: PgPool) {
    let repo = PgEventRepository::new(pool);
    let assigned = make_stored_event(EventType::TaskAssigned, Some("req-7"), Duration::zero());
    let created = make_stored_event(EventType::TaskCreated, Some("req-8"), Duration::zero());
    repo.save(&assigned).await.unwrap();
    repo.save(&created).await.unwrap();

    let by_type = repo
        .find(&EventQuery::of_type(EventType::TaskAssigned))
        .await
        .unwrap();
    let by_correlation = repo.find(&EventQuery::correlated("req-8")).await.unwrap();

    assert_eq!(by_type.len(), 1);
    assert_eq!(by_type[0].id(), assigned.id());
    assert_eq!(by_correlation.len(), 1);
    assert_eq!(by_correlation[0].id(), created.id());
}

// --- updates ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn test_update_and_increment(pool: PgPool) {
    let repo = PgEventRepository::new(pool);
    let stored = make_stored_event(EventType::TaskUpdated, None, Duration::zero());
    repo.save(&stored).await.unwrap();
    let at = stored.created_at + Duration::seconds(5);

    repo.increment(stored.id(), CounterField::RetryCount, 1)
        .await
        .unwrap();
    repo.update_by_id(stored.id(), &EventUpdate::mark_processed(at, Some("late ack".into())))
        .await
        .unwrap();

    let loaded = repo.find(&EventQuery::all()).await.unwrap();
    assert_eq!(loaded[0].retry_count, 1);
    assert!(loaded[0].processed);
    assert_eq!(loaded[0].processed_at, Some(at));
    assert_eq!(loaded[0].error.as_deref(), Some("late ack"));
    assert_eq!(repo.count(&EventQuery::unprocessed()).await.unwrap(), 0);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn test_update_of_missing_row_is_not_found(pool: PgPool) {
    let repo = PgEventRepository::new(pool);
    let id = Uuid::new_v4();

    let update = repo
        .update_by_id(id, &EventUpdate::mark_processed(Utc::now(), None))
        .await;
    let increment = repo.increment(id, CounterField::RetryCount, 1).await;

    assert!(matches!(update, Err(DomainError::EventNotFound(missing)) if missing == id));
    assert!(matches!(increment, Err(DomainError::EventNotFound(missing)) if missing == id));
}

// --- retention ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn test_delete_by_filter_only_removes_old_processed_rows(pool: PgPool) {
    let repo = PgEventRepository::new(pool);
    let old_processed = make_stored_event(EventType::TaskCompleted, None, Duration::days(40));
    let old_unprocessed = make_stored_event(EventType::TaskCreated, None, Duration::days(40));
    let recent_processed = make_stored_event(EventType::TaskCompleted, None, Duration::days(1));
    for stored in [&old_processed, &old_unprocessed, &recent_processed] {
        repo.save(stored).await.unwrap();
    }
    for id in [old_processed.id(), recent_processed.id()] {
        repo.update_by_id(id, &EventUpdate::mark_processed(Utc::now(), None))
            .await
            .unwrap();
    }

    let deleted = repo
        .delete_by_filter(&EventQuery::processed_before(Utc::now() - Duration::days(30)))
        .await
        .unwrap();

    assert_eq!(deleted, 1);
    let remaining: Vec<Uuid> = repo
        .find(&EventQuery::all())
        .await
        .unwrap()
        .iter()
        .map(StoredEvent::id)
        .collect();
    assert_eq!(remaining, vec![old_unprocessed.id(), recent_processed.id()]);
}
