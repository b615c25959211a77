//! Routes for event intake, inspection, replay and retention.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use courier_core::error::DomainError;
use courier_core::event::{Event, EventType};
use courier_core::repository::{DEFAULT_QUERY_LIMIT, EventQuery, StoredEvent};
use courier_pipeline::application::batcher::BatchReport;
use courier_pipeline::application::event_store::{EventStats, ReplayReport};
use courier_pipeline::application::publisher::DomainEventInput;
use courier_pipeline::domain::validator::ValidationError;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Upper bound on `limit` for GET /.
pub const MAX_LIST_LIMIT: i64 = 1_000;

/// Query string for GET /.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEventsParams {
    /// Dotted event type name.
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    /// Correlation id to match.
    pub correlation_id: Option<String>,
    /// Inclusive lower bound on the event timestamp.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the event timestamp.
    pub to: Option<DateTime<Utc>>,
    /// `true` lists only unprocessed events, `false` only processed ones.
    pub unprocessed: Option<bool>,
    /// Maximum rows returned.
    pub limit: Option<i64>,
}

impl ListEventsParams {
    fn to_query(&self) -> Result<EventQuery, ValidationError> {
        let event_type = self.event_type.as_deref().map(parse_event_type).transpose()?;
        Ok(EventQuery {
            event_type,
            correlation_id: self.correlation_id.clone(),
            processed: self.unprocessed.map(|unprocessed| !unprocessed),
            occurred_from: self.from,
            occurred_to: self.to,
            limit: Some(
                self.limit
                    .unwrap_or(DEFAULT_QUERY_LIMIT)
                    .clamp(1, MAX_LIST_LIMIT),
            ),
            ..EventQuery::default()
        })
    }
}

/// Query string for POST /cleanup.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupParams {
    /// Age in days; defaults to the configured retention.
    pub older_than_days: Option<i64>,
}

/// Response body for POST /.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// Id of the accepted event.
    pub id: Uuid,
}

/// Response body for POST /cleanup.
#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    /// Rows removed.
    pub deleted: u64,
}

fn parse_event_type(name: &str) -> Result<EventType, ValidationError> {
    name.parse()
        .map_err(|_| ValidationError::UnknownType(name.to_owned()))
}

/// POST /
#[instrument(skip(state, raw))]
async fn ingest(
    State(state): State<AppState>,
    Json(raw): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let event = state.pipeline.ingest(&raw).await?;
    info!(event_id = %event.id, event_type = %event.event_type, "event accepted for batching");
    Ok((StatusCode::ACCEPTED, Json(IngestResponse { id: event.id })))
}

/// POST /domain
#[instrument(skip(state, input), fields(event_type = %input.event_type, entity_id = %input.entity_id))]
async fn publish_domain_event(
    State(state): State<AppState>,
    Json(input): Json<DomainEventInput>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let event = state.pipeline.publish_domain_event(input).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// GET /
#[instrument(skip(state))]
async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<ListEventsParams>,
) -> Result<Json<Vec<StoredEvent>>, ApiError> {
    let query = params.to_query()?;
    let events = state.pipeline.store().find(&query).await?;
    Ok(Json(events))
}

/// GET /stats
#[instrument(skip(state))]
async fn stats(State(state): State<AppState>) -> Result<Json<EventStats>, ApiError> {
    Ok(Json(state.pipeline.store().stats().await?))
}

/// POST /replay
#[instrument(skip(state))]
async fn replay_unprocessed(State(state): State<AppState>) -> Result<Json<ReplayReport>, ApiError> {
    Ok(Json(state.pipeline.store().replay_unprocessed_events().await?))
}

/// POST /replay/type/{event_type}
#[instrument(skip(state))]
async fn replay_by_type(
    State(state): State<AppState>,
    Path(event_type): Path<String>,
) -> Result<Json<ReplayReport>, ApiError> {
    let event_type = parse_event_type(&event_type)?;
    Ok(Json(
        state.pipeline.store().replay_events_by_type(event_type).await?,
    ))
}

/// POST /replay/correlation/{correlation_id}
#[instrument(skip(state))]
async fn replay_by_correlation_id(
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
) -> Result<Json<ReplayReport>, ApiError> {
    Ok(Json(
        state
            .pipeline
            .store()
            .replay_events_by_correlation_id(&correlation_id)
            .await?,
    ))
}

/// POST /cleanup
#[instrument(skip(state))]
async fn cleanup(
    State(state): State<AppState>,
    Query(params): Query<CleanupParams>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let days = params.older_than_days.unwrap_or(state.retention_days);
    if days < 0 {
        return Err(DomainError::Validation(format!("olderThanDays must not be negative, got {days}")).into());
    }
    let deleted = state.pipeline.store().cleanup_old_events(days).await?;
    Ok(Json(CleanupResponse { deleted }))
}

/// POST /flush
#[instrument(skip(state))]
async fn flush(State(state): State<AppState>) -> Json<BatchReport> {
    Json(state.pipeline.flush_batch().await)
}

/// Returns the router for event administration.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(ingest).get(list_events))
        .route("/domain", post(publish_domain_event))
        .route("/stats", get(stats))
        .route("/replay", post(replay_unprocessed))
        .route("/replay/type/{event_type}", post(replay_by_type))
        .route("/replay/correlation/{correlation_id}", post(replay_by_correlation_id))
        .route("/cleanup", post(cleanup))
        .route("/flush", post(flush))
}
