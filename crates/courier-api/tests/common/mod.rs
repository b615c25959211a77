//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, TimeZone, Utc};
use courier_core::broker::Broker;
use courier_core::clock::Clock;
use courier_core::repository::EventRepository;
use courier_pipeline::application::batcher::BatchConfig;
use courier_pipeline::application::pipeline::EventPipeline;
use courier_pipeline::application::publisher::{EventPublisher, PublisherConfig};
use courier_pipeline::retry::RetryExecutor;
use courier_test_support::{FixedClock, FixedRandom, InMemoryEventRepository, RecordingBroker};
use http_body_util::BodyExt;
use tower::ServiceExt;

use courier_api::state::AppState;

/// Fixed timestamp used across all integration tests.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
}

/// In-memory collaborators behind a test app.
pub struct TestApp {
    pub repository: Arc<InMemoryEventRepository>,
    pub broker: Arc<RecordingBroker>,
    pub pipeline: Arc<EventPipeline>,
}

impl TestApp {
    /// A fresh router over the shared collaborators. Uses the same route
    /// structure as `main.rs`.
    pub fn router(&self) -> Router {
        courier_api::app(AppState::new(Arc::clone(&self.pipeline), 30))
    }
}

/// Build the app over an empty in-memory repository, a recording broker and
/// a fixed clock.
pub fn build_test_app() -> TestApp {
    build_test_app_with(InMemoryEventRepository::new(), RecordingBroker::new())
}

/// Build the app over the given repository and broker.
pub fn build_test_app_with(repository: InMemoryEventRepository, broker: RecordingBroker) -> TestApp {
    let repository = Arc::new(repository);
    let broker = Arc::new(broker);
    let clock: Arc<dyn Clock> = Arc::new(FixedClock(now()));
    let publisher = Arc::new(
        EventPublisher::new(
            Arc::clone(&broker) as Arc<dyn Broker>,
            Arc::clone(&clock),
            PublisherConfig::default(),
        )
        .with_retry_executor(RetryExecutor::new(FixedRandom(0.0))),
    );
    let pipeline = Arc::new(EventPipeline::new(
        publisher,
        Arc::clone(&repository) as Arc<dyn EventRepository>,
        clock,
        BatchConfig::default(),
    ));
    TestApp {
        repository,
        broker,
        pipeline,
    }
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    send(app, request).await
}

/// Send a POST request without a body and return the response.
pub async fn post_empty(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}
