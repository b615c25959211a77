//! Courier service entry point.

use std::sync::Arc;

use courier_broker::redis_broker::RedisBroker;
use courier_core::broker::Broker;
use courier_core::clock::{Clock, SystemClock};
use courier_core::repository::EventRepository;
use courier_event_store::MIGRATOR;
use courier_event_store::pg_event_repository::PgEventRepository;
use courier_pipeline::application::pipeline::EventPipeline;
use courier_pipeline::application::publisher::{EventPublisher, PublisherConfig};
use courier_pipeline::application::subscriber::{EventSubscriber, SubscriberConfig};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

use courier_api::config::AppConfig;
use courier_api::error::AppError;
use courier_api::handlers::AuditLogHandler;
use courier_api::scheduler::{Scheduler, SchedulerConfig};
use courier_api::state::AppState;
use courier_api::telemetry::Telemetry;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = AppConfig::from_env()?;
    let telemetry = Telemetry::init(&config.service_name, config.otlp_endpoint.as_deref())?;

    info!(service = %config.service_name, channel = %config.event_channel, "starting courier service");

    // Database pool and schema.
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    MIGRATOR.run(&pool).await?;

    // Pipeline.
    let broker = Arc::new(RedisBroker::new(&config.redis_url)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let publisher = Arc::new(EventPublisher::new(
        Arc::clone(&broker) as Arc<dyn Broker>,
        Arc::clone(&clock),
        PublisherConfig {
            channel: config.event_channel.clone(),
            source: config.service_name.clone(),
            ..PublisherConfig::default()
        },
    ));
    let repository: Arc<dyn EventRepository> = Arc::new(PgEventRepository::new(pool.clone()));
    let pipeline = Arc::new(EventPipeline::new(
        publisher,
        repository,
        clock,
        config.batch.clone(),
    ));

    // Subscriber; connecting the broker happens here, with the connect retry profile.
    let subscriber = Arc::new(EventSubscriber::new(
        Arc::clone(&broker) as Arc<dyn Broker>,
        Arc::new(AuditLogHandler),
        SubscriberConfig {
            channel: config.event_channel.clone(),
            ..SubscriberConfig::default()
        },
    ));
    let subscription = subscriber.start().await?;

    let scheduler = Scheduler::start(
        Arc::clone(&pipeline),
        SchedulerConfig {
            replay_interval: config.replay_interval,
            cleanup_interval: config.cleanup_interval,
            retention_days: config.retention_days,
        },
    );

    // Admin API.
    let app = courier_api::app(AppState::new(Arc::clone(&pipeline), config.retention_days));
    let addr = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    scheduler.shutdown().await;
    pipeline.flush_batch().await;
    subscription.shutdown().await;
    if let Err(err) = broker.close().await {
        warn!(error = %err, "broker close failed");
    }
    pool.close().await;
    telemetry.shutdown();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "cannot listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
}
