use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aerobook_api::{app, worker, AppState, AuthConfig};
use aerobook_booking::{CircuitBreakerGateway, ExpirySweep, MockPaymentGateway};
use aerobook_core::events::EventPublisher;
use aerobook_core::payment::PaymentGateway;
use aerobook_core::repository::Store;
use aerobook_store::app_config::Config;
use aerobook_store::{BroadcastPublisher, DbClient, PgStore};
use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "aerobook_api=debug,aerobook_booking=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Aerobook API on port {}", config.server.port);

    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(db.pool.clone()));

    let publisher = BroadcastPublisher::new(config.events.channel_capacity);
    tokio::spawn(worker::start_event_logger(publisher.subscribe()));
    let events: Arc<dyn EventPublisher> = Arc::new(publisher);

    tracing::warn!("No card processor configured, charges go to the approving mock gateway");
    let gateway: Arc<dyn PaymentGateway> = Arc::new(CircuitBreakerGateway::new(
        Arc::new(MockPaymentGateway::approving()),
        config.payments.gateway_failure_threshold,
        Duration::from_secs(config.payments.gateway_reset_seconds),
    ));

    let state = AppState::new(
        store,
        gateway,
        events,
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    );

    let sweep = ExpirySweep::new(
        state.payments.clone(),
        state.bookings.clone(),
        chrono::Duration::minutes(config.payments.pending_expiry_minutes),
        config.payments.release_unpaid_bookings,
    );
    tokio::spawn(worker::start_expiry_worker(
        sweep,
        Duration::from_secs(config.payments.sweep_interval_seconds.max(1)),
    ));

    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
