// Main entry point for the chat server

use std::sync::Arc;

use anyhow::{Context, Result};
use chat_core::domains::auth::JwtService;
use chat_core::domains::messages::effects::LastMessageReconciler;
use chat_core::domains::messages::events::LIFECYCLE_TOPICS;
use chat_core::kernel::event_bus::{ConsumerManager, EventConsumer, EventHandler, JetStreamBus};
use chat_core::kernel::{ConnectionHub, EventProducer, JetStreamPublisher, ServerDeps};
use chat_core::server::{build_app, AxumAppState};
use chat_core::Config;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chat_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting chat server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Connect to NATS and make sure the lifecycle stream exists
    tracing::info!(url = %config.nats_url, "Connecting to NATS...");
    let nats = async_nats::connect(&config.nats_url)
        .await
        .context("Failed to connect to NATS")?;
    let bus = JetStreamBus::new(nats, config.event_stream.clone());
    bus.ensure_stream(&LIFECYCLE_TOPICS).await?;
    tracing::info!("Event bus ready");

    let events = EventProducer::new(Arc::new(JetStreamPublisher::new(bus.context())));
    let hub = ConnectionHub::with_capacity(config.ws.outbound_capacity);
    let jwt_service = Arc::new(JwtService::new(&config.jwt_secret, config.jwt_issuer.clone()));
    let server_deps = Arc::new(ServerDeps::postgres(
        pool.clone(),
        events,
        hub.clone(),
        jwt_service,
    ));

    // One consistency consumer per lifecycle topic
    let reconciler: Arc<dyn EventHandler> =
        Arc::new(LastMessageReconciler::from_deps(&server_deps));
    let mut manager = ConsumerManager::new();
    for topic in LIFECYCLE_TOPICS {
        let subscription = bus
            .subscribe(topic, &config.consumer_group)
            .await
            .with_context(|| format!("Failed to subscribe to {}", topic))?;
        manager = manager.with_consumer(EventConsumer::new(
            format!("{}-{}", config.consumer_group, topic),
            Box::new(subscription),
            reconciler.clone(),
        ));
    }

    let shutdown = CancellationToken::new();
    let consumers = manager.start(shutdown.clone());

    let state = AxumAppState::new(server_deps, config.ws.clone())
        .with_db_pool(pool)
        .with_consumers(consumers.state_watchers());
    let app = build_app(state, &config.allowed_origins);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("WebSocket: ws://localhost:{}/ws?token=<jwt>", config.port);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let signal = shutdown.clone();
    let sockets = hub.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            signal.cancel();
            sockets.close_all().await;
        })
        .await
        .context("Server error")?;

    for (name, exit) in consumers.wait().await {
        tracing::info!(consumer = %name, exit = ?exit, "Consumer finished");
    }

    tracing::info!("Chat server stopped");
    Ok(())
}
