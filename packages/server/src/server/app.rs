//! Application setup and server configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Extension,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{get, put},
    Router,
};
use sqlx::PgPool;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::WsConfig;
use crate::kernel::event_bus::ConsumerState;
use crate::kernel::ServerDeps;
use crate::server::middleware::jwt_auth_middleware;
use crate::server::routes::{
    delete_messages_handler, edit_message_handler, health_handler, list_messages_handler,
    send_message_handler, ws_handler,
};

/// Per-request ceiling for REST handlers.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state
#[derive(Clone)]
pub struct AxumAppState {
    pub server_deps: Arc<ServerDeps>,
    /// `None` when running against in-memory stores
    pub db_pool: Option<PgPool>,
    /// Consumer state watchers reported by /health
    pub consumers: Vec<(String, watch::Receiver<ConsumerState>)>,
    pub ws: WsConfig,
}

impl AxumAppState {
    pub fn new(server_deps: Arc<ServerDeps>, ws: WsConfig) -> Self {
        Self {
            server_deps,
            db_pool: None,
            consumers: Vec::new(),
            ws,
        }
    }

    pub fn with_db_pool(mut self, pool: PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    pub fn with_consumers(mut self, consumers: Vec<(String, watch::Receiver<ConsumerState>)>) -> Self {
        self.consumers = consumers;
        self
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    // Empty list means development: allow any origin
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
}

/// Build the Axum application router
pub fn build_app(state: AxumAppState, allowed_origins: &[String]) -> Router {
    let jwt_service_for_middleware = state.server_deps.jwt_service.clone();

    Router::new()
        .route(
            "/api/chats/:chat_id/messages",
            get(list_messages_handler)
                .post(send_message_handler)
                .delete(delete_messages_handler),
        )
        .route(
            "/api/chats/:chat_id/messages/:message_id",
            put(edit_message_handler),
        )
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(middleware::from_fn(move |req, next| {
            jwt_auth_middleware(jwt_service_for_middleware.clone(), req, next)
        }))
        .layer(Extension(state))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}
