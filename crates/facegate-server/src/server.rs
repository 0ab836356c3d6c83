//! `GatewayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{DefaultBodyLimit, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use facegate_settings::GatewaySettings;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::context::{Forwarders, GatewayContext, Heartbeat};
use crate::dispatcher::ResultDispatcher;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::proxy::{PassthroughClient, ProxyError, Relayed};
use crate::registry::ConnectionRegistry;
use crate::sequencer::Deadlines;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session state shared by every connection.
    pub context: Arc<GatewayContext>,
    /// Passthrough REST client.
    pub passthrough: Arc<PassthroughClient>,
    /// Shutdown state; upgrades are refused once it begins.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Metrics handle for `/metrics`.
    pub metrics: PrometheusHandle,
    /// When the server started.
    pub start_time: Instant,
    /// Connection cap.
    pub max_connections: usize,
    /// Maximum inbound message size.
    pub max_message_size: usize,
}

/// The gateway server.
pub struct GatewayServer {
    settings: GatewaySettings,
    context: Arc<GatewayContext>,
    passthrough: Arc<PassthroughClient>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl GatewayServer {
    /// Create a server with HTTP forwarders for the configured backends.
    pub fn new(settings: GatewaySettings, metrics: PrometheusHandle) -> Result<Self, ServerError> {
        let client = reqwest::Client::builder().build()?;
        let forwarders = Forwarders::http(&client, &settings);
        Ok(Self::with_forwarders(settings, forwarders, client, metrics))
    }

    /// Create a server over caller-supplied forwarders.
    pub fn with_forwarders(
        settings: GatewaySettings,
        forwarders: Forwarders,
        client: reqwest::Client,
        metrics: PrometheusHandle,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let registry = Arc::new(ConnectionRegistry::new(
            settings.server.send_queue_capacity,
            Deadlines::from_settings(&settings),
            shutdown.token(),
        ));
        let context = Arc::new(GatewayContext {
            dispatcher: ResultDispatcher::new(registry.clone()),
            registry,
            forwarders,
            heartbeat: Heartbeat {
                interval: settings.server.heartbeat_interval(),
                timeout: settings.server.pong_timeout(),
            },
            tasks: shutdown.tasks(),
        });
        let passthrough = Arc::new(PassthroughClient::new(client, settings.recognition.clone()));

        Self {
            settings,
            context,
            passthrough,
            shutdown,
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            context: self.context.clone(),
            passthrough: self.passthrough.clone(),
            shutdown: self.shutdown.clone(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
            max_connections: self.settings.server.max_connections,
            max_message_size: self.settings.server.max_message_size,
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/api/metadata/last-registered", get(last_registered_handler))
            .route("/api/metadata/count", get(count_handler))
            .route(
                "/register",
                post(register_handler).layer(DefaultBodyLimit::max(self.settings.server.max_message_size)),
            )
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve in the background until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let listener = TcpListener::bind(self.settings.server.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%addr, "gateway listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                warn!(error = %e, "server error");
            }
        });
        Ok((addr, handle))
    }

    /// Live connections.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.context.registry
    }

    /// Shutdown coordinator; [`ShutdownCoordinator::drain`] after `listen`.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server settings.
    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        metrics::counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let active = state.context.registry.len();
    if active >= state.max_connections {
        warn!(active, max = state.max_connections, "connection limit reached, refusing upgrade");
        metrics::counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }

    let context = state.context.clone();
    let tasks = context.tasks.clone();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| tasks.track_future(run_ws_session(socket, context)))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.context.registry.len(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}

/// GET /api/metadata/last-registered
async fn last_registered_handler(State(state): State<AppState>) -> Result<Relayed, ProxyError> {
    state.passthrough.last_registered().await
}

/// GET /api/metadata/count
async fn count_handler(State(state): State<AppState>) -> Result<Relayed, ProxyError> {
    state.passthrough.registered_count().await
}

/// POST /register
async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Relayed, ProxyError> {
    state.passthrough.register(&body).await
}
