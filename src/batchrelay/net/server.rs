use std::future::Future;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use log::{info, warn};
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::batchrelay::auth::{authenticate_request, Authenticator, StaticTokenAuthenticator};
use crate::batchrelay::config::ServerConfig;
use crate::batchrelay::handler::RelayHandler;
use crate::batchrelay::net::connection::Connection;
use crate::batchrelay::net::upstream::UpstreamClient;
use crate::batchrelay::net::{health, upstream, webhook};
use crate::batchrelay::registry::ConnectionRegistry;
use crate::batchrelay::subscriptions::SubscriptionManager;
use crate::batchrelay::types::UserId;
use crate::error::RelayError;

/// State shared by every route
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub handler: Arc<RelayHandler>,
    pub auth: Arc<dyn Authenticator>,
    pub upstreams: Arc<UpstreamClient>,
}

impl AppState {
    pub fn from_config(config: ServerConfig) -> Result<Self, RelayError> {
        config.validate()?;

        let handler = Arc::new(RelayHandler::new(
            Arc::new(SubscriptionManager::new()),
            Arc::new(ConnectionRegistry::new()),
            config.send_timeout(),
            config.channel_capacity,
        ));
        let auth: Arc<dyn Authenticator> = Arc::new(StaticTokenAuthenticator::from_config(&config.auth));
        let upstreams = Arc::new(UpstreamClient::new(&config.upstreams, config.request_timeout())?);

        Ok(Self {
            config: Arc::new(config),
            handler,
            auth,
            upstreams,
        })
    }
}

/// Builds the relay's HTTP surface
pub fn build_router(state: AppState) -> Router {
    let request_timeout = state.config.request_timeout();

    // WebSocket upgrades are long-lived and stay outside the request timeout
    let mut channels = Router::new().route("/ws/batch-status", get(ws_handler));
    if state.config.auth.allow_path_identity {
        warn!("Path identity is enabled: /ws/batch-status/{{user_id}} accepts unauthenticated clients");
        channels = channels.route("/ws/batch-status/:user_id", get(ws_path_handler));
    }

    let requests = Router::new()
        .route("/webhook/batch-completed", post(webhook::batch_completed))
        .route("/batch/:kind/trigger", post(upstream::trigger_batch))
        .route("/health/check", get(health::health_check))
        .route("/health/info", get(health::relay_info))
        .layer(TimeoutLayer::new(request_timeout));

    channels
        .merge(requests)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Binds `addr` and serves until `shutdown` resolves
pub async fn run_server<F>(addr: &str, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!("Relay server {} running on {}", state.config.id, listener.local_addr()?);
    for kind in state.upstreams.kinds() {
        info!("Trigger proxy enabled for {}", kind);
    }

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// GET /ws/batch-status with `Authorization: Bearer <token>`
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response, RelayError> {
    let user_id = authenticate_request(state.auth.as_ref(), &headers)?;
    Ok(upgrade(ws, user_id, state.handler))
}

/// GET /ws/batch-status/{user_id}, only routed when path identity is enabled
async fn ws_path_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, user_id, state.handler)
}

fn upgrade(ws: WebSocketUpgrade, user_id: UserId, handler: Arc<RelayHandler>) -> Response {
    info!("Channel handshake accepted for user {}", user_id);
    ws.on_upgrade(move |socket| Connection::serve(socket, user_id, handler))
}
