//! Axum-based HTTP and media stream server.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::{header, HeaderMap},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::connection::handle_media_connection;
use crate::state::GatewayState;
use crate::twiml;

/// Build the gateway router.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let media_path = state.config.media_path();

    let app = Router::new()
        .route("/voice", get(voice_handler).post(voice_handler))
        .route(&media_path, get(media_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler));

    #[cfg(feature = "prometheus")]
    let app = app.route("/metrics", get(metrics_handler));

    app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Start the gateway server and run until Ctrl+C.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let addr = format!("{}:{port}", state.config.gateway_bind());
    let listener = TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");
    info!(
        "Media stream endpoint at {}",
        state.config.media_path()
    );

    serve(state, listener, shutdown_signal()).await
}

/// Serve on an already-bound listener until `shutdown` resolves, then close
/// every remaining call.
pub async fn serve(
    state: Arc<GatewayState>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(state.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    let closed = state.runtime.close_all().await;
    info!(closed, "Gateway stopped");
    Ok(())
}

async fn voice_handler(State(state): State<Arc<GatewayState>>, headers: HeaderMap) -> impl IntoResponse {
    let gateway = state.config.gateway.clone().unwrap_or_default();
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let stream_url = twiml::media_stream_url(gateway.public_url.as_deref(), host, &state.config.media_path());
    let dial_number = state.config.telephony().resolve_dial_number();

    info!(%stream_url, dial = dial_number.is_some(), "Serving voice document");

    (
        [(header::CONTENT_TYPE, "text/xml")],
        twiml::voice_response(&stream_url, dial_number.as_deref()),
    )
}

async fn media_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_media_connection(state, socket))
}

async fn status_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let sessions = state.registry.snapshot().await;

    axum::Json(json!({
        "active_calls": sessions.len(),
        "sessions": sessions,
    }))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let active_calls = state.registry.len().await;

    axum::Json(json!({
        "status": "ok",
        "version": version,
        "active_calls": active_calls,
        "uptime_secs": (chrono::Utc::now() - state.started_at).num_seconds(),
    }))
}

#[cfg(feature = "prometheus")]
async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (axum::http::StatusCode::OK, handle.render()),
        None => (
            axum::http::StatusCode::NOT_FOUND,
            "metrics recorder not installed".to_string(),
        ),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(%e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
