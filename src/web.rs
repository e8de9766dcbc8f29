//! Axum-based HTTP command and status API
//!
//! The server never touches control state directly: commands are forwarded
//! to the control task and answered through a oneshot channel, status comes
//! from the latest cycle snapshot, and events stream from the status
//! broadcast.

use crate::driver::{CycleSnapshot, DriverCommand, DriverState};
use crate::error::{HesperusError, Result};
use crate::notify::{EventKind, StatusBroadcast};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub commands: mpsc::UnboundedSender<DriverCommand>,
    pub snapshot: watch::Receiver<Option<CycleSnapshot>>,
    pub state: watch::Receiver<DriverState>,
    pub events: StatusBroadcast,
}

#[derive(Debug, Deserialize)]
pub struct CommandBody {
    pub caller: String,
    pub text: String,
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let driver_state = state.state.borrow().clone();
    let snapshot = state.snapshot.borrow().clone();
    let mut root = serde_json::json!({
        "driver_state": driver_state.name(),
        "snapshot": snapshot,
    });
    if let DriverState::Error(message) = driver_state {
        root["error"] = serde_json::json!(message);
    }
    Json(root)
}

fn error_status(error: &HesperusError) -> (StatusCode, String) {
    match error {
        HesperusError::Auth { message } => (StatusCode::FORBIDDEN, message.clone()),
        HesperusError::Validation { message, .. } => (StatusCode::BAD_REQUEST, message.clone()),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

async fn command(
    State(state): State<AppState>,
    Json(body): Json<CommandBody>,
) -> impl IntoResponse {
    let (reply_tx, reply_rx) = oneshot::channel();
    let cmd = DriverCommand::Text {
        caller: body.caller,
        text: body.text,
        reply: reply_tx,
    };
    if state.commands.send(cmd).is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"ok": false, "error": "Controller is not running"})),
        );
    }

    match reply_rx.await {
        Ok(Ok(reply)) => (
            StatusCode::OK,
            Json(serde_json::json!({"ok": true, "reply": reply})),
        ),
        Ok(Err(e)) => {
            let (code, message) = error_status(&e);
            (code, Json(serde_json::json!({"ok": false, "error": message})))
        }
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"ok": false, "error": "Controller stopped before replying"})),
        ),
    }
}

pub async fn events(State(state): State<AppState>) -> impl IntoResponse {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(event) => {
            let name = match event.kind {
                EventKind::Status => "status",
                EventKind::Metadata => "metadata",
            };
            let payload = serde_json::to_string(&event).ok()?;
            Some(Ok::<Event, std::convert::Infallible>(
                Event::default().event(name).data(payload),
            ))
        }
        // Lagged receivers skip what they missed
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/events", get(events))
        .route("/api/command", post(command))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind `host:port` and serve until the task is dropped. Bind and accept
/// failures are reported as `HesperusError::Web`.
pub async fn serve(state: AppState, host: &str, port: u16) -> Result<()> {
    let router = build_router(state);

    let logger = crate::logging::get_logger("web");
    logger.info(&format!(
        "Starting web server; requested host={}, port={}",
        host, port
    ));

    let addr = match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port),
        Err(_) => {
            logger.warn(&format!("Invalid host '{}'; falling back to 127.0.0.1", host));
            ([127, 0, 0, 1], port).into()
        }
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| HesperusError::web(format!("Cannot bind {}: {}", addr, e)))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| HesperusError::web(e.to_string()))?;
    logger.info(&format!(
        "Web server listening at http://{}:{} (API /api)",
        local_addr.ip(),
        local_addr.port()
    ));

    axum::serve(listener, router)
        .await
        .map_err(|e| HesperusError::web(e.to_string()))
}
