//! WebSocket fan-out + REST endpoints for the chat engine.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        ws::{Message as WsFrame, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use super::fanout::{BroadcastPublisher, SessionFilter};
use super::model::{ApprovalStatus, ChatScope};
use crate::engine::IngressCoordinator;
use crate::error::DatabaseError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<IngressCoordinator>,
    pub publisher: Arc<BroadcastPublisher>,
}

/// Build the Axum router with the chat WebSocket and REST routes.
pub fn chat_routes(
    coordinator: Arc<IngressCoordinator>,
    publisher: Arc<BroadcastPublisher>,
) -> Router {
    let state = AppState {
        coordinator,
        publisher,
    };

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/chat/messages", post(submit_message))
        .route("/api/chat/messages/{id}/cancel", post(cancel_for_message))
        .route("/api/chat/messages/{id}/approval", post(set_approval))
        .route("/api/scheduled", get(list_scheduled))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "coach-relay"
    }))
}

// ── WebSocket ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WsParams {
    user_id: Option<String>,
    role: Option<String>,
}

impl WsParams {
    fn filter(self) -> SessionFilter {
        SessionFilter {
            coach: self.role.as_deref() == Some("coach"),
            user_id: self.user_id,
        }
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let filter = params.filter();
    info!(user_id = ?filter.user_id, coach = filter.coach, "WebSocket client connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, state.publisher, filter))
}

async fn handle_socket(mut socket: WebSocket, publisher: Arc<BroadcastPublisher>, filter: SessionFilter) {
    info!(user_id = ?filter.user_id, "WebSocket client connected");

    // Subscribe before announcing readiness so nothing published after the
    // ready frame can be missed.
    let mut rx = publisher.subscribe();

    let ready = serde_json::json!({
        "type": "session_ready",
        "user_id": filter.user_id,
        "coach": filter.coach,
    });
    if socket
        .send(WsFrame::Text(ready.to_string().into()))
        .await
        .is_err()
    {
        warn!("Failed to send ready frame, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            // Forward matching events to this client
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !filter.accepts(&event) {
                            continue;
                        }
                        if let Ok(json) = serde_json::to_string(&event)
                            && socket.send(WsFrame::Text(json.into())).await.is_err()
                        {
                            debug!("Client disconnected during send");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        // Best effort: missed events are recovered from history.
                        warn!(missed = n, "WS client lagged behind broadcast");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(WsFrame::Text(text))) => {
                        debug!(text = %text, "Ignoring client text frame");
                    }
                    Some(Ok(WsFrame::Ping(data))) => {
                        if socket.send(WsFrame::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsFrame::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

// ── REST Endpoints ──────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SubmitMessageBody {
    scope: ChatScope,
    sender_id: String,
    body: String,
    #[serde(default = "default_true")]
    automation_allowed: bool,
}

async fn submit_message(
    State(state): State<AppState>,
    Json(body): Json<SubmitMessageBody>,
) -> impl IntoResponse {
    if body.body.trim().is_empty() || body.sender_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "sender_id and body are required"})),
        );
    }

    match state
        .coordinator
        .submit_message(
            body.scope,
            &body.sender_id,
            &body.body,
            body.automation_allowed,
        )
        .await
    {
        Ok(outcome) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "message": outcome.message,
                "immediate_reply": outcome.immediate_reply,
            })),
        ),
        Err(e) => {
            error!(error = %e, "Failed to ingest message");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}

async fn cancel_for_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let message_id = match id.parse::<i64>() {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "Invalid message ID"})),
            );
        }
    };

    let cancelled = state
        .coordinator
        .scheduler()
        .cancel_for_message(message_id)
        .await;
    info!(message_id, cancelled, "Scheduled responses cancelled via API");
    (
        StatusCode::OK,
        Json(serde_json::json!({"message_id": message_id, "cancelled": cancelled})),
    )
}

#[derive(Debug, Deserialize)]
struct ApprovalBody {
    status: ApprovalStatus,
}

/// Coach review of a persisted message.
async fn set_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ApprovalBody>,
) -> impl IntoResponse {
    let message_id = match id.parse::<i64>() {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "Invalid message ID"})),
            );
        }
    };

    match state
        .coordinator
        .db()
        .update_approval_status(message_id, body.status)
        .await
    {
        Ok(()) => {
            info!(message_id, status = %body.status, "Message approval updated");
            (
                StatusCode::OK,
                Json(serde_json::json!({"message_id": message_id, "status": body.status})),
            )
        }
        Err(DatabaseError::NotFound { .. }) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Message not found"})),
        ),
        Err(e) => {
            error!(message_id, error = %e, "Failed to update approval");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}

async fn list_scheduled(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.scheduler().pending().await)
}
