//! HTTP surface of the relay.

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::warn;

use tabrelay_core::Message;

use crate::dispatcher::Dispatched;
use crate::state::RelayState;
use crate::tools;
use crate::ws::ws_upgrade;

pub fn build_router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/mcp/tools", get(list_tools))
        .route("/mcp/call", post(call_tool))
        .route("/browser/command", post(browser_command))
        .route("/browser/response", post(browser_response))
        .route("/browser/poll", get(browser_poll))
        .route("/screenshots", get(list_screenshots))
        .route("/ws", get(ws_upgrade))
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_response(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({"error": error}))).into_response()
}

/// Parse a request body; an empty body is `{}`.
fn parse_body(body: &Bytes) -> Result<Value, Response> {
    if body.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_slice(body).map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid JSON"))
}

fn parse_message(body: &Bytes) -> Result<Message, Response> {
    let value = parse_body(body)?;
    Message::from_value(value)
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "Invalid JSON"))
}

/// `GET /health`
pub async fn health(State(state): State<RelayState>) -> Json<Value> {
    Json(state.health().await)
}

/// `GET /mcp/tools`
pub async fn list_tools() -> Json<Value> {
    Json(tools::catalog())
}

/// `POST /mcp/call`
pub async fn call_tool(State(state): State<RelayState>, body: Bytes) -> Response {
    let request = match parse_body(&body) {
        Ok(request) => request,
        Err(resp) => return resp,
    };
    let name = request.get("name").and_then(Value::as_str).unwrap_or_default();
    let arguments = request.get("arguments").cloned().unwrap_or_else(|| json!({}));
    Json(state.call_tool(name, &arguments).await).into_response()
}

/// `POST /browser/command`
pub async fn browser_command(State(state): State<RelayState>, body: Bytes) -> Response {
    let command = match parse_message(&body) {
        Ok(command) => command,
        Err(resp) => return resp,
    };
    let caller_id = command.request_id_value().cloned();
    let action = command.action().unwrap_or_default().to_string();

    let reply = match state.dispatcher.dispatch(command).await {
        Ok(Dispatched::Completed(response)) => response.into_value(),
        Ok(Dispatched::Queued { request_id }) => json!({
            "success": true,
            "queued": true,
            "message": "Command queued",
            "action": action,
            "requestId": request_id,
        }),
        Err(e) => {
            warn!(action = %action, error = %e, "Browser command failed");
            let mut failure = Message::failure(e);
            if let Some(id) = caller_id {
                failure.set_request_id(id);
            }
            failure.into_value()
        }
    };
    Json(reply).into_response()
}

/// `POST /browser/response`
pub async fn browser_response(State(state): State<RelayState>, body: Bytes) -> Response {
    let response = match parse_message(&body) {
        Ok(response) => response,
        Err(resp) => return resp,
    };
    let resolved = state.accept_response(response).await;
    Json(json!({"success": true, "resolved": resolved})).into_response()
}

/// `GET /browser/poll`
pub async fn browser_poll(State(state): State<RelayState>) -> Json<Value> {
    let command = state.queue.pop().await.map(Message::into_value);
    Json(json!({"command": command}))
}

/// `GET /screenshots`
pub async fn list_screenshots(State(state): State<RelayState>) -> Response {
    match state.artifacts.list().await {
        Ok(screenshots) => Json(json!({"screenshots": screenshots})).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}
