//! Recognition status and command endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::auth::web_context;
use super::{ApiFailure, ApiState};
use crate::voice::StatusSnapshot;

/// Command request body
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

/// Command response body
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub ok: bool,
    pub response: String,
}

/// Current recognition status
async fn status(State(state): State<Arc<ApiState>>) -> Json<StatusSnapshot> {
    Json(state.device.status())
}

/// Run a text command as the token's user
async fn command(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, ApiFailure> {
    let ctx = web_context(&headers, state.device.users()).ok_or_else(ApiFailure::unauthorized)?;

    // Commands may wait on worker threads for up to a second
    let device = Arc::clone(&state.device);
    let response = tokio::task::spawn_blocking(move || device.execute(&ctx, &body.command))
        .await
        .map_err(|e| ApiFailure::from(crate::Error::InvalidState(format!("command task failed: {e}"))))??;

    Ok(Json(CommandResponse { ok: true, response }))
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/sr/status", get(status))
        .route("/command", post(command))
        .with_state(state)
}
