//! Session management endpoints: explicit creation and history rehydration.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::{Value, json};

use super::super::{ApiError, AppState};
use crate::core::session::SessionStore;

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    user_id: Option<String>,
}

/// `POST /api/session`
///
/// The body is optional; `{"user_id": ...}` attaches a user handle.
pub async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let user_id = serde_json::from_slice::<CreateSessionRequest>(&body)
        .ok()
        .and_then(|p| p.user_id);

    let session = state.store.create_session(user_id.as_deref()).await?;
    Ok(Json(json!({ "session_id": session.id })))
}

/// `GET /api/session/{id}/history`
pub async fn session_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = state
        .store
        .get_session(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session {id} not found")))?;

    let messages = state.store.get_messages(&id).await?;
    Ok(Json(json!({
        "session_id": session.id,
        "messages": SessionStore::format_messages(&messages),
        "state": session.state,
    })))
}
