//! Browser trace artifact serving.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use super::super::{ApiError, AppState};

/// `GET /api/browser_history/{filename}`
///
/// Serves a named browser-trace gif. The filename must be a bare `.gif` name;
/// anything with path separators or another extension is rejected.
pub async fn browser_history_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    if !filename.ends_with(".gif")
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
    {
        return Err(ApiError::not_found("file not found"));
    }

    let path = state.browser_history_dir.join(&filename);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/gif".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
