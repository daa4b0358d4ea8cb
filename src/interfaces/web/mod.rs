mod handlers;
mod router;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, info};

use crate::config::Config;
use crate::core::llm::LlmHub;
use crate::core::orchestrator::{Orchestrator, TurnError};
use crate::core::session::SessionStore;
use crate::core::tools::ToolRegistry;
use crate::core::workflow::engine::WorkflowEngine;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Arc<SessionStore>,
    pub(crate) orchestrator: Arc<Orchestrator>,
    pub(crate) browser_history_dir: PathBuf,
}

/// Wire the whole stack together and serve it until the process dies.
pub async fn serve(cfg: Config, host: &str, port: u16) -> Result<()> {
    let store = Arc::new(
        SessionStore::open_default(cfg.database_url.as_deref())
            .context("opening session store")?,
    );
    let llm = Arc::new(LlmHub::from_config(&cfg));
    let tools = Arc::new(ToolRegistry::new(&cfg, llm.clone()));
    let browser_pool = tools.browser_pool();
    let engine = Arc::new(WorkflowEngine::new(llm, tools));
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        engine,
        browser_pool,
        cfg.workflow_timeout,
    ));

    let state = AppState {
        store,
        orchestrator,
        browser_history_dir: cfg.browser_history_dir.clone(),
    };
    let app = router::build_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("DeepMedical API running at http://{addr}");
    axum::serve(listener, app).await.context("serving HTTP")
}

/// Error envelope for every endpoint: a status code plus a `detail` string.
/// Internal error text is logged, never forwarded.
pub(crate) struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub(crate) fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    pub(crate) fn not_found(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: detail.into(),
        }
    }

    pub(crate) fn internal(err: anyhow::Error) -> Self {
        error!("Internal error: {err:#}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: "internal server error".to_string(),
        }
    }
}

impl From<TurnError> for ApiError {
    fn from(err: TurnError) -> Self {
        match err {
            TurnError::BadRequest(detail) => ApiError::bad_request(detail),
            TurnError::NotFound(detail) => ApiError::not_found(detail),
            TurnError::Internal(err) => ApiError::internal(err),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "detail": self.detail })),
        )
            .into_response()
    }
}
