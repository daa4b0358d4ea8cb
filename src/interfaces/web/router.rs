use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{browser_history, chat, session, team};

fn build_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat/stream", post(chat::chat_stream))
        .route("/api/session", post(session::create_session))
        .route("/api/session/{id}/history", get(session::session_history))
        .route("/api/team_members", get(team::team_members))
        .route(
            "/api/browser_history/{filename}",
            get(browser_history::browser_history_file),
        )
        .layer(build_cors())
        .with_state(state)
}
