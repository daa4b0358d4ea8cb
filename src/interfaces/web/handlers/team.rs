//! Worker roster listing.

use axum::Json;
use serde_json::{Value, json};

use crate::core::team;

/// `GET /api/team_members`
pub async fn team_members() -> Json<Value> {
    let members: serde_json::Map<String, Value> = team::team_members()
        .iter()
        .map(|m| {
            (
                m.name.to_string(),
                json!({
                    "name": m.name,
                    "desc": m.desc,
                    "desc_for_llm": m.desc_for_llm,
                    "is_optional": m.is_optional,
                }),
            )
        })
        .collect();

    Json(json!({ "team_members": members }))
}
