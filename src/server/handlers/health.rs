use axum::{extract::State, response::IntoResponse, Json};

use crate::server::AppState;

/// 健康检查
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at.to_rfc3339(),
    }))
}
