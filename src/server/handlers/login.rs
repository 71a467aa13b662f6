//! 登录处理器

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::middleware::check_credentials;
use crate::server::AppState;

/// 登录请求
#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// 登录成功响应
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub message: String,
    pub status: String,
}

/// 校验用户名密码并返回 token
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("[AUTH] 解析登录请求失败: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "无效的请求参数");
        }
    };

    match check_credentials(&state.config.auth, &request.username, &request.password) {
        Some(token) => {
            tracing::info!("[AUTH] 登录成功，用户名: {}", request.username);
            Json(LoginResponse {
                token,
                message: "登录成功".to_string(),
                status: "success".to_string(),
            })
            .into_response()
        }
        None => {
            tracing::warn!("[AUTH] 登录失败，用户名: {}", request.username);
            error_response(StatusCode::UNAUTHORIZED, "用户名或密码错误")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
