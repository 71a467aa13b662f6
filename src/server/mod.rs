//! HTTP 服务器
//!
//! 路由：
//! - `GET /health` - 健康检查
//! - `POST /api/login` - 登录签发 token
//! - `GET /api/terminal/ws` - 终端 WebSocket（需认证）

pub mod handlers;

#[cfg(test)]
mod tests;

use crate::config::{Config, TerminalConfig};
use crate::middleware::TokenAuthLayer;
use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// 登录请求体上限
pub const LOGIN_BODY_LIMIT: usize = 16 * 1024;

/// 服务器共享状态
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub terminal: Arc<TerminalConfig>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let terminal = Arc::new(config.terminal.clone());
        Self {
            config: Arc::new(config),
            terminal,
            started_at: Utc::now(),
        }
    }
}

/// 构建路由
pub fn build_router(state: AppState) -> Router {
    let terminal_routes = Router::new()
        .route(
            "/api/terminal/ws",
            get(handlers::terminal_ws_handler),
        )
        .route_layer(TokenAuthLayer::new(state.config.auth.clone()));

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/login",
            post(handlers::login).layer(RequestBodyLimitLayer::new(LOGIN_BODY_LIMIT)),
        )
        .merge(terminal_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 在已绑定的监听器上提供服务，`shutdown` 完成后优雅退出
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Server listening on {}", addr);
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
