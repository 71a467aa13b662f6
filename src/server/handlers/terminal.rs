//! 终端 WebSocket 处理器

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use futures::StreamExt;

use crate::middleware::{create_error_response, Identity};
use crate::server::AppState;
use crate::terminal::{run_terminal, TerminalParams};

/// 检查 WebSocket 升级请求的来源
///
/// 没有 `Origin` 头的请求（非浏览器客户端）放行；
/// 否则要求 Origin 的 authority 与 `Host` 一致（忽略大小写）。
pub fn origin_allowed(headers: &HeaderMap, allow_any: bool) -> bool {
    if allow_any {
        return true;
    }
    let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) else {
        return true;
    };
    let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let authority = origin
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(origin)
        .split('/')
        .next()
        .unwrap_or_default();
    authority.eq_ignore_ascii_case(host)
}

/// 终端 WebSocket 升级处理器
pub async fn terminal_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<TerminalParams>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
) -> Response {
    if !origin_allowed(&headers, state.terminal.allow_any_origin) {
        tracing::warn!(
            "[WS] 拒绝跨域升级: origin={:?}",
            headers.get(header::ORIGIN)
        );
        return create_error_response(StatusCode::FORBIDDEN, "不允许的来源");
    }

    tracing::info!(
        "[WS] {} 打开终端: host={:?}",
        identity.username,
        params.host
    );

    let settings = state.terminal.clone();
    ws.on_failed_upgrade(|e| tracing::warn!("[WS] 升级失败: {}", e))
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            let outcome = run_terminal(sink, stream, params, settings).await;
            tracing::debug!("[WS] 终端连接结束: {:?}", outcome);
        })
        .into_response()
}
