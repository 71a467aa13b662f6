//! 面板 token 认证中间件
//!
//! token 为 `md5(username + password)` 的小写十六进制，由登录接口签发。
//!
//! # 认证规则
//!
//! 1. 优先读取 `Authorization: Bearer <token>`
//! 2. 其次读取查询参数 `?token=`（WebSocket 升级只能走这条路）
//! 3. 缺失或不匹配返回 401 Unauthorized
//! 4. 通过后把 [`Identity`] 放入请求扩展

use crate::config::AuthConfig;
use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    response::IntoResponse,
};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use subtle::ConstantTimeEq;
use tower::{Layer, Service};

/// 通过认证的调用方
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
}

/// 按当前凭证签发 token
pub fn issue_token(auth: &AuthConfig) -> String {
    format!(
        "{:x}",
        md5::compute(format!("{}{}", auth.username, auth.password))
    )
}

/// 校验 token，常量时间比较
pub fn validate_token(auth: &AuthConfig, token: &str) -> Option<Identity> {
    if token.is_empty() {
        return None;
    }
    let expected = issue_token(auth);
    let matches: bool = token.as_bytes().ct_eq(expected.as_bytes()).into();
    matches.then(|| Identity {
        username: auth.username.clone(),
    })
}

/// 校验登录凭证，成功时返回 token
pub fn check_credentials(auth: &AuthConfig, username: &str, password: &str) -> Option<String> {
    let user_ok: bool = username.as_bytes().ct_eq(auth.username.as_bytes()).into();
    let pass_ok: bool = password.as_bytes().ct_eq(auth.password.as_bytes()).into();
    (user_ok && pass_ok).then(|| issue_token(auth))
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// token 认证层
#[derive(Clone)]
pub struct TokenAuthLayer {
    auth: Arc<AuthConfig>,
}

impl TokenAuthLayer {
    pub fn new(auth: AuthConfig) -> Self {
        Self {
            auth: Arc::new(auth),
        }
    }
}

impl<S> Layer<S> for TokenAuthLayer {
    type Service = TokenAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TokenAuthService {
            inner,
            auth: self.auth.clone(),
        }
    }
}

/// token 认证服务
#[derive(Clone)]
pub struct TokenAuthService<S> {
    inner: S,
    auth: Arc<AuthConfig>,
}

impl<S> TokenAuthService<S> {
    /// 从请求头或查询参数中提取 token
    fn extract_token(req: &Request<Body>) -> Option<String> {
        if let Some(auth) = req.headers().get("authorization") {
            if let Ok(auth_str) = auth.to_str() {
                if let Some(token) = auth_str.strip_prefix("Bearer ") {
                    return Some(token.trim().to_string());
                }
            }
        }

        let query = req.uri().query()?;
        serde_urlencoded::from_str::<TokenQuery>(query)
            .ok()
            .and_then(|q| q.token)
    }
}

impl<S> Service<Request<Body>> for TokenAuthService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let auth = self.auth.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let path = req.uri().path().to_string();
            match Self::extract_token(&req) {
                Some(token) => match validate_token(&auth, &token) {
                    Some(identity) => {
                        tracing::debug!("[AUTH] {} 认证通过: {}", path, identity.username);
                        req.extensions_mut().insert(identity);
                        inner.call(req).await
                    }
                    None => {
                        tracing::warn!("[AUTH] {} token 无效", path);
                        Ok(create_error_response(StatusCode::UNAUTHORIZED, "无效的token"))
                    }
                },
                None => {
                    tracing::warn!("[AUTH] {} 缺少 token", path);
                    Ok(create_error_response(StatusCode::UNAUTHORIZED, "未提供认证token"))
                }
            }
        })
    }
}

/// 创建错误响应
pub fn create_error_response(status: StatusCode, message: &str) -> Response<Body> {
    let body = serde_json::json!({
        "error": {
            "code": status.as_u16(),
            "message": message
        }
    });
    (status, axum::Json(body)).into_response()
}
