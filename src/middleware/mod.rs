//! HTTP 中间件

pub mod auth;

pub use auth::{
    check_credentials, create_error_response, issue_token, validate_token, Identity,
    TokenAuthLayer, TokenAuthService,
};
