//! 路由处理器

mod health;
mod login;
mod terminal;

pub use health::health;
pub use login::{login, LoginRequest, LoginResponse};
pub use terminal::{origin_allowed, terminal_ws_handler};
