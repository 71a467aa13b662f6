//! gegecp - Linux 管理面板后端
//!
//! 通过 WebSocket 把浏览器终端接到本机 PTY 或远程 SSH shell。

pub mod app;
pub mod config;
pub mod logger;
pub mod middleware;
pub mod server;
pub mod terminal;

pub use app::run;
pub use config::Config;
