//! 应用入口模块
//!
//! - `bootstrap` - 配置加载与启动检查
//! - `runner` - 启动 HTTP 服务直到收到退出信号

pub mod bootstrap;
pub mod runner;

pub use runner::run;
