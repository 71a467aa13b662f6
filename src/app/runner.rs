//! 应用运行器模块
//!
//! 负责：
//! 1. 加载和校验配置
//! 2. 初始化日志
//! 3. 绑定监听地址并启动 HTTP 服务
//! 4. 收到 Ctrl-C 后优雅退出

use std::path::Path;

use anyhow::Context;

use crate::logger;
use crate::server::{self, AppState};

use super::bootstrap;

/// 运行面板后端直到收到退出信号
pub async fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = bootstrap::load_and_validate_config(config_path)
        .with_context(|| format!("加载配置 {} 失败", config_path.display()))?;

    let _log_guard = logger::init(&config.logging)?;
    tracing::info!("[配置] 使用配置文件 {}", config_path.display());
    bootstrap::log_startup_warnings(&config);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("绑定 {} 失败", addr))?;

    server::serve(listener, AppState::new(config), shutdown_signal()).await?;
    tracing::info!("服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("监听退出信号失败: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，正在关闭服务");
}
