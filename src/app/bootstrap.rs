//! 应用启动引导模块
//!
//! 包含配置加载、校验和启动时的安全提示。

use std::path::Path;

use crate::config::{self, AuthConfig, Config, ConfigError};

/// 加载并校验配置
pub fn load_and_validate_config(path: &Path) -> Result<Config, ConfigError> {
    config::load_config(path)
}

/// 启动时需要提醒运维人员的配置项
pub fn startup_warnings(config: &Config) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if config.auth == AuthConfig::default() {
        warnings.push("仍在使用默认账号 admin/admin，请尽快修改 auth 配置");
    }
    if config.terminal.accept_any_host_key {
        warnings.push("terminal.accept_any_host_key 已开启，SSH 主机密钥不做校验");
    }
    if config.terminal.allow_any_origin {
        warnings.push("terminal.allow_any_origin 已开启，终端 WebSocket 接受任意来源");
    }
    warnings
}

/// 打印启动提示
pub fn log_startup_warnings(config: &Config) {
    for warning in startup_warnings(config) {
        tracing::warn!("[配置] {}", warning);
    }
}
