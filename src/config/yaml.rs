//! YAML 配置文件支持
//!
//! 提供配置的加载与校验。配置在进程启动时构造一次，之后只读。

use super::types::{Config, MAX_SSH_DIAL_TIMEOUT_SECS};
use std::path::Path;
use thiserror::Error;

/// 默认配置文件路径（相对工作目录）
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/// 配置错误类型
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("配置读取错误: {0}")]
    ReadError(String),
    /// YAML 解析错误
    #[error("YAML 解析错误: {0}")]
    ParseError(String),
    /// 配置验证错误
    #[error("配置验证错误: {0}")]
    ValidationError(String),
}

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    config: Config,
}

impl ConfigManager {
    /// 从文件加载配置
    ///
    /// 如果文件不存在，返回默认配置
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;
            Self::parse_yaml(&content)?
        } else {
            tracing::warn!("[配置] 配置文件 {} 不存在，使用默认配置", path.display());
            Config::default()
        };
        config.validate()?;

        Ok(Self { config })
    }

    /// 从 YAML 字符串解析配置
    pub fn parse_yaml(yaml: &str) -> Result<Config, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 取出配置
    pub fn into_config(self) -> Config {
        self.config
    }
}

impl Config {
    /// 校验配置取值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.username.is_empty() || self.auth.password.is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.username 与 auth.password 不能为空".to_string(),
            ));
        }

        let timeout = self.terminal.ssh_dial_timeout_secs;
        if timeout == 0 || timeout > MAX_SSH_DIAL_TIMEOUT_SECS {
            return Err(ConfigError::ValidationError(format!(
                "terminal.ssh_dial_timeout_secs 必须在 1..={} 之间，当前为 {}",
                MAX_SSH_DIAL_TIMEOUT_SECS, timeout
            )));
        }

        if self.terminal.read_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "terminal.read_buffer_size 必须大于 0".to_string(),
            ));
        }

        if self.terminal.shell_candidates.is_empty() {
            return Err(ConfigError::ValidationError(
                "terminal.shell_candidates 不能为空".to_string(),
            ));
        }

        Ok(())
    }
}

/// 加载配置（便捷函数）
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    ConfigManager::load(path).map(ConfigManager::into_config)
}
