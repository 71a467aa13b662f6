//! 配置管理模块
//!
//! 提供 YAML 配置文件支持。

mod types;
mod yaml;

pub use types::{
    AuthConfig, Config, LoggingConfig, ServerConfig, TerminalConfig, DEFAULT_PORT,
    DEFAULT_READ_BUFFER_SIZE, DEFAULT_SSH_DIAL_TIMEOUT_SECS, MAX_SSH_DIAL_TIMEOUT_SECS,
};
pub use yaml::{load_config, ConfigError, ConfigManager, DEFAULT_CONFIG_PATH};
