//! 配置类型定义
//!
//! 定义面板的配置结构，支持 YAML 序列化/反序列化。
//! 所有字段都有默认值，缺省的配置文件也能启动。

use serde::{Deserialize, Serialize};

/// 默认监听端口
pub const DEFAULT_PORT: u16 = 8080;
/// 默认 SSH 拨号超时（秒）
pub const DEFAULT_SSH_DIAL_TIMEOUT_SECS: u64 = 10;
/// SSH 拨号超时上限（秒）
pub const MAX_SSH_DIAL_TIMEOUT_SECS: u64 = 300;
/// 输出泵默认读取缓冲区大小
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8192;

/// 主配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 登录凭证
    #[serde(default)]
    pub auth: AuthConfig,
    /// 终端配置
    #[serde(default)]
    pub terminal: TerminalConfig,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// 面板登录凭证（单一用户名/密码对）
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_password() -> String {
    "admin".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: default_password(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// 终端配置
///
/// `accept_any_host_key` 与 `allow_any_origin` 是两个信任开关，
/// 默认开启（单运维人员部署模型），启动时会以 warn 级别打印。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TerminalConfig {
    /// 本地 shell 候选路径，按顺序探测
    #[serde(default = "default_shell_candidates")]
    pub shell_candidates: Vec<String>,
    /// SSH 拨号超时（秒）
    #[serde(default = "default_ssh_dial_timeout_secs")]
    pub ssh_dial_timeout_secs: u64,
    /// 跳过 SSH 主机密钥校验
    #[serde(default = "default_true")]
    pub accept_any_host_key: bool,
    /// 接受任意 Origin 的 WebSocket 升级
    #[serde(default = "default_true")]
    pub allow_any_origin: bool,
    /// 输出泵单次读取的字节数
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// 初始列数
    #[serde(default = "default_cols")]
    pub default_cols: u16,
    /// 初始行数
    #[serde(default = "default_rows")]
    pub default_rows: u16,
}

fn default_shell_candidates() -> Vec<String> {
    vec![
        "/bin/bash".to_string(),
        "/usr/bin/bash".to_string(),
        "/bin/sh".to_string(),
    ]
}

fn default_ssh_dial_timeout_secs() -> u64 {
    DEFAULT_SSH_DIAL_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    40
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell_candidates: default_shell_candidates(),
            ssh_dial_timeout_secs: default_ssh_dial_timeout_secs(),
            accept_any_host_key: true,
            allow_any_origin: true,
            read_buffer_size: default_read_buffer_size(),
            default_cols: default_cols(),
            default_rows: default_rows(),
        }
    }
}

impl TerminalConfig {
    /// SSH 拨号超时
    pub fn dial_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ssh_dial_timeout_secs)
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// 日志级别（可被 RUST_LOG 覆盖）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 日志文件目录，为空时只输出到标准输出
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}
