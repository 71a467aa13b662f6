//! 终端模块错误类型
//!
//! 每个错误的 `Display` 就是发给前端的那一行诊断文本。
//!
//! ## 分类
//! - 参数校验错误（缺少主机/用户名/密码）
//! - 拨号/启动错误（SSH 拨号失败分类、找不到 shell）
//! - 会话中途的 I/O 错误
//! - 调整大小失败（非致命）

use thiserror::Error;

/// 终端错误类型
#[derive(Debug, Error)]
pub enum TerminalError {
    /// 未提供主机地址
    #[error("错误: 未提供主机地址")]
    MissingHost,

    /// 未提供用户名（仅远程）
    #[error("错误: 未提供用户名")]
    MissingUsername,

    /// 未提供密码或私钥（仅远程）
    #[error("错误: 未提供密码")]
    MissingPassword,

    /// 候选 shell 都不存在
    #[error("错误: 未找到可用的shell")]
    NoShellFound,

    /// PTY 创建失败
    #[error("启动终端失败: {0}")]
    PtyCreationFailed(String),

    /// SSH 拨号失败（已分类）
    #[error(transparent)]
    Dial(#[from] DialError),

    /// SSH 通道建立失败
    #[error("SSH会话建立失败: {0}")]
    ChannelFailed(String),

    /// 写入会话输入失败
    #[error("写入终端失败: {0}")]
    WriteFailed(String),

    /// 读取会话输出失败
    #[error("读取{stream}失败: {detail}")]
    ReadFailed { stream: &'static str, detail: String },

    /// 调整大小失败
    #[error("调整终端大小失败: {0}")]
    ResizeFailed(String),

    /// 写 WebSocket 失败
    #[error("WebSocket 发送失败: {0}")]
    SocketWriteFailed(String),

    /// 会话已关闭
    #[error("会话已关闭")]
    SessionClosed,
}

impl serde::Serialize for TerminalError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// SSH 拨号失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialErrorKind {
    /// 用户名或密码错误
    AuthFailed,
    /// 目标端口拒绝连接
    ConnectionRefused,
    /// 拨号超时
    Timeout,
    /// 服务器不接受可用的认证方式
    UnsupportedAuth,
    /// 其他失败
    Other,
}

/// 与具体传输库无关的拨号失败描述
///
/// 由 `remote` 模块从 io / russh 错误转换而来，分类只看这里。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialFailure {
    /// 服务器拒绝了所有尝试过的凭证
    AuthRejected,
    /// TCP 连接被拒绝
    Refused(String),
    /// 拨号（连接 + 认证）超时
    TimedOut(String),
    /// 没有任何可尝试的认证方式
    NoAuthMethod(String),
    /// 其他错误
    Other(String),
}

impl DialFailure {
    /// 从 io 错误转换
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused => Self::Refused(err.to_string()),
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                Self::TimedOut(err.to_string())
            }
            _ => Self::Other(err.to_string()),
        }
    }

    /// 失败类别
    pub fn kind(&self) -> DialErrorKind {
        match self {
            Self::AuthRejected => DialErrorKind::AuthFailed,
            Self::Refused(_) => DialErrorKind::ConnectionRefused,
            Self::TimedOut(_) => DialErrorKind::Timeout,
            Self::NoAuthMethod(_) => DialErrorKind::UnsupportedAuth,
            Self::Other(_) => DialErrorKind::Other,
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::AuthRejected => "服务器拒绝了提供的凭证".to_string(),
            Self::Refused(d) | Self::TimedOut(d) | Self::NoAuthMethod(d) | Self::Other(d) => {
                d.clone()
            }
        }
    }
}

/// 已分类的 SSH 拨号错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialError {
    pub kind: DialErrorKind,
    pub host: String,
    pub user: String,
    pub detail: String,
}

impl DialError {
    pub fn new(failure: DialFailure, host: &str, user: &str) -> Self {
        Self {
            kind: failure.kind(),
            host: host.to_string(),
            user: user.to_string(),
            detail: failure.detail(),
        }
    }

    /// 该类别的主提示语
    pub fn headline(&self) -> String {
        match self.kind {
            DialErrorKind::AuthFailed => {
                format!("SSH认证失败: 用户名[{}]或密码错误", self.user)
            }
            DialErrorKind::ConnectionRefused => {
                format!(
                    "SSH连接被拒绝: 请检查服务器[{}]是否开启SSH服务",
                    self.host
                )
            }
            DialErrorKind::Timeout => format!(
                "SSH连接超时: 请检查网络连接和防火墙设置，目标主机[{}]",
                self.host
            ),
            DialErrorKind::UnsupportedAuth => format!(
                "SSH认证方法不支持: 服务器可能不允许密码认证，用户[{}]",
                self.user
            ),
            DialErrorKind::Other => "SSH连接失败".to_string(),
        }
    }
}

impl std::fmt::Display for DialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.headline())
        } else {
            write!(f, "{}\n原始错误: {}", self.headline(), self.detail)
        }
    }
}

impl std::error::Error for DialError {}
