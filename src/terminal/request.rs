//! 连接目标解析
//!
//! 从升级请求的查询参数构造 [`ConnectionRequest`]，决定走本地 PTY 还是远程 SSH。

use serde::Deserialize;

use super::error::TerminalError;
use super::events::SessionKind;

/// SSH 默认端口
pub const DEFAULT_SSH_PORT: u16 = 22;

/// 终端端点的查询参数
#[derive(Clone, Default, Deserialize)]
pub struct TerminalParams {
    pub host: Option<String>,
    #[serde(alias = "username")]
    pub user: Option<String>,
    pub password: Option<String>,
    /// PEM / OpenSSH 格式的私钥内容
    pub private_key: Option<String>,
    /// 认证 token（由认证中间件消费）
    pub token: Option<String>,
}

impl std::fmt::Debug for TerminalParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalParams")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key", &self.private_key.as_ref().map(|_| "***"))
            .finish()
    }
}

/// 远程凭证：密码、私钥，或两者都有
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub password: Option<String>,
    pub private_key: Option<String>,
}

impl Credential {
    fn from_params(params: &TerminalParams) -> Self {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        Self {
            password: non_empty(&params.password),
            private_key: non_empty(&params.private_key),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.password.is_none() && self.private_key.is_none()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key", &self.private_key.as_ref().map(|_| "***"))
            .finish()
    }
}

/// 连接目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    /// 本机 PTY
    Local,
    /// 远程 SSH，地址已补全端口
    Remote { addr: String },
}

/// 解析完成的连接请求，构造后不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    target_host: String,
    user: String,
    credential: Credential,
    target: SessionTarget,
}

impl ConnectionRequest {
    /// 按顺序校验：主机 → 用户名 → 凭证（后两项仅远程）
    pub fn resolve(params: &TerminalParams) -> Result<Self, TerminalError> {
        let host = params.host.clone().unwrap_or_default();
        if host.is_empty() {
            return Err(TerminalError::MissingHost);
        }

        if is_local_host(&host) {
            return Ok(Self {
                target_host: host,
                user: String::new(),
                credential: Credential::default(),
                target: SessionTarget::Local,
            });
        }

        let user = params.user.clone().unwrap_or_default();
        if user.is_empty() {
            return Err(TerminalError::MissingUsername);
        }

        let credential = Credential::from_params(params);
        if credential.is_empty() {
            return Err(TerminalError::MissingPassword);
        }

        let addr = with_default_port(&host, DEFAULT_SSH_PORT);
        Ok(Self {
            target_host: host,
            user,
            credential,
            target: SessionTarget::Remote { addr },
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    pub fn is_local(&self) -> bool {
        self.target == SessionTarget::Local
    }

    pub fn kind(&self) -> SessionKind {
        match self.target {
            SessionTarget::Local => SessionKind::Local,
            SessionTarget::Remote { .. } => SessionKind::Remote,
        }
    }

    /// 展示用的目标描述，如 `root@10.0.0.2:22`
    pub fn display_target(&self) -> String {
        match &self.target {
            SessionTarget::Local => format!("本地终端({})", self.target_host),
            SessionTarget::Remote { addr } => format!("{}@{}", self.user, addr),
        }
    }

    /// 拨号前发给前端的进度提示
    pub fn connecting_line(&self) -> String {
        match &self.target {
            SessionTarget::Local => "正在启动本地终端 ...\r\n".to_string(),
            SessionTarget::Remote { addr } => format!("正在连接到 {}@{} ...\r\n", self.user, addr),
        }
    }

    /// shell 启动后的绿色横幅
    pub fn banner_line(&self) -> String {
        format!(
            "\r\n\x1b[32m=== 成功连接到 {} ===\x1b[0m\r\n",
            self.display_target()
        )
    }
}

/// 精确匹配，不做 DNS / 网段判断
pub fn is_local_host(host: &str) -> bool {
    host == "localhost" || host == "127.0.0.1"
}

/// 没有显式端口时补上默认端口
///
/// 支持 `host`、`host:port`、`[v6]`、`[v6]:port` 以及裸 IPv6 字面量。
pub fn with_default_port(host: &str, port: u16) -> String {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((_, tail)) if tail.starts_with(':') => host.to_string(),
            _ => format!("{}:{}", host, port),
        };
    }
    if host.parse::<std::net::Ipv6Addr>().is_ok() {
        return format!("[{}]:{}", host, port);
    }
    if host.contains(':') {
        return host.to_string();
    }
    format!("{}:{}", host, port)
}

/// 把 `host:port` 拆开，去掉 IPv6 方括号
pub fn split_host_port(addr: &str) -> (String, u16) {
    match addr.rsplit_once(':') {
        Some((host, port)) => {
            let host = host.trim_start_matches('[').trim_end_matches(']');
            let port = port.parse().unwrap_or(DEFAULT_SSH_PORT);
            (host.to_string(), port)
        }
        None => (addr.to_string(), DEFAULT_SSH_PORT),
    }
}
