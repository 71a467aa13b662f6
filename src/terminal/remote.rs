//! 远程 SSH 会话
//!
//! 拨号 → 认证（私钥优先，其次密码）→ 打开 session 通道 → 请求 PTY →
//! 设置环境变量（尽力而为）→ 启动 shell。
//!
//! ## 架构说明
//! russh 的 `Channel` 只有一个所有者能 `wait()`，因此由一个驱动任务独占通道：
//! 通道数据按 stdout / stderr 分发到两路输出流，输入、调整大小、关闭
//! 都以命令形式发给驱动任务，并通过 oneshot 回报结果。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect, Pty};
use russh_keys::key;
use tokio::sync::{mpsc, oneshot};

use super::error::{DialError, DialFailure, TerminalError};
use super::request::{split_host_port, ConnectionRequest, Credential, SessionTarget};
use super::session::{OpenedSession, OutputStream, StreamKind, TerminalBackend};
use crate::config::TerminalConfig;

/// 远程终端类型
pub const REMOTE_TERM: &str = "xterm-256color";

/// 远程 shell 的环境变量，设置失败不影响会话
pub const REMOTE_ENV: [(&str, &str); 5] = [
    ("TERM", "xterm-256color"),
    ("LANG", "en_US.UTF-8"),
    ("LC_ALL", "en_US.UTF-8"),
    ("SHELL", "/bin/bash"),
    (
        "PATH",
        "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin",
    ),
];

/// 终端模式：回显开启，14400 波特，UTF-8 输入
pub const REMOTE_PTY_MODES: [(Pty, u32); 4] = [
    (Pty::ECHO, 1),
    (Pty::TTY_OP_ISPEED, 14400),
    (Pty::TTY_OP_OSPEED, 14400),
    (Pty::IUTF8, 1),
];

/// 关闭命令等待驱动任务确认的上限
const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(3);

impl DialFailure {
    /// 从 russh 错误转换
    pub fn from_russh(err: &russh::Error) -> Self {
        match err {
            russh::Error::IO(io) => Self::from_io(io),
            russh::Error::NoAuthMethod => Self::NoAuthMethod(err.to_string()),
            russh::Error::NotAuthenticated => Self::AuthRejected,
            other => Self::Other(other.to_string()),
        }
    }
}

/// russh 客户端回调
struct PanelSshHandler {
    host: String,
    port: u16,
    accept_any_host_key: bool,
}

#[async_trait]
impl client::Handler for PanelSshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        if self.accept_any_host_key {
            return Ok(true);
        }
        match russh_keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(known) => {
                if !known {
                    tracing::warn!(
                        "[SSH] {}:{} 的主机密钥不在 known_hosts 中，拒绝连接",
                        self.host,
                        self.port
                    );
                }
                Ok(known)
            }
            Err(e) => {
                tracing::warn!("[SSH] 校验 {}:{} 主机密钥失败: {}", self.host, self.port, e);
                Ok(false)
            }
        }
    }
}

/// 发给驱动任务的命令
enum ChannelCommand {
    Input(Bytes, oneshot::Sender<Result<(), TerminalError>>),
    Resize(u16, u16, oneshot::Sender<Result<(), TerminalError>>),
    Close(oneshot::Sender<()>),
}

/// 远程 SSH 会话
pub struct RemoteSshSession {
    id: String,
    target: String,
    commands: mpsc::Sender<ChannelCommand>,
    closed: AtomicBool,
}

impl RemoteSshSession {
    /// 拨号并启动远程 shell
    pub async fn dial(
        id: &str,
        request: &ConnectionRequest,
        settings: &TerminalConfig,
    ) -> Result<OpenedSession, TerminalError> {
        let addr = match request.target() {
            SessionTarget::Remote { addr } => addr.clone(),
            SessionTarget::Local => {
                return Err(TerminalError::ChannelFailed(
                    "本地目标不能走 SSH".to_string(),
                ))
            }
        };
        let user = request.user().to_string();

        tracing::info!("[SSH] 会话 {} 正在连接 {}@{}", id, user, addr);

        let handle = connect_and_authenticate(
            &addr,
            &user,
            request.credential(),
            settings.accept_any_host_key,
            settings.dial_timeout(),
        )
        .await
        .map_err(|failure| {
            let err = DialError::new(failure, &addr, &user);
            tracing::warn!("[SSH] 会话 {} 拨号失败: {:?}", id, err.kind);
            TerminalError::Dial(err)
        })?;

        let channel = match open_shell(&handle, settings).await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = handle
                    .disconnect(Disconnect::ByApplication, "", "English")
                    .await;
                return Err(e);
            }
        };

        let (stdout_tx, stdout) = OutputStream::channel(StreamKind::Stdout);
        let (stderr_tx, stderr) = OutputStream::channel(StreamKind::Stderr);
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        tokio::spawn(drive_channel(
            id.to_string(),
            handle,
            channel,
            cmd_rx,
            stdout_tx,
            stderr_tx,
        ));

        tracing::info!("[SSH] 会话 {} 已连接 {}@{}", id, user, addr);

        let session = Self {
            id: id.to_string(),
            target: format!("{}@{}", user, addr),
            commands: cmd_tx,
            closed: AtomicBool::new(false),
        };

        Ok(OpenedSession {
            backend: Arc::new(session),
            outputs: vec![stdout, stderr],
        })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, TerminalError>>) -> ChannelCommand,
    ) -> Result<T, TerminalError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(build(ack_tx))
            .await
            .map_err(|_| TerminalError::SessionClosed)?;
        ack_rx.await.map_err(|_| TerminalError::SessionClosed)?
    }
}

/// 连接并认证，整体受拨号超时约束
async fn connect_and_authenticate(
    addr: &str,
    user: &str,
    credential: &Credential,
    accept_any_host_key: bool,
    timeout: Duration,
) -> Result<Handle<PanelSshHandler>, DialFailure> {
    let (host, port) = split_host_port(addr);
    let handler = PanelSshHandler {
        host,
        port,
        accept_any_host_key,
    };
    let config = Arc::new(client::Config::default());

    let dial = async {
        let mut handle = client::connect(config, addr, handler)
            .await
            .map_err(|e| DialFailure::from_russh(&e))?;
        authenticate(&mut handle, user, credential).await?;
        Ok::<_, DialFailure>(handle)
    };

    match tokio::time::timeout(timeout, dial).await {
        Ok(result) => result,
        Err(_) => Err(DialFailure::TimedOut(format!(
            "{} 秒内未完成连接",
            timeout.as_secs()
        ))),
    }
}

/// 私钥优先（可解析时），其次密码
async fn authenticate(
    handle: &mut Handle<PanelSshHandler>,
    user: &str,
    credential: &Credential,
) -> Result<(), DialFailure> {
    let mut attempted = false;

    if let Some(material) = credential.private_key.as_deref() {
        match russh_keys::decode_secret_key(material, None) {
            Ok(key_pair) => {
                attempted = true;
                let ok = handle
                    .authenticate_publickey(user, Arc::new(key_pair))
                    .await
                    .map_err(|e| DialFailure::from_russh(&e))?;
                if ok {
                    return Ok(());
                }
                tracing::debug!("[SSH] 用户 {} 私钥认证未通过", user);
            }
            Err(e) => tracing::warn!("[SSH] 私钥解析失败，跳过私钥认证: {}", e),
        }
    }

    if let Some(password) = credential.password.as_deref() {
        attempted = true;
        let ok = handle
            .authenticate_password(user, password)
            .await
            .map_err(|e| DialFailure::from_russh(&e))?;
        if ok {
            return Ok(());
        }
    }

    if attempted {
        Err(DialFailure::AuthRejected)
    } else {
        Err(DialFailure::NoAuthMethod(
            "没有可用的认证方式（私钥无法解析且未提供密码）".to_string(),
        ))
    }
}

/// 打开 session 通道、请求 PTY、设置环境并启动 shell
async fn open_shell(
    handle: &Handle<PanelSshHandler>,
    settings: &TerminalConfig,
) -> Result<Channel<Msg>, TerminalError> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| TerminalError::ChannelFailed(format!("创建SSH会话失败: {}", e)))?;

    channel
        .request_pty(
            true,
            REMOTE_TERM,
            u32::from(settings.default_cols),
            u32::from(settings.default_rows),
            0,
            0,
            &REMOTE_PTY_MODES,
        )
        .await
        .map_err(|e| TerminalError::ChannelFailed(format!("请求伪终端失败: {}", e)))?;

    for (name, value) in REMOTE_ENV {
        if let Err(e) = channel.set_env(false, name, value).await {
            tracing::debug!("[SSH] 设置环境变量 {} 失败: {}", name, e);
        }
    }

    channel
        .request_shell(true)
        .await
        .map_err(|e| TerminalError::ChannelFailed(format!("启动shell失败: {}", e)))?;

    Ok(channel)
}

/// 驱动任务：独占通道，直到远端关闭或收到关闭命令
async fn drive_channel(
    id: String,
    handle: Handle<PanelSshHandler>,
    mut channel: Channel<Msg>,
    mut commands: mpsc::Receiver<ChannelCommand>,
    stdout: mpsc::Sender<std::io::Result<Bytes>>,
    stderr: mpsc::Sender<std::io::Result<Bytes>>,
) {
    let mut close_ack = None;

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(ChannelCommand::Input(data, ack)) => {
                    let result = channel
                        .data(&data[..])
                        .await
                        .map_err(|e| TerminalError::WriteFailed(e.to_string()));
                    let _ = ack.send(result);
                }
                Some(ChannelCommand::Resize(cols, rows, ack)) => {
                    let result = channel
                        .window_change(u32::from(cols), u32::from(rows), 0, 0)
                        .await
                        .map_err(|e| TerminalError::ResizeFailed(e.to_string()));
                    if result.is_ok() {
                        tracing::debug!("[SSH] 会话 {} 调整大小为 {}x{}", id, cols, rows);
                    }
                    let _ = ack.send(result);
                }
                Some(ChannelCommand::Close(ack)) => {
                    close_ack = Some(ack);
                    break;
                }
                None => break,
            },
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if stdout.send(Ok(Bytes::copy_from_slice(&data))).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    if stderr.send(Ok(Bytes::copy_from_slice(&data))).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    tracing::info!("[SSH] 会话 {} 远程 shell 退出，状态码 {}", id, exit_status);
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    tracing::info!("[SSH] 会话 {} 远端关闭通道", id);
                    break;
                }
                Some(_) => {}
            },
        }
    }

    // 先让输出流看到 EOF，再依次关闭通道和连接
    drop(stdout);
    drop(stderr);
    if let Err(e) = channel.close().await {
        tracing::debug!("[SSH] 会话 {} 关闭通道: {}", id, e);
    }
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "English")
        .await
    {
        tracing::debug!("[SSH] 会话 {} 断开连接: {}", id, e);
    }
    tracing::info!("[SSH] 会话 {} 通道与连接已释放", id);

    if let Some(ack) = close_ack {
        let _ = ack.send(());
    }
}

#[async_trait]
impl TerminalBackend for RemoteSshSession {
    async fn write_input(&self, data: Bytes) -> Result<(), TerminalError> {
        self.request(|ack| ChannelCommand::Input(data, ack)).await
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<(), TerminalError> {
        self.request(|ack| ChannelCommand::Resize(cols, rows, ack))
            .await
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .commands
            .send(ChannelCommand::Close(ack_tx))
            .await
            .is_err()
        {
            tracing::debug!("[SSH] 会话 {} 驱动任务已结束", self.id);
            return;
        }
        if tokio::time::timeout(CLOSE_ACK_TIMEOUT, ack_rx).await.is_err() {
            tracing::warn!("[SSH] 会话 {} ({}) 关闭超时", self.id, self.target);
        }
    }
}
