//! 会话后端抽象
//!
//! 本地 PTY 和远程 SSH 都以同一组句柄交给泵：
//! 一个输入写端（[`TerminalBackend::write_input`]），
//! 一到两个输出流（[`OutputStream`]，通道关闭即 EOF）。

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::error::TerminalError;

/// 输出流通道容量（块数）
pub const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// 输出流来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// 标准输出（本地 PTY 为合并流）
    Stdout,
    /// 标准错误（仅远程）
    Stderr,
}

impl StreamKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stdout => "终端输出",
            Self::Stderr => "终端错误输出",
        }
    }
}

/// 一路可读输出
///
/// `Some(Ok(..))` 为数据块，`Some(Err(..))` 为读取错误，`None` 为流结束。
pub struct OutputStream {
    pub kind: StreamKind,
    pub rx: mpsc::Receiver<std::io::Result<Bytes>>,
}

impl OutputStream {
    /// 创建一对发送端/输出流
    pub fn channel(kind: StreamKind) -> (mpsc::Sender<std::io::Result<Bytes>>, Self) {
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        (tx, Self { kind, rx })
    }
}

/// 会话后端
#[async_trait]
pub trait TerminalBackend: Send + Sync {
    /// 写入 shell 的输入
    async fn write_input(&self, data: Bytes) -> Result<(), TerminalError>;

    /// 调整窗口大小
    async fn resize(&self, cols: u16, rows: u16) -> Result<(), TerminalError>;

    /// 释放进程 / 通道；重复调用必须是空操作
    async fn shutdown(&self);

    /// 本地子进程 PID
    fn process_id(&self) -> Option<u32> {
        None
    }
}

/// 已建立的会话：后端 + 输出流
pub struct OpenedSession {
    pub backend: Arc<dyn TerminalBackend>,
    pub outputs: Vec<OutputStream>,
}
