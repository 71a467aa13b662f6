//! 本地 PTY 会话
//!
//! 在伪终端中启动本机 shell，PTY master 同时承担输出读取和退出检测。
//!
//! ## 架构说明
//! portable-pty 的读写都是阻塞的：输出由独立线程读取后投递到 tokio 通道，
//! 写入走 `spawn_blocking`。子进程退出后 master 读到 EOF（Linux 上是 EIO），
//! 读线程随之结束并关闭通道。

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

use super::error::TerminalError;
use super::session::{OpenedSession, OutputStream, StreamKind, TerminalBackend};
use crate::config::TerminalConfig;

/// 本地 shell 额外注入的环境变量
pub const LOCAL_ENV: [(&str, &str); 3] = [
    ("TERM", "xterm-256color"),
    ("COLORTERM", "truecolor"),
    ("LANG", "en_US.UTF-8"),
];

#[cfg(unix)]
const EIO: i32 = 5;

/// 结束进程后等待回收的上限
const REAP_TIMEOUT: Duration = Duration::from_secs(3);
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// 按顺序探测候选路径，返回第一个存在的
pub fn find_shell<S: AsRef<str>>(candidates: &[S]) -> Result<PathBuf, TerminalError> {
    candidates
        .iter()
        .map(|c| Path::new(c.as_ref()))
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .ok_or(TerminalError::NoShellFound)
}

/// 本地 PTY 会话
pub struct LocalPtySession {
    id: String,
    /// PTY 写入器
    writer: Arc<Mutex<Option<Box<dyn Write + Send>>>>,
    /// PTY master（用于调整大小，释放时置空以关闭）
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    child: Arc<Mutex<Option<Box<dyn Child + Send + Sync>>>>,
    pid: Option<u32>,
    closed: AtomicBool,
}

impl LocalPtySession {
    /// 启动本地 shell
    ///
    /// # 参数
    /// - `id`: 会话 ID（仅用于日志）
    /// - `settings`: 终端配置（候选 shell、初始大小、读缓冲区）
    pub fn open(id: &str, settings: &TerminalConfig) -> Result<OpenedSession, TerminalError> {
        let shell = find_shell(settings.shell_candidates.as_slice())?;
        let (cols, rows) = (settings.default_cols, settings.default_rows);
        tracing::info!(
            "[终端] 会话 {} 使用 shell: {}，大小: {}x{}",
            id,
            shell.display(),
            cols,
            rows
        );

        let pair = native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::PtyCreationFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&shell);
        for (key, value) in LOCAL_ENV {
            cmd.env(key, value);
        }
        if let Some(home) = dirs::home_dir() {
            cmd.cwd(home);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TerminalError::PtyCreationFailed(e.to_string()))?;
        // slave 必须在父进程里关掉，否则子进程退出后 master 读不到 EOF
        drop(pair.slave);

        let pid = child.process_id();

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TerminalError::PtyCreationFailed(e.to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::PtyCreationFailed(e.to_string()))?;

        let (tx, output) = OutputStream::channel(StreamKind::Stdout);
        spawn_reader(id.to_string(), reader, tx, settings.read_buffer_size);

        tracing::info!("[终端] 会话 {} 本地进程已启动 (pid: {:?})", id, pid);

        let session = Self {
            id: id.to_string(),
            writer: Arc::new(Mutex::new(Some(writer))),
            master: Mutex::new(Some(pair.master)),
            child: Arc::new(Mutex::new(Some(child))),
            pid,
            closed: AtomicBool::new(false),
        };

        Ok(OpenedSession {
            backend: Arc::new(session),
            outputs: vec![output],
        })
    }
}

/// 结束并回收子进程
///
/// 自有子进程的 `kill()` 先发 SIGHUP，宽限期内未退出再发 SIGKILL；
/// 回收等待有上限，读线程和 tokio 阻塞线程都不会被卡住。
fn terminate_child(id: &str, child: &mut (dyn Child + Send + Sync)) {
    if let Err(e) = child.kill() {
        tracing::debug!("[终端] 会话 {} 结束进程: {}", id, e);
    }

    let deadline = Instant::now() + REAP_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!("[终端] 会话 {} 进程退出: {:?}", id, status);
                return;
            }
            Ok(None) if Instant::now() < deadline => std::thread::sleep(REAP_POLL_INTERVAL),
            Ok(None) => {
                tracing::warn!("[终端] 会话 {} 进程在 {:?} 内未退出", id, REAP_TIMEOUT);
                return;
            }
            Err(e) => {
                tracing::debug!("[终端] 会话 {} 回收进程失败: {}", id, e);
                return;
            }
        }
    }
}

/// 启动输出读取线程
fn spawn_reader(
    id: String,
    mut reader: Box<dyn Read + Send>,
    tx: mpsc::Sender<std::io::Result<Bytes>>,
    buffer_size: usize,
) {
    std::thread::spawn(move || {
        let mut buffer = vec![0u8; buffer_size];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => {
                    tracing::info!("[终端] 会话 {} 进程已退出", id);
                    break;
                }
                Ok(n) => {
                    if tx
                        .blocking_send(Ok(Bytes::copy_from_slice(&buffer[..n])))
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                #[cfg(unix)]
                Err(e) if e.raw_os_error() == Some(EIO) => {
                    tracing::info!("[终端] 会话 {} 进程已退出", id);
                    break;
                }
                Err(e) => {
                    tracing::error!("[终端] 会话 {} 读取错误: {}", id, e);
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }
    });
}

#[async_trait]
impl TerminalBackend for LocalPtySession {
    async fn write_input(&self, data: Bytes) -> Result<(), TerminalError> {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = writer.lock();
            let writer = guard.as_mut().ok_or(TerminalError::SessionClosed)?;
            writer
                .write_all(&data)
                .map_err(|e| TerminalError::WriteFailed(e.to_string()))?;
            writer
                .flush()
                .map_err(|e| TerminalError::WriteFailed(e.to_string()))
        })
        .await
        .map_err(|e| TerminalError::WriteFailed(e.to_string()))?
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<(), TerminalError> {
        let master = self.master.lock();
        let master = master.as_ref().ok_or(TerminalError::SessionClosed)?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::ResizeFailed(e.to_string()))?;
        tracing::debug!("[终端] 会话 {} 调整大小为 {}x{}", self.id, cols, rows);
        Ok(())
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // 先结束进程，再释放写入器和 master
        let child = self.child.clone();
        let id = self.id.clone();
        let reaped = tokio::task::spawn_blocking(move || {
            if let Some(mut child) = child.lock().take() {
                terminate_child(&id, child.as_mut());
            }
        })
        .await;
        if let Err(e) = reaped {
            tracing::warn!("[终端] 会话 {} 回收任务异常: {}", self.id, e);
        }

        self.writer.lock().take();
        self.master.lock().take();

        tracing::info!("[终端] 会话 {} 本地进程已释放", self.id);
    }

    fn process_id(&self) -> Option<u32> {
        self.pid
    }
}
