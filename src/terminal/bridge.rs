//! WebSocket ↔ 终端桥接
//!
//! 每个会话跑三路泵：
//! - 入站泵：socket → shell 输入，拦截 resize 控制消息
//! - 输出泵：stdout → socket
//! - 错误输出泵：stderr → socket（仅远程）
//!
//! 任何一路先退出都会触发 [`Teardown`]：取消其余泵、释放进程/通道、关闭 socket。
//! 清理只执行一次，后到的泵只会看到取消信号并直接退出。
//! 所有 socket 写入都经过 [`SocketWriter`] 的同一把锁。

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use axum::extract::ws::Message;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::control::{ResizeMessage, Utf8Carry};
use super::error::TerminalError;
use super::events::{SessionKind, SessionState, SessionStateCell};
use super::local::LocalPtySession;
use super::remote::RemoteSshSession;
use super::request::{ConnectionRequest, TerminalParams};
use super::session::{OpenedSession, OutputStream, StreamKind, TerminalBackend};
use crate::config::TerminalConfig;

/// 串行化的 socket 写端
///
/// 克隆共享同一个底层 sink；关闭后所有写入返回 [`TerminalError::SessionClosed`]。
pub struct SocketWriter<Si> {
    sink: Arc<Mutex<Si>>,
    closed: Arc<AtomicBool>,
}

impl<Si> Clone for SocketWriter<Si> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<Si> SocketWriter<Si>
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
{
    pub fn new(sink: Si) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 发送一帧文本
    pub async fn send_text(&self, text: String) -> Result<(), TerminalError> {
        let mut sink = self.sink.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(TerminalError::SessionClosed);
        }
        sink.send(Message::Text(text))
            .await
            .map_err(|e| TerminalError::SocketWriteFailed(e.to_string()))
    }

    /// 把错误作为一行诊断文本发给前端，发送失败只记日志
    pub async fn send_diagnostic(&self, err: &TerminalError) {
        if let Err(e) = self.send_text(format!("{}\r\n", err)).await {
            tracing::debug!("[WS] 诊断信息未送达: {} ({})", err, e);
        }
    }

    /// 发送关闭帧并关闭 sink；重复调用是空操作
    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = sink.send(Message::Close(None)).await {
            tracing::debug!("[WS] 发送关闭帧失败: {}", e);
        }
        if let Err(e) = sink.close().await {
            tracing::debug!("[WS] 关闭连接失败: {}", e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// 泵的身份，用于记录是谁触发了清理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpKind {
    Inbound,
    Stdout,
    Stderr,
    /// 所有泵退出后的兜底清理
    Supervisor,
}

impl PumpKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Inbound => "入站泵",
            Self::Stdout => "输出泵",
            Self::Stderr => "错误输出泵",
            Self::Supervisor => "会话守护",
        }
    }
}

impl From<StreamKind> for PumpKind {
    fn from(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Stdout => Self::Stdout,
            StreamKind::Stderr => Self::Stderr,
        }
    }
}

/// 会话清理，只执行一次
pub struct Teardown<Si> {
    session_id: String,
    first: OnceLock<PumpKind>,
    cancel: CancellationToken,
    backend: Arc<dyn TerminalBackend>,
    writer: SocketWriter<Si>,
    state: Arc<SessionStateCell>,
}

impl<Si> Teardown<Si>
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
{
    pub fn new(
        session_id: impl Into<String>,
        cancel: CancellationToken,
        backend: Arc<dyn TerminalBackend>,
        writer: SocketWriter<Si>,
        state: Arc<SessionStateCell>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            first: OnceLock::new(),
            cancel,
            backend,
            writer,
            state,
        }
    }

    /// 触发清理；只有第一个调用者真正执行，返回是否由本次调用执行
    pub async fn trigger(&self, origin: PumpKind) -> bool {
        if self.first.set(origin).is_err() {
            return false;
        }
        tracing::info!(
            "[终端] 会话 {} 由{}触发关闭",
            self.session_id,
            origin.label()
        );
        self.state.advance(SessionState::Closing);
        self.cancel.cancel();
        self.backend.shutdown().await;
        self.writer.close().await;
        true
    }

    /// 第一个触发清理的泵
    pub fn first_trigger(&self) -> Option<PumpKind> {
        self.first.get().copied()
    }
}

/// 入站帧里的一条 resize 指令（文本帧或 UTF-8 二进制帧）
fn resize_in(frame: &Message) -> Option<ResizeMessage> {
    match frame {
        Message::Text(text) => ResizeMessage::parse(text),
        Message::Binary(data) => std::str::from_utf8(data).ok().and_then(ResizeMessage::parse),
        _ => None,
    }
}

async fn pump_inbound<Si, St, E>(
    session_id: String,
    mut stream: St,
    backend: Arc<dyn TerminalBackend>,
    writer: SocketWriter<Si>,
    teardown: Arc<Teardown<Si>>,
    cancel: CancellationToken,
) where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
    St: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };

        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                tracing::warn!("[WS] 会话 {} 读取失败: {}", session_id, e);
                break;
            }
            None => {
                tracing::debug!("[WS] 会话 {} 客户端断开", session_id);
                break;
            }
        };

        if let Some(resize) = resize_in(&frame) {
            if let Err(e) = backend.resize(resize.cols, resize.rows).await {
                tracing::warn!("[终端] 会话 {} {}", session_id, e);
                writer.send_diagnostic(&e).await;
            }
            continue;
        }

        let data = match frame {
            Message::Text(text) => Bytes::from(text),
            Message::Binary(data) => Bytes::from(data),
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => {
                tracing::debug!("[WS] 会话 {} 收到关闭帧", session_id);
                break;
            }
        };

        if let Err(e) = backend.write_input(data).await {
            tracing::warn!("[终端] 会话 {} {}", session_id, e);
            writer.send_diagnostic(&e).await;
            break;
        }
    }

    teardown.trigger(PumpKind::Inbound).await;
}

async fn pump_output<Si>(
    session_id: String,
    mut output: OutputStream,
    writer: SocketWriter<Si>,
    teardown: Arc<Teardown<Si>>,
    cancel: CancellationToken,
) where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
{
    let origin = PumpKind::from(output.kind);
    let mut carry = Utf8Carry::default();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = output.rx.recv() => chunk,
        };

        match chunk {
            Some(Ok(data)) => {
                let text = carry.push(&data);
                if text.is_empty() {
                    continue;
                }
                if let Err(e) = writer.send_text(text).await {
                    tracing::debug!("[WS] 会话 {} {}停止: {}", session_id, origin.label(), e);
                    break;
                }
            }
            Some(Err(e)) => {
                let err = TerminalError::ReadFailed {
                    stream: output.kind.label(),
                    detail: e.to_string(),
                };
                tracing::warn!("[终端] 会话 {} {}", session_id, err);
                writer.send_diagnostic(&err).await;
                break;
            }
            None => {
                let rest = carry.finish();
                if !rest.is_empty() {
                    if let Err(e) = writer.send_text(rest).await {
                        tracing::debug!("[WS] 会话 {} {}尾部输出未送达: {}", session_id, origin.label(), e);
                    }
                }
                tracing::debug!("[终端] 会话 {} {}到达 EOF", session_id, origin.label());
                break;
            }
        }
    }

    teardown.trigger(origin).await;
}

/// 运行泵直到全部退出，返回最先触发清理的泵
pub async fn run_pumps<Si, St, E>(
    session_id: &str,
    opened: OpenedSession,
    stream: St,
    writer: SocketWriter<Si>,
    state: Arc<SessionStateCell>,
) -> Option<PumpKind>
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
    St: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let OpenedSession { backend, outputs } = opened;
    let cancel = CancellationToken::new();
    let teardown = Arc::new(Teardown::new(
        session_id,
        cancel.clone(),
        backend.clone(),
        writer.clone(),
        state.clone(),
    ));

    state.advance(SessionState::Running);

    let mut pumps = JoinSet::new();
    pumps.spawn(pump_inbound(
        session_id.to_string(),
        stream,
        backend,
        writer.clone(),
        teardown.clone(),
        cancel.clone(),
    ));
    for output in outputs {
        pumps.spawn(pump_output(
            session_id.to_string(),
            output,
            writer.clone(),
            teardown.clone(),
            cancel.clone(),
        ));
    }

    while let Some(joined) = pumps.join_next().await {
        if let Err(e) = joined {
            tracing::error!("[终端] 会话 {} 泵任务异常退出: {}", session_id, e);
        }
    }

    teardown.trigger(PumpKind::Supervisor).await;
    state.advance(SessionState::Closed);
    teardown.first_trigger()
}

/// 一次终端会话的结果
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub session_id: String,
    pub kind: Option<SessionKind>,
    pub state: SessionState,
    pub closed_by: Option<PumpKind>,
}

async fn open_session(
    session_id: &str,
    request: &ConnectionRequest,
    settings: &Arc<TerminalConfig>,
) -> Result<OpenedSession, TerminalError> {
    if request.is_local() {
        let id = session_id.to_string();
        let settings = settings.clone();
        return tokio::task::spawn_blocking(move || LocalPtySession::open(&id, &settings))
            .await
            .map_err(|e| TerminalError::PtyCreationFailed(e.to_string()))?;
    }
    RemoteSshSession::dial(session_id, request, settings).await
}

/// 终端端点入口：解析参数、建立会话、运行泵直到结束
///
/// 解析或建立失败时发送一行诊断并关闭 socket，状态直接进入 `Closed`。
pub async fn run_terminal<Si, St, E>(
    sink: Si,
    stream: St,
    params: TerminalParams,
    settings: Arc<TerminalConfig>,
) -> SessionOutcome
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
    St: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let session_id = uuid::Uuid::new_v4().to_string();
    let state = Arc::new(SessionStateCell::new(session_id.clone()));
    let writer = SocketWriter::new(sink);
    let mut outcome = SessionOutcome {
        session_id: session_id.clone(),
        kind: None,
        state: SessionState::Connecting,
        closed_by: None,
    };

    tracing::debug!("[WS] 会话 {} 参数: {:?}", session_id, params);

    let request = match ConnectionRequest::resolve(&params) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("[WS] 会话 {} 参数无效: {}", session_id, e);
            return fail_early(&writer, &state, &e, outcome).await;
        }
    };
    outcome.kind = Some(request.kind());

    if let Err(e) = writer.send_text(request.connecting_line()).await {
        tracing::info!("[WS] 会话 {} 客户端已离开: {}", session_id, e);
        writer.close().await;
        state.advance(SessionState::Closed);
        outcome.state = state.get();
        return outcome;
    }

    let opened = match open_session(&session_id, &request, &settings).await {
        Ok(opened) => opened,
        Err(e) => {
            tracing::error!(
                "[终端] 会话 {} 连接 {} 失败: {}",
                session_id,
                request.display_target(),
                e
            );
            return fail_early(&writer, &state, &e, outcome).await;
        }
    };

    state.advance(SessionState::Established);
    tracing::info!(
        "[终端] 会话 {} 已连接 {}",
        session_id,
        request.display_target()
    );
    if let Err(e) = writer.send_text(request.banner_line()).await {
        tracing::debug!("[WS] 会话 {} 横幅发送失败: {}", session_id, e);
    }

    outcome.closed_by = run_pumps(&session_id, opened, stream, writer, state.clone()).await;
    outcome.state = state.get();
    tracing::info!(
        "[终端] 会话 {} 已结束 (触发方: {:?})",
        session_id,
        outcome.closed_by
    );
    outcome
}

async fn fail_early<Si>(
    writer: &SocketWriter<Si>,
    state: &SessionStateCell,
    err: &TerminalError,
    mut outcome: SessionOutcome,
) -> SessionOutcome
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
{
    writer.send_diagnostic(err).await;
    writer.close().await;
    state.advance(SessionState::Closed);
    outcome.state = state.get();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::channel::mpsc::{unbounded, UnboundedSender};
    use parking_lot::Mutex as SyncMutex;
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    #[derive(Default)]
    struct SinkLog {
        messages: Vec<Message>,
        closes: usize,
        overlaps: usize,
        busy: bool,
    }

    /// 记录所有帧的 sink；`yield_on_flush` 时每次 flush 先挂起一次
    #[derive(Clone, Default)]
    struct TestSink {
        log: Arc<SyncMutex<SinkLog>>,
        yield_on_flush: bool,
        yielded: bool,
    }

    impl TestSink {
        fn texts(&self) -> Vec<String> {
            self.log
                .lock()
                .messages
                .iter()
                .filter_map(|m| match m {
                    Message::Text(t) => Some(t.clone()),
                    _ => None,
                })
                .collect()
        }

        fn close_frames(&self) -> usize {
            self.log
                .lock()
                .messages
                .iter()
                .filter(|m| matches!(m, Message::Close(_)))
                .count()
        }

        fn closes(&self) -> usize {
            self.log.lock().closes
        }
    }

    impl Sink<Message> for TestSink {
        type Error = Infallible;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Infallible> {
            let mut log = self.log.lock();
            if log.busy {
                log.overlaps += 1;
            }
            log.busy = true;
            log.messages.push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            let this = self.get_mut();
            if this.yield_on_flush && !this.yielded {
                this.yielded = true;
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            this.yielded = false;
            this.log.lock().busy = false;
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            let mut log = self.log.lock();
            log.closes += 1;
            log.busy = false;
            Poll::Ready(Ok(()))
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        writes: SyncMutex<Vec<Bytes>>,
        resizes: SyncMutex<Vec<(u16, u16)>>,
        shutdowns: AtomicUsize,
        fail_writes: bool,
        fail_resize: bool,
    }

    #[async_trait]
    impl TerminalBackend for FakeBackend {
        async fn write_input(&self, data: Bytes) -> Result<(), TerminalError> {
            if self.fail_writes {
                return Err(TerminalError::WriteFailed("broken".to_string()));
            }
            self.writes.lock().push(data);
            Ok(())
        }

        async fn resize(&self, cols: u16, rows: u16) -> Result<(), TerminalError> {
            if self.fail_resize {
                return Err(TerminalError::ResizeFailed("no window".to_string()));
            }
            self.resizes.lock().push((cols, rows));
            Ok(())
        }

        async fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        backend: Arc<FakeBackend>,
        sink: TestSink,
        input: UnboundedSender<Result<Message, std::io::Error>>,
        stdout: mpsc::Sender<std::io::Result<Bytes>>,
        stderr: mpsc::Sender<std::io::Result<Bytes>>,
        state: Arc<SessionStateCell>,
        task: JoinHandle<Option<PumpKind>>,
    }

    fn start(backend: FakeBackend) -> Harness {
        let backend = Arc::new(backend);
        let sink = TestSink::default();
        let (input, stream) = unbounded();
        let (stdout, stdout_stream) = OutputStream::channel(StreamKind::Stdout);
        let (stderr, stderr_stream) = OutputStream::channel(StreamKind::Stderr);
        let state = Arc::new(SessionStateCell::new("test"));

        let dyn_backend: Arc<dyn TerminalBackend> = backend.clone();
        let opened = OpenedSession {
            backend: dyn_backend,
            outputs: vec![stdout_stream, stderr_stream],
        };
        let writer = SocketWriter::new(sink.clone());
        let task_state = state.clone();
        let task = tokio::spawn(async move {
            run_pumps("test", opened, stream, writer, task_state).await
        });

        Harness {
            backend,
            sink,
            input,
            stdout,
            stderr,
            state,
            task,
        }
    }

    async fn finish(task: JoinHandle<Option<PumpKind>>) -> Option<PumpKind> {
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("泵未在超时内退出")
            .expect("泵任务 panic")
    }

    #[tokio::test]
    async fn test_client_disconnect_tears_down_once() {
        let h = start(FakeBackend::default());
        h.input
            .unbounded_send(Ok(Message::Text("ls\n".to_string())))
            .unwrap();
        h.input.close_channel();

        let closed_by = finish(h.task).await;
        assert_eq!(closed_by, Some(PumpKind::Inbound));
        assert_eq!(h.backend.writes.lock().as_slice(), &[Bytes::from("ls\n")]);
        assert_eq!(h.backend.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(h.sink.closes(), 1);
        assert_eq!(h.state.get(), SessionState::Closed);
        // 泵退出后输出端已无人接收
        assert!(h.stdout.is_closed());
        assert!(h.stderr.is_closed());
    }

    #[tokio::test]
    async fn test_close_frame_tears_down() {
        let h = start(FakeBackend::default());
        h.input.unbounded_send(Ok(Message::Close(None))).unwrap();

        let closed_by = finish(h.task).await;
        assert_eq!(closed_by, Some(PumpKind::Inbound));
        assert_eq!(h.backend.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(h.sink.closes(), 1);
        assert_eq!(h.sink.close_frames(), 1);
        assert_eq!(h.state.get(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_stdout_eof_tears_down_once() {
        let h = start(FakeBackend::default());
        h.stdout.send(Ok(Bytes::from_static(b"bye\r\n"))).await.unwrap();
        let Harness {
            backend,
            sink,
            input,
            stdout,
            stderr,
            state,
            task,
        } = h;
        drop(stdout);

        let closed_by = finish(task).await;
        assert_eq!(closed_by, Some(PumpKind::Stdout));
        assert_eq!(sink.texts(), vec!["bye\r\n".to_string()]);
        assert_eq!(backend.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(sink.closes(), 1);
        assert_eq!(state.get(), SessionState::Closed);
        // 入站泵被取消后不再读取
        assert!(input.is_closed());
        assert!(stderr.is_closed());
    }

    #[tokio::test]
    async fn test_stderr_error_reports_and_tears_down() {
        let h = start(FakeBackend::default());
        h.stderr
            .send(Err(std::io::Error::new(std::io::ErrorKind::Other, "boom")))
            .await
            .unwrap();

        let Harness {
            backend,
            sink,
            input: _input,
            stdout: _stdout,
            stderr: _stderr,
            state,
            task,
        } = h;
        let closed_by = finish(task).await;
        assert_eq!(closed_by, Some(PumpKind::Stderr));
        assert_eq!(sink.texts(), vec!["读取终端错误输出失败: boom\r\n".to_string()]);
        assert_eq!(backend.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(sink.closes(), 1);
        assert_eq!(sink.close_frames(), 1);
        assert_eq!(state.get(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_resize_frames_are_not_forwarded() {
        let h = start(FakeBackend::default());
        let frames = vec![
            Message::Text(r#"{"type":"resize","cols":120,"rows":40}"#.to_string()),
            Message::Text("ls\n".to_string()),
            Message::Binary(br#"{"type":"resize","cols":80,"rows":24}"#.to_vec()),
            Message::Text(r#"{"type":"note","cols":1,"rows":1}"#.to_string()),
            Message::Ping(vec![1]),
            Message::Binary(vec![0xff, 0x03]),
        ];
        for frame in frames {
            h.input.unbounded_send(Ok(frame)).unwrap();
        }
        h.input.close_channel();

        let closed_by = finish(h.task).await;
        assert_eq!(closed_by, Some(PumpKind::Inbound));
        assert_eq!(h.backend.resizes.lock().as_slice(), &[(120, 40), (80, 24)]);
        assert_eq!(
            h.backend.writes.lock().as_slice(),
            &[
                Bytes::from("ls\n"),
                Bytes::from(r#"{"type":"note","cols":1,"rows":1}"#),
                Bytes::from(vec![0xff, 0x03]),
            ]
        );
    }

    #[tokio::test]
    async fn test_resize_failure_is_not_fatal() {
        let h = start(FakeBackend {
            fail_resize: true,
            ..Default::default()
        });
        h.input
            .unbounded_send(Ok(Message::Text(
                r#"{"type":"resize","cols":10,"rows":5}"#.to_string(),
            )))
            .unwrap();
        h.input
            .unbounded_send(Ok(Message::Text("pwd\n".to_string())))
            .unwrap();
        h.input.close_channel();

        finish(h.task).await;
        assert_eq!(h.backend.writes.lock().as_slice(), &[Bytes::from("pwd\n")]);
        assert_eq!(
            h.sink.texts(),
            vec!["调整终端大小失败: no window\r\n".to_string()]
        );
    }

    #[tokio::test]
    async fn test_input_write_failure_ends_session() {
        let h = start(FakeBackend {
            fail_writes: true,
            ..Default::default()
        });
        h.input
            .unbounded_send(Ok(Message::Text("ls\n".to_string())))
            .unwrap();

        let Harness {
            backend,
            sink,
            input: _input,
            stdout: _stdout,
            stderr: _stderr,
            state,
            task,
        } = h;
        let closed_by = finish(task).await;
        assert_eq!(closed_by, Some(PumpKind::Inbound));
        assert_eq!(sink.texts(), vec!["写入终端失败: broken\r\n".to_string()]);
        assert_eq!(backend.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(state.get(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_output_split_utf8_is_reassembled() {
        let h = start(FakeBackend::default());
        let bytes = "你好".as_bytes();
        h.stdout
            .send(Ok(Bytes::copy_from_slice(&bytes[..2])))
            .await
            .unwrap();
        h.stdout
            .send(Ok(Bytes::copy_from_slice(&bytes[2..])))
            .await
            .unwrap();

        let Harness {
            sink,
            input: _input,
            stdout,
            stderr: _stderr,
            task,
            ..
        } = h;
        drop(stdout);
        finish(task).await;
        assert_eq!(sink.texts().concat(), "你好");
    }

    #[tokio::test]
    async fn test_truncated_utf8_at_eof_is_flushed() {
        let h = start(FakeBackend::default());
        let bytes = "好".as_bytes();
        h.stdout
            .send(Ok(Bytes::copy_from_slice(&bytes[..2])))
            .await
            .unwrap();

        let Harness {
            sink,
            input: _input,
            stdout,
            stderr: _stderr,
            task,
            ..
        } = h;
        drop(stdout);
        assert_eq!(finish(task).await, Some(PumpKind::Stdout));
        assert_eq!(sink.texts().concat(), "\u{FFFD}");
    }

    #[tokio::test]
    async fn test_trigger_runs_once() {
        let sink = TestSink::default();
        let backend = Arc::new(FakeBackend::default());
        let dyn_backend: Arc<dyn TerminalBackend> = backend.clone();
        let cancel = CancellationToken::new();
        let state = Arc::new(SessionStateCell::new("once"));
        let teardown = Arc::new(Teardown::new(
            "once",
            cancel.clone(),
            dyn_backend,
            SocketWriter::new(sink.clone()),
            state.clone(),
        ));

        let mut set = JoinSet::new();
        for origin in [PumpKind::Inbound, PumpKind::Stdout, PumpKind::Stderr] {
            let teardown = teardown.clone();
            set.spawn(async move { teardown.trigger(origin).await });
        }
        let mut fired = 0;
        while let Some(res) = set.join_next().await {
            if res.unwrap() {
                fired += 1;
            }
        }

        assert_eq!(fired, 1);
        assert!(cancel.is_cancelled());
        assert!(teardown.first_trigger().is_some());
        assert_eq!(backend.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(sink.closes(), 1);
        assert_eq!(state.get(), SessionState::Closing);
    }

    #[tokio::test]
    async fn test_concurrent_writes_are_serialized() {
        let sink = TestSink {
            yield_on_flush: true,
            ..Default::default()
        };
        let writer = SocketWriter::new(sink.clone());

        let mut set = JoinSet::new();
        for task in 0..8 {
            let writer = writer.clone();
            set.spawn(async move {
                for i in 0..20 {
                    writer.send_text(format!("{}-{}", task, i)).await.unwrap();
                }
            });
        }
        while let Some(res) = set.join_next().await {
            res.unwrap();
        }

        assert_eq!(sink.log.lock().overlaps, 0);
        assert_eq!(sink.texts().len(), 160);
    }

    #[tokio::test]
    async fn test_writer_rejects_after_close() {
        let sink = TestSink::default();
        let writer = SocketWriter::new(sink.clone());
        writer.close().await;
        writer.close().await;

        assert!(writer.is_closed());
        assert!(matches!(
            writer.send_text("late".to_string()).await,
            Err(TerminalError::SessionClosed)
        ));
        assert_eq!(sink.closes(), 1);
        assert_eq!(sink.close_frames(), 1);
    }

    #[tokio::test]
    async fn test_run_terminal_missing_host() {
        let sink = TestSink::default();
        let (_input, stream) = unbounded::<Result<Message, std::io::Error>>();

        let outcome = run_terminal(
            sink.clone(),
            stream,
            TerminalParams::default(),
            Arc::new(TerminalConfig::default()),
        )
        .await;

        assert_eq!(outcome.state, SessionState::Closed);
        assert_eq!(outcome.kind, None);
        assert_eq!(sink.texts(), vec!["错误: 未提供主机地址\r\n".to_string()]);
        assert_eq!(sink.closes(), 1);
    }

    #[tokio::test]
    async fn test_run_terminal_missing_password_for_remote() {
        let sink = TestSink::default();
        let (_input, stream) = unbounded::<Result<Message, std::io::Error>>();
        let params = TerminalParams {
            host: Some("10.0.0.2".to_string()),
            user: Some("root".to_string()),
            ..Default::default()
        };

        let outcome = run_terminal(
            sink.clone(),
            stream,
            params,
            Arc::new(TerminalConfig::default()),
        )
        .await;

        assert_eq!(outcome.state, SessionState::Closed);
        assert_eq!(sink.texts(), vec!["错误: 未提供密码\r\n".to_string()]);
    }

    #[tokio::test]
    async fn test_run_terminal_local_shell_exit() {
        let sink = TestSink::default();
        let (input, stream) = unbounded::<Result<Message, std::io::Error>>();
        let params = TerminalParams {
            host: Some("localhost".to_string()),
            ..Default::default()
        };
        input
            .unbounded_send(Ok(Message::Text("exit\n".to_string())))
            .unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            run_terminal(
                sink.clone(),
                stream,
                params,
                Arc::new(TerminalConfig::default()),
            ),
        )
        .await
        .expect("本地 shell 未退出");

        assert_eq!(outcome.kind, Some(SessionKind::Local));
        assert_eq!(outcome.state, SessionState::Closed);
        assert_eq!(outcome.closed_by, Some(PumpKind::Stdout));
        let texts = sink.texts();
        assert_eq!(texts[0], "正在启动本地终端 ...\r\n");
        assert!(texts[1].contains("成功连接到"));
        assert_eq!(sink.closes(), 1);
    }
}
