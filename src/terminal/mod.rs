//! 终端桥接模块
//!
//! 把一条 WebSocket 连接接到本机 PTY 或远程 SSH shell 上。
//!
//! ## 模块结构
//! - `error` - 错误类型与 SSH 拨号错误分类
//! - `events` - 会话状态
//! - `request` - 连接目标解析
//! - `control` - resize 控制消息与输出 UTF-8 切分
//! - `session` - 会话后端抽象
//! - `local` - 本地 PTY 会话
//! - `remote` - 远程 SSH 会话
//! - `bridge` - 三路 I/O 泵与会话清理
//!
//! ## 使用示例
//! ```ignore
//! use gegecp_lib::terminal::{run_terminal, TerminalParams};
//!
//! let (sink, stream) = socket.split();
//! let outcome = run_terminal(sink, stream, params, settings).await;
//! ```

pub mod bridge;
pub mod control;
pub mod error;
pub mod events;
pub mod local;
pub mod remote;
pub mod request;
pub mod session;


// 重新导出常用类型
pub use bridge::{run_terminal, PumpKind, SessionOutcome, SocketWriter};
pub use control::{ResizeMessage, Utf8Carry};
pub use error::{DialError, DialErrorKind, DialFailure, TerminalError};
pub use events::{SessionKind, SessionState, SessionStateCell};
pub use request::{ConnectionRequest, Credential, SessionTarget, TerminalParams};
pub use session::{OpenedSession, OutputStream, StreamKind, TerminalBackend};
