//! 终端会话状态
//!
//! `Connecting → Established → Running → Closing → Closed`，
//! 解析/拨号/启动失败时从 `Connecting` 直接进入 `Closed`。

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// 正在解析参数 / 拨号 / 启动进程
    Connecting,
    /// 进程或通道已就绪
    Established,
    /// 三路泵运行中
    Running,
    /// 正在释放资源
    Closing,
    /// 已结束
    Closed,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Connecting
    }
}

/// 会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Local,
    Remote,
}

/// 单个会话的状态单元，只允许向前推进
#[derive(Debug)]
pub struct SessionStateCell {
    session_id: String,
    state: Mutex<SessionState>,
}

impl SessionStateCell {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: Mutex::new(SessionState::Connecting),
        }
    }

    pub fn get(&self) -> SessionState {
        *self.state.lock()
    }

    /// 推进状态；回退请求会被忽略并返回 false
    pub fn advance(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        if next <= *state {
            return false;
        }
        tracing::debug!(
            "[终端] 会话 {} 状态 {:?} -> {:?}",
            self.session_id,
            *state,
            next
        );
        *state = next;
        true
    }
}
