//! 帧内控制消息与输出编码
//!
//! 入站文本帧如果能解析成 `{"type":"resize","cols":..,"rows":..}`，
//! 就当作调整大小指令拦截，不会写进 shell。缺失的 `cols`/`rows` 取 0，
//! 多余字段忽略，超出 u16 范围则整帧按普通输入转发。

use serde::Deserialize;

/// 控制消息类型字段取值
pub const RESIZE_TYPE: &str = "resize";

/// 调整终端大小的控制消息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeMessage {
    pub cols: u16,
    pub rows: u16,
}

#[derive(Deserialize)]
struct RawControl {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    cols: u16,
    #[serde(default)]
    rows: u16,
}

impl ResizeMessage {
    /// 尝试把一帧文本解析为调整大小指令
    pub fn parse(frame: &str) -> Option<Self> {
        if !frame.trim_start().starts_with('{') {
            return None;
        }
        let raw: RawControl = serde_json::from_str(frame).ok()?;
        (raw.kind == RESIZE_TYPE).then_some(Self {
            cols: raw.cols,
            rows: raw.rows,
        })
    }
}

/// 把任意字节块切成合法 UTF-8 文本
///
/// 块尾不完整的多字节序列留到下一块再拼；真正非法的字节替换为 U+FFFD。
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn push(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut rest: &[u8] = &buf;
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + len..];
                        }
                        None => {
                            self.pending = rest[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// 流结束时残留的字节
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}
