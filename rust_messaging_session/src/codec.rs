// rust_messaging_session/src/codec.rs

//! 帧编解码器。
//!
//! 会话并不直接依赖某种线路格式，而是通过 [`FrameCodec`] 从外部注入编解码器。
//! 默认实现 [`StompCodec`] 处理 STOMP 1.2 文本帧：
//!
//! ```text
//! COMMAND\n
//! name:value\n
//! \n
//! body\0
//! ```
//!
//! 一条 WebSocket 文本消息中可以包含若干心跳 (单独的 `\n` 或 `\r\n`) 以及零到多个以 NUL 结尾的帧。

use log::trace;

use crate::error::SessionError;
use crate::frame::{Command, Frame};

/// 从线路上解码出的一个单元。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireItem {
    /// 心跳 (EOL)。
    Heartbeat,
    /// 完整的帧。
    Frame(Frame),
}

/// 帧编解码器。
pub trait FrameCodec: Send + Sync {
    /// 将帧编码为一条文本消息。
    fn encode(&self, frame: &Frame) -> String;

    /// 将一条文本消息解码为有序的心跳/帧序列。
    fn decode(&self, text: &str) -> Result<Vec<WireItem>, SessionError>;

    /// 心跳帧的文本形式。
    fn heartbeat(&self) -> String {
        "\n".to_string()
    }
}

/// STOMP 1.2 文本编解码器。
#[derive(Debug, Clone, Copy, Default)]
pub struct StompCodec;

impl FrameCodec for StompCodec {
    fn encode(&self, frame: &Frame) -> String {
        let escape = frame.command.escapes_headers();
        let mut out = String::with_capacity(frame.body.len() + 64);
        out.push_str(frame.command.as_str());
        out.push('\n');
        for (name, value) in &frame.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !frame.body.is_empty() && !frame.has_header("content-length") {
            out.push_str(&format!("content-length:{}\n", frame.body.len()));
        }
        out.push('\n');
        out.push_str(&frame.body);
        out.push('\0');
        out
    }

    fn decode(&self, text: &str) -> Result<Vec<WireItem>, SessionError> {
        let bytes = text.as_bytes();
        let mut items = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            if bytes[pos] == b'\n' {
                items.push(WireItem::Heartbeat);
                pos += 1;
                continue;
            }
            if bytes[pos] == b'\r' && bytes.get(pos + 1) == Some(&b'\n') {
                items.push(WireItem::Heartbeat);
                pos += 2;
                continue;
            }
            let (frame, next) = decode_frame(text, pos)?;
            trace!("[帧编解码] 解码得到帧: {}", frame);
            items.push(WireItem::Frame(frame));
            pos = next;
        }
        Ok(items)
    }
}

/// 从 `start` 处解码一帧，返回帧以及下一帧的起始偏移。
fn decode_frame(text: &str, start: usize) -> Result<(Frame, usize), SessionError> {
    let (command_line, mut pos) = read_line(text, start)
        .ok_or_else(|| SessionError::Decode("帧缺少命令行结束符".to_string()))?;
    let command: Command = command_line.parse()?;
    let escaped = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, next) = read_line(text, pos)
            .ok_or_else(|| SessionError::Decode(format!("{} 帧的头部没有以空行结束", command)))?;
        pos = next;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| SessionError::Decode(format!("头部缺少冒号分隔符: '{}'", line)))?;
        if escaped {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .map(|(_, value)| {
            value
                .trim()
                .parse::<usize>()
                .map_err(|e| {
                    SessionError::Decode(format!("content-length 无效 '{}': {}", value, e))
                })
        })
        .transpose()?;

    let (body, nul_at) = match content_length {
        Some(len) => {
            let end = pos
                .checked_add(len)
                .ok_or_else(|| {
                    SessionError::Decode(format!("content-length {} 超出了可表示的范围", len))
                })?;
            let body = text
                .get(pos..end)
                .ok_or_else(|| SessionError::Decode(format!("正文长度 {} 超出了帧边界", len)))?;
            if text.as_bytes().get(end) != Some(&0) {
                return Err(SessionError::Decode("content-length 之后缺少 NUL 终止符".to_string()));
            }
            (body, end)
        }
        None => {
            let nul_at = text[pos..]
                .find('\0')
                .map(|offset| pos + offset)
                .ok_or_else(|| SessionError::Decode("帧缺少 NUL 终止符".to_string()))?;
            (&text[pos..nul_at], nul_at)
        }
    };

    let frame = Frame {
        command,
        headers,
        body: body.to_string(),
    };
    Ok((frame, nul_at + 1))
}

/// 读取一行 (去掉结尾的 `\r`)，返回行内容与下一行的偏移。
fn read_line(text: &str, start: usize) -> Option<(&str, usize)> {
    let rest = text.get(start..)?;
    let newline = rest.find('\n')?;
    let line = rest[..newline].strip_suffix('\r').unwrap_or(&rest[..newline]);
    Some((line, start + newline + 1))
}

fn push_escaped(out: &mut String, raw: &str) {
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(raw: &str) -> Result<String, SessionError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(SessionError::Decode(format!(
                    "头部包含非法转义序列: \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}
