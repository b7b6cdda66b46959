// rust_messaging_session/src/frame.rs

//! 定义在传输层上交换的 STOMP 帧结构。
//!
//! 每一帧由命令、有序的头部列表和正文组成。正文以 UTF-8 文本承载，
//! 业务负载通常是 JSON，但也可能是普通文本。编码与解码见 [`crate::codec`]。

use std::fmt;
use std::str::FromStr;

use crate::error::SessionError;

/// STOMP 1.2 帧命令。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    /// 返回命令在线路上的大写形式。
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// CONNECT / STOMP / CONNECTED 帧的头部不做转义。
    pub fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(SessionError::Decode(format!("未知的帧命令: '{}'", other))),
        };
        Ok(command)
    }
}

/// 一个完整的 STOMP 帧。
///
/// 头部按出现顺序保存；根据 STOMP 1.2，同名头部以第一次出现的值为准，
/// [`Frame::header`] 遵循这一规则。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// 帧命令。
    pub command: Command,
    /// 有序的 (名称, 值) 头部列表。
    pub headers: Vec<(String, String)>,
    /// 帧正文。
    pub body: String,
}

impl Frame {
    /// 创建一个没有头部和正文的帧。
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// 追加一个头部。
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// 设置正文。
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// 返回指定名称的第一个头部值。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// 是否存在指定名称的头部。
    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// `destination` 头部。
    pub fn destination(&self) -> Option<&str> {
        self.header("destination")
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)?;
        if let Some(destination) = self.destination() {
            write!(f, " -> {}", destination)?;
        }
        write!(f, " (正文 {} 字节)", self.body.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_round_trips_through_text() {
        for command in [Command::Connect, Command::Send, Command::Message, Command::Error] {
            assert_eq!(command.as_str().parse::<Command>().unwrap(), command);
        }
        assert!(matches!("PUBLISH".parse::<Command>(), Err(SessionError::Decode(_))));
        assert!("send".parse::<Command>().is_err(), "命令区分大小写");
    }

    #[test]
    fn test_header_lookup_returns_first_occurrence() {
        let frame = Frame::new(Command::Message)
            .with_header("destination", "/topic/chat")
            .with_header("destination", "/topic/other")
            .with_body("hi");
        assert_eq!(frame.destination(), Some("/topic/chat"));
        assert!(frame.has_header("destination"));
        assert!(!frame.has_header("subscription"));
    }

    #[test]
    fn test_display_summarises_frame() {
        let frame = Frame::new(Command::Send)
            .with_header("destination", "/app/chat")
            .with_body("hello");
        let text = frame.to_string();
        assert!(text.contains("SEND"));
        assert!(text.contains("/app/chat"));
        assert!(text.contains("5 字节"));
    }
}
