// rust_messaging_session/src/session/publisher.rs

//! 出站帧的构造与发送。
//!
//! 应用消息只在 CONNECTED 状态下发送，其他状态立即返回 `NotConnected`，不做排队。

use log::debug;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

use crate::codec::FrameCodec;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::frame::{Command, Frame};
use crate::link::TransportCommand;
use crate::session::heartbeat::format_heartbeat_header;
use crate::session::{ConnectionState, SessionCore};

pub(crate) const CONTENT_TYPE_JSON: &str = "application/json";
pub(crate) const CONTENT_TYPE_TEXT: &str = "text/plain";
const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// 构造 CONNECT 帧。
pub(crate) fn connect_frame(config: &SessionConfig, url: &Url) -> Frame {
    let host = config
        .host
        .clone()
        .or_else(|| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string());
    let mut frame = Frame::new(Command::Connect)
        .with_header("accept-version", ACCEPT_VERSION)
        .with_header("host", host)
        .with_header(
            "heart-beat",
            format_heartbeat_header(config.heartbeat_outgoing_ms, config.heartbeat_incoming_ms),
        );
    if let Some(login) = &config.login {
        frame = frame.with_header("login", login.as_str());
    }
    if let Some(passcode) = &config.passcode {
        frame = frame.with_header("passcode", passcode.as_str());
    }
    for (name, value) in &config.connect_headers {
        frame = frame.with_header(name.as_str(), value.as_str());
    }
    frame
}

pub(crate) fn subscribe_frame(id: &str, topic: &str) -> Frame {
    Frame::new(Command::Subscribe)
        .with_header("id", id)
        .with_header("destination", topic)
        .with_header("ack", "auto")
}

pub(crate) fn unsubscribe_frame(id: &str) -> Frame {
    Frame::new(Command::Unsubscribe).with_header("id", id)
}

pub(crate) fn disconnect_frame() -> Frame {
    Frame::new(Command::Disconnect)
}

/// 把负载序列化为 JSON 并构造 SEND 帧。
pub(crate) fn json_send_frame<T: Serialize + ?Sized>(
    destination: &str,
    payload: &T,
) -> Result<Frame, SessionError> {
    let body = serde_json::to_string(payload)
        .map_err(|e| SessionError::Serialization(format!("负载序列化为JSON失败: {}", e)))?;
    Ok(Frame::new(Command::Send)
        .with_header("destination", destination)
        .with_header("content-type", CONTENT_TYPE_JSON)
        .with_body(body))
}

pub(crate) fn text_send_frame(destination: &str, text: &str) -> Frame {
    Frame::new(Command::Send)
        .with_header("destination", destination)
        .with_header("content-type", CONTENT_TYPE_TEXT)
        .with_body(text)
}

/// 通过链路发送一帧，不检查会话状态。
pub(crate) fn push_frame(
    link: &UnboundedSender<TransportCommand>,
    codec: &dyn FrameCodec,
    frame: &Frame,
) -> Result<(), SessionError> {
    debug!("[消息发布器] 发送帧: {}", frame);
    link.send(TransportCommand::Text(codec.encode(frame)))
        .map_err(|_| SessionError::Transport("传输链路已关闭，帧未发送".to_string()))
}

/// 发送应用消息；只有 CONNECTED 状态允许发送。
pub(crate) fn publish(
    core: &SessionCore,
    codec: &dyn FrameCodec,
    frame: &Frame,
) -> Result<(), SessionError> {
    if core.state != ConnectionState::Connected {
        return Err(SessionError::NotConnected);
    }
    let link = core.link.as_ref().ok_or(SessionError::NotConnected)?;
    push_frame(link, codec, frame)
}
