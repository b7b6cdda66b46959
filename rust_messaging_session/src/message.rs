// rust_messaging_session/src/message.rs

//! 定义投递给订阅回调的入站消息结构。
//!
//! 分发器会尝试把 MESSAGE 帧正文解析为 JSON；解析失败时保留原始文本，
//! 因此回调总能拿到消息，不会因为正文格式不规范而丢失。

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::SessionError;

/// 入站消息正文。
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    /// 成功解析的 JSON 值。
    Json(Value),
    /// 无法解析为 JSON 时的原始文本。
    Raw(String),
}

impl MessageBody {
    /// 尝试把正文解析为 JSON，失败时退回原始文本。
    pub fn decode(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => MessageBody::Json(value),
            Err(_) => MessageBody::Raw(raw.to_string()),
        }
    }

    /// 是否为 JSON 正文。
    pub fn is_json(&self) -> bool {
        matches!(self, MessageBody::Json(_))
    }
}

/// 投递给订阅回调的一条消息。
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// 消息所属的目的地 (主题)。
    pub destination: String,
    /// MESSAGE 帧的全部头部。
    pub headers: Vec<(String, String)>,
    /// 解码后的正文。
    pub body: MessageBody,
    /// 客户端收到此消息的时间 (UTC)。
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// 返回指定名称的第一个头部值。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// 将 JSON 正文反序列化为目标类型 `T`。
    ///
    /// 原始文本正文同样会再尝试一次解析，以便把错误信息带回给调用方。
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        match &self.body {
            MessageBody::Json(value) => serde_json::from_value(value.clone()).map_err(|e| {
                SessionError::Decode(format!(
                    "消息正文反序列化为目标类型失败: {}, 目的地: '{}'",
                    e, self.destination
                ))
            }),
            MessageBody::Raw(text) => serde_json::from_str(text).map_err(|e| {
                SessionError::Decode(format!("消息正文不是 JSON: {}, 原始正文: '{}'", e, text))
            }),
        }
    }

    /// 以文本形式返回正文；JSON 正文会被重新序列化。
    pub fn text(&self) -> String {
        match &self.body {
            MessageBody::Json(value) => value.to_string(),
            MessageBody::Raw(text) => text.clone(),
        }
    }
}
