// common_models/src/ws_payloads.rs

//! 包含实时消息通道中使用的各种 Payload 结构体定义。
//!
//! 这些结构体由页面发布到 `/app/<action>` 目的地，或由服务端推送到 `/topic/...` 主题。
//! 字段统一使用 camelCase 序列化，以便与浏览器端的 JSON 约定保持一致。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// EchoPayload 是一个简单的负载，用于联调消息通道。
/// 它包含一个字符串内容，期望被代理原样回显到对应主题。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EchoPayload {
    /// 需要回显的内容。
    pub content: String,
}

/// 推送到 `/topic/reminders/{userId}` 的学习提醒。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPayload {
    /// 接收提醒的用户 ID。
    pub user_id: String,
    /// 提醒标题，例如 "今日单词卡片复习"。
    pub title: String,
    /// 提醒正文，可选。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// 提醒触发时间 (UTC)。
    pub remind_at: DateTime<Utc>,
}

/// 聊天室消息，客户端发布到 `/app/chat`，经代理广播到 `/topic/chat`。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    /// 消息唯一标识 (UUID v4)。
    pub message_id: Uuid,
    /// 发送者显示名称。
    pub sender: String,
    /// 消息正文。
    pub content: String,
    /// 发送时间 (UTC)。
    pub sent_at: DateTime<Utc>,
}

impl ChatMessagePayload {
    /// 创建一条新的聊天消息，自动生成消息 ID 与发送时间。
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            sender: sender.into(),
            content: content.into(),
            sent_at: Utc::now(),
        }
    }
}

/// 邮箱确认结果，推送到 `/topic/email-confirmation/{userId}`。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailConfirmationPayload {
    /// 被确认的邮箱地址。
    pub email: String,
    /// 是否确认成功。
    pub confirmed: bool,
}
