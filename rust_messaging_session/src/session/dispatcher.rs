// rust_messaging_session/src/session/dispatcher.rs

//! 帧分发器。
//!
//! 分发分两步：先在会话锁内根据帧头部查到回调并构造 [`InboundMessage`]，
//! 再在锁外调用回调。回调因此可以安全地回调会话 API (例如在回调中退订)。

use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::Utc;
use log::{debug, error, warn};

use crate::frame::{Command, Frame};
use crate::message::{InboundMessage, MessageBody};
use crate::session::registry::{MessageHandler, SubscriptionRegistry};

/// 一次待执行的投递。
pub(crate) struct Delivery {
    pub(crate) topic: String,
    pub(crate) handler: MessageHandler,
    pub(crate) message: InboundMessage,
}

/// 为一个 MESSAGE 帧查找回调。
///
/// 找不到订阅时 (服务器推送与客户端退订之间的竞态) 丢弃帧并记录日志。
pub(crate) fn route(registry: &SubscriptionRegistry, frame: Frame) -> Option<Delivery> {
    if frame.command != Command::Message {
        debug!("[帧分发器] 非 MESSAGE 帧不参与分发: {}", frame);
        return None;
    }
    let Some(record) = registry.lookup(frame.destination(), frame.header("subscription")) else {
        warn!(
            "[帧分发器] 没有匹配的订阅，丢弃帧: {} (subscription: {:?})",
            frame,
            frame.header("subscription")
        );
        return None;
    };
    let destination = frame.destination().unwrap_or(record.topic.as_str()).to_string();
    let body = MessageBody::decode(&frame.body);
    if let MessageBody::Raw(_) = body {
        debug!("[帧分发器] {} 的正文不是 JSON，按原始文本投递。", destination);
    }
    Some(Delivery {
        topic: record.topic.clone(),
        handler: record.handler.clone(),
        message: InboundMessage {
            destination,
            headers: frame.headers,
            body,
            received_at: Utc::now(),
        },
    })
}

/// 调用回调，回调中的 panic 被捕获并记录，不会中断后续分发。
pub(crate) fn deliver(delivery: Delivery) {
    let Delivery { topic, handler, message } = delivery;
    if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
        error!("[帧分发器] 主题 {} 的回调发生 panic，已忽略并继续分发。", topic);
    }
}
