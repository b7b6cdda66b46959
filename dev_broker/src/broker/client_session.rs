// dev_broker/src/broker/client_session.rs

//! 单个客户端连接的会话状态。

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_messaging_session::{FrameCodec, Frame, StompCodec, TransportCommand};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// 代理为每条 WebSocket 连接维护的会话。
#[derive(Debug)]
pub struct ClientSession {
    /// 代理分配的会话 ID，同时写入 CONNECTED 帧的 `session` 头。
    pub client_id: Uuid,
    /// 客户端地址。
    pub addr: SocketAddr,
    /// 向该连接写出数据的通道。
    pub sender: mpsc::UnboundedSender<TransportCommand>,
    /// 连接建立时间。
    pub creation_time: DateTime<Utc>,
    /// 最近一次收到该客户端任何数据 (帧或心跳) 的时间。
    pub last_seen: Arc<RwLock<DateTime<Utc>>>,
    /// 是否已完成 STOMP CONNECT 握手。
    stomp_connected: AtomicBool,
}

impl ClientSession {
    pub fn new(
        client_id: Uuid,
        sender: mpsc::UnboundedSender<TransportCommand>,
        addr: SocketAddr,
    ) -> Self {
        let now = Utc::now();
        Self {
            client_id,
            addr,
            sender,
            creation_time: now,
            last_seen: Arc::new(RwLock::new(now)),
            stomp_connected: AtomicBool::new(false),
        }
    }

    /// 刷新最近活跃时间。
    pub async fn touch(&self) {
        *self.last_seen.write().await = Utc::now();
    }

    pub fn is_stomp_connected(&self) -> bool {
        self.stomp_connected.load(Ordering::SeqCst)
    }

    /// 标记握手完成。已经完成过握手时返回 `false`。
    pub fn mark_stomp_connected(&self) -> bool {
        !self.stomp_connected.swap(true, Ordering::SeqCst)
    }

    /// 编码并发送一帧。连接已关闭时返回 `false`。
    pub fn send_frame(&self, frame: &Frame) -> bool {
        self.sender.send(TransportCommand::Text(StompCodec.encode(frame))).is_ok()
    }

    /// 发送一次心跳 (单个换行)。
    pub fn send_heartbeat(&self) -> bool {
        self.sender.send(TransportCommand::Text(StompCodec.heartbeat())).is_ok()
    }

    /// 请求关闭底层连接。
    pub fn close(&self) {
        let _ = self.sender.send(TransportCommand::Close);
    }
}
