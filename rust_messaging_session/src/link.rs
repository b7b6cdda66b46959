// rust_messaging_session/src/link.rs

//! 传输链路：会话与底层 WebSocket 之间的通道化接口。
//!
//! 会话层只看到一对通道：向 [`TransportLink::outbound`] 写入 [`TransportCommand`]，
//! 从 [`TransportLink::inbound`] 读取 [`TransportEvent`]。真正的套接字由两个后台任务
//! (写任务与读任务) 驱动，这样会话层既不需要持有 WebSocket 流的所有权，
//! 测试中也可以用内存通道替换真实网络。

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as TungsteniteError;
use tokio_tungstenite::WebSocketStream;

/// 发往传输层的指令。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    /// 发送一条文本消息。
    Text(String),
    /// 发送 Close 控制帧并关闭连接。
    Close,
}

/// 传输层上报的事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// 收到一条文本消息。
    Text(String),
    /// 连接已关闭，可能附带对方给出的原因。
    Closed(Option<String>),
    /// 传输层发生错误，连接随后不可再用。
    Error(String),
}

/// 一条已打开的传输链路。
#[derive(Debug)]
pub struct TransportLink {
    /// 出站指令通道。
    pub outbound: mpsc::UnboundedSender<TransportCommand>,
    /// 入站事件通道。
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportLink {
    /// 用现成的通道端点组装链路。
    pub fn new(
        outbound: mpsc::UnboundedSender<TransportCommand>,
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// 把一个 WebSocket 流接管为链路，并启动读写两个后台任务。
    ///
    /// `label` 只用于日志，通常是对端地址或 URL。
    pub fn from_stream<S>(ws_stream: WebSocketStream<S>, label: String) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<TransportCommand>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<TransportEvent>();

        let writer_label = label.clone();
        tokio::spawn(async move {
            while let Some(command) = outbound_rx.recv().await {
                match command {
                    TransportCommand::Text(text) => {
                        if let Err(e) = ws_sender.send(Message::Text(text)).await {
                            warn!("[传输层] 向 {} 写入消息失败: {}", writer_label, e);
                            break;
                        }
                    }
                    TransportCommand::Close => {
                        debug!("[传输层] 正在关闭到 {} 的连接。", writer_label);
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            // 指令通道关闭 (会话放弃了链路) 时同样关闭底层连接。
            let _ = ws_sender.close().await;
            debug!("[传输层] {} 的写任务已退出。", writer_label);
        });

        tokio::spawn(async move {
            let final_event = loop {
                let event = match ws_receiver.next().await {
                    Some(Ok(Message::Text(text))) => TransportEvent::Text(text),
                    Some(Ok(Message::Binary(bin))) => match String::from_utf8(bin) {
                        Ok(text) => TransportEvent::Text(text),
                        Err(e) => {
                            warn!(
                                "[传输层] 从 {} 收到无法按 UTF-8 解析的二进制消息，已忽略: {}",
                                label, e
                            );
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(_)))
                    | Some(Ok(Message::Pong(_)))
                    | Some(Ok(Message::Frame(_))) => continue,
                    Some(Ok(Message::Close(close_frame))) => {
                        debug!("[传输层] {} 发来 Close 控制帧: {:?}", label, close_frame);
                        let reason = close_frame.map(|frame| frame.reason.to_string());
                        break TransportEvent::Closed(reason);
                    }
                    Some(Err(TungsteniteError::ConnectionClosed))
                    | Some(Err(TungsteniteError::AlreadyClosed))
                    | None => {
                        break TransportEvent::Closed(None);
                    }
                    Some(Err(e)) => {
                        error!("[传输层] 从 {} 读取消息时发生错误: {}", label, e);
                        break TransportEvent::Error(e.to_string());
                    }
                };
                if inbound_tx.send(event).is_err() {
                    debug!("[传输层] {} 的入站通道已无人接收，读任务退出。", label);
                    return;
                }
            };
            let _ = inbound_tx.send(final_event);
            debug!("[传输层] {} 的读任务已退出。", label);
        });

        Self {
            outbound: outbound_tx,
            inbound: inbound_rx,
        }
    }

    /// 创建一对相互连接的内存链路，常用于测试。
    ///
    /// 在一端写入的 `Text` 会作为另一端的 `TransportEvent::Text` 出现；
    /// 任一端发送 `Close` 后，另一端会收到 `Closed(None)`。
    pub fn pair() -> (TransportLink, TransportLink) {
        let (a_out_tx, a_out_rx) = mpsc::unbounded_channel();
        let (b_out_tx, b_out_rx) = mpsc::unbounded_channel();
        let (a_in_tx, a_in_rx) = mpsc::unbounded_channel();
        let (b_in_tx, b_in_rx) = mpsc::unbounded_channel();
        tokio::spawn(forward(a_out_rx, b_in_tx));
        tokio::spawn(forward(b_out_rx, a_in_tx));
        (TransportLink::new(a_out_tx, a_in_rx), TransportLink::new(b_out_tx, b_in_rx))
    }
}

async fn forward(
    mut commands: mpsc::UnboundedReceiver<TransportCommand>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            TransportCommand::Text(text) => {
                if events.send(TransportEvent::Text(text)).is_err() {
                    return;
                }
            }
            TransportCommand::Close => break,
        }
    }
    let _ = events.send(TransportEvent::Closed(None));
}
