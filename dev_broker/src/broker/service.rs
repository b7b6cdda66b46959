// dev_broker/src/broker/service.rs

//! 代理服务：接受 WebSocket 连接并处理 STOMP 帧。
//!
//! 每条连接在独立任务中运行。连接必须先发送 CONNECT (或 STOMP)，之后可以
//! SUBSCRIBE / UNSUBSCRIBE / SEND / DISCONNECT。`/app/<x>` 上的 SEND 会转发给
//! `/topic/<x>` 的订阅者，其他目的地按原样广播。无法解析或不受支持的帧
//! 会收到一个 ERROR 帧，随后连接被关闭。

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use rust_messaging_session::session::heartbeat::{format_heartbeat_header, parse_heartbeat_header};
use rust_messaging_session::{
    Command, Frame, FrameCodec, HeartbeatPolicy, ServerTransport, StompCodec, TransportEvent,
    TransportLink, WireItem,
};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use crate::broker::client_session::ClientSession;
use crate::broker::connection_manager::ConnectionManager;
use crate::config::BrokerConfig;
use crate::error::BrokerError;

/// CONNECTED 帧 `server` 头的值。
pub const SERVER_NAME: &str = concat!("dev_broker/", env!("CARGO_PKG_VERSION"));

const SUPPORTED_VERSIONS: [&str; 3] = ["1.2", "1.1", "1.0"];

/// 处理完一批帧后连接的去向。
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    /// 握手完成，附带代理向客户端发送心跳的周期。
    Connected(Option<Duration>),
    Close,
}

pub struct BrokerService {
    config: BrokerConfig,
    connection_manager: Arc<ConnectionManager>,
    message_counter: AtomicU64,
}

impl BrokerService {
    pub fn new(config: BrokerConfig, connection_manager: Arc<ConnectionManager>) -> Self {
        Self {
            config,
            connection_manager,
            message_counter: AtomicU64::new(0),
        }
    }

    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.connection_manager
    }

    /// 绑定配置中的地址并在当前任务中持续服务。
    pub async fn start(self: Arc<Self>) -> Result<(), BrokerError> {
        let listen_addr = self.config.bind_addr();
        let transport = ServerTransport::bind(&listen_addr).await?;
        info!("[代理服务] STOMP 开发代理正在 ws://{}/ 上监听。", transport.local_addr());
        transport
            .run(move |link, addr| Arc::clone(&self).handle_connection(link, addr))
            .await;
        warn!("[代理服务] 监听循环意外结束。");
        Ok(())
    }

    /// 绑定后在后台任务中服务，返回实际监听地址。端口配置为 0 时可用于测试。
    pub async fn spawn(self: Arc<Self>) -> Result<(SocketAddr, JoinHandle<()>), BrokerError> {
        let transport = ServerTransport::bind(&self.config.bind_addr()).await?;
        let local_addr = transport.local_addr();
        info!("[代理服务] STOMP 开发代理已在后台启动，监听 {}。", local_addr);
        let handle = tokio::spawn(async move {
            transport
                .run(move |link, addr| Arc::clone(&self).handle_connection(link, addr))
                .await;
        });
        Ok((local_addr, handle))
    }

    /// 服务一条连接直到它关闭。
    pub async fn handle_connection(self: Arc<Self>, link: TransportLink, addr: SocketAddr) {
        let TransportLink { outbound, mut inbound } = link;
        let session = self.connection_manager.add_client(addr, outbound);
        let mut heartbeat_task: Option<JoinHandle<()>> = None;

        while let Some(event) = inbound.recv().await {
            match event {
                TransportEvent::Text(text) => {
                    session.touch().await;
                    match self.handle_text(&session, &text) {
                        Ok(Flow::Continue) | Ok(Flow::Connected(None)) => {}
                        Ok(Flow::Connected(Some(period))) => {
                            heartbeat_task = Some(spawn_heartbeat(Arc::clone(&session), period));
                        }
                        Ok(Flow::Close) => {
                            info!("[代理服务] 客户端 {} 请求断开连接。", session.client_id);
                            break;
                        }
                        Err(e) => {
                            warn!(
                                "[代理服务] 客户端 {} 违反协议: {}。发送 ERROR 帧并关闭连接。",
                                session.client_id, e
                            );
                            session.send_frame(&error_frame(&e));
                            break;
                        }
                    }
                }
                TransportEvent::Closed(reason) => {
                    info!(
                        "[代理服务] 客户端 {} 关闭了连接 (原因: {:?})。",
                        session.client_id, reason
                    );
                    break;
                }
                TransportEvent::Error(e) => {
                    error!("[代理服务] 客户端 {} 的传输层错误: {}", session.client_id, e);
                    break;
                }
            }
        }

        if let Some(task) = heartbeat_task {
            task.abort();
        }
        self.connection_manager.remove_client(&session.client_id);
    }

    fn handle_text(&self, session: &ClientSession, text: &str) -> Result<Flow, BrokerError> {
        let items = StompCodec
            .decode(text)
            .map_err(|e| BrokerError::Protocol(format!("无法解析的帧: {}", e)))?;
        let mut flow = Flow::Continue;
        for item in items {
            match item {
                WireItem::Heartbeat => {
                    trace!("[代理服务] 收到客户端 {} 的心跳。", session.client_id);
                }
                WireItem::Frame(frame) => match self.handle_frame(session, frame)? {
                    Flow::Close => return Ok(Flow::Close),
                    Flow::Continue => {}
                    connected => flow = connected,
                },
            }
        }
        Ok(flow)
    }

    fn handle_frame(&self, session: &ClientSession, frame: Frame) -> Result<Flow, BrokerError> {
        debug!("[代理服务] 客户端 {} 发来 {}", session.client_id, frame);
        match frame.command {
            Command::Connect | Command::Stomp => return self.handle_connect(session, &frame),
            _ if !session.is_stomp_connected() => {
                return Err(BrokerError::Protocol(format!(
                    "在 CONNECT 之前收到了 {} 帧",
                    frame.command
                )));
            }
            Command::Subscribe => {
                let id = required_header(&frame, "id")?;
                let destination = required_header(&frame, "destination")?;
                self.connection_manager.subscribe(session.client_id, id, destination);
            }
            Command::Unsubscribe => {
                let id = required_header(&frame, "id")?;
                if !self.connection_manager.unsubscribe(&session.client_id, id) {
                    debug!("[代理服务] 客户端 {} 取消了不存在的订阅 {}", session.client_id, id);
                }
            }
            Command::Send => {
                let destination = required_header(&frame, "destination")?;
                let delivered = self.relay(destination, &frame);
                debug!("[代理服务] SEND {} 投递给了 {} 个订阅者。", destination, delivered);
            }
            Command::Disconnect => {
                send_receipt(session, &frame);
                return Ok(Flow::Close);
            }
            other => {
                return Err(BrokerError::Protocol(format!("不支持的帧命令: {}", other)));
            }
        }
        send_receipt(session, &frame);
        Ok(Flow::Continue)
    }

    fn handle_connect(&self, session: &ClientSession, frame: &Frame) -> Result<Flow, BrokerError> {
        if !session.mark_stomp_connected() {
            return Err(BrokerError::Protocol("重复的 CONNECT 帧".to_string()));
        }
        let version = negotiate_version(frame.header("accept-version"))?;
        let client_heartbeat = match frame.header("heart-beat") {
            Some(value) => {
                parse_heartbeat_header(value).map_err(|e| BrokerError::Protocol(e.to_string()))?
            }
            None => (0, 0),
        };
        let policy = HeartbeatPolicy::negotiate(
            (self.config.heartbeat_send_ms, self.config.heartbeat_expect_ms),
            client_heartbeat,
        );

        let connected = Frame::new(Command::Connected)
            .with_header("version", version)
            .with_header(
                "heart-beat",
                format_heartbeat_header(
                    self.config.heartbeat_send_ms,
                    self.config.heartbeat_expect_ms,
                ),
            )
            .with_header("server", SERVER_NAME)
            .with_header("session", session.client_id.to_string());
        session.send_frame(&connected);
        info!(
            "[代理服务] 客户端 {} 完成握手 (版本: {}，心跳: {:?})",
            session.client_id, version, policy
        );
        Ok(Flow::Connected(policy.outgoing))
    }

    /// 把一帧 SEND 转发给目标目的地的全部订阅者，返回投递数量。
    fn relay(&self, destination: &str, frame: &Frame) -> usize {
        let target = self.config.route_destination(destination);
        let subscribers = self.connection_manager.subscribers(&target);
        let mut delivered = 0;
        for (subscriber, subscription_id) in subscribers {
            let message_id = self.message_counter.fetch_add(1, Ordering::SeqCst) + 1;
            let mut message = Frame::new(Command::Message)
                .with_header("destination", target.as_str())
                .with_header("subscription", subscription_id)
                .with_header("message-id", format!("{}-{}", subscriber.client_id, message_id));
            if let Some(content_type) = frame.header("content-type") {
                message = message.with_header("content-type", content_type);
            }
            message = message.with_body(frame.body.as_str());
            if subscriber.send_frame(&message) {
                delivered += 1;
            }
        }
        delivered
    }
}

fn required_header<'a>(frame: &'a Frame, name: &str) -> Result<&'a str, BrokerError> {
    frame
        .header(name)
        .ok_or_else(|| {
            BrokerError::Protocol(format!("{} 帧缺少必需的 {} 头部", frame.command, name))
        })
}

fn negotiate_version(accept_version: Option<&str>) -> Result<&'static str, BrokerError> {
    let Some(accepted) = accept_version else {
        return Ok("1.0");
    };
    let offered: Vec<&str> = accepted.split(',').map(str::trim).collect();
    SUPPORTED_VERSIONS
        .into_iter()
        .find(|version| offered.contains(version))
        .ok_or_else(|| BrokerError::Protocol(format!("不支持的协议版本: {}", accepted)))
}

fn send_receipt(session: &ClientSession, frame: &Frame) {
    if let Some(receipt) = frame.header("receipt") {
        session.send_frame(&Frame::new(Command::Receipt).with_header("receipt-id", receipt));
    }
}

fn error_frame(err: &BrokerError) -> Frame {
    Frame::new(Command::Error)
        .with_header("message", err.to_string())
        .with_header("content-type", "text/plain")
        .with_body(err.to_string())
}

/// 按协商周期向客户端发送心跳，直到连接关闭或任务被取消。
fn spawn_heartbeat(session: Arc<ClientSession>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            if !session.send_heartbeat() {
                debug!("[代理服务] 客户端 {} 的连接已关闭，停止发送心跳。", session.client_id);
                break;
            }
        }
    })
}
