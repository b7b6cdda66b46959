// rust_messaging_session/tests/common/mod.rs

//! 集成测试共用的内存传输与模拟代理。
//!
//! [`MockFactory`] 按脚本决定每次 `open` 的结果：拒绝连接、永远挂起、返回畸形问候，
//! 或者接入 [`MockBroker`]。模拟代理理解 CONNECT / SUBSCRIBE / UNSUBSCRIBE / SEND /
//! DISCONNECT，会把 `/app/<x>` 上的 SEND 转发到 `/topic/<x>`，并记录收到的全部帧。

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::LevelFilter;
use rust_messaging_session::{
    Command, Frame, FrameCodec, SessionConfig, SessionError, StompCodec, TransportCommand,
    TransportEvent, TransportFactory, TransportLink, WireItem,
};
use url::Url;

pub const MOCK_URL: &str = "ws://mock.broker/ws";

pub fn init_test_logger() {
    let _ = env_logger::builder().filter_level(LevelFilter::Debug).is_test(true).try_init();
}

/// 测试用的快速配置：短延迟、关闭心跳、最多 3 次尝试。
pub fn fast_config() -> SessionConfig {
    SessionConfig::new(MOCK_URL)
        .with_connect_timeout(Duration::from_millis(300))
        .with_reconnect_delay(Duration::from_millis(20))
        .with_heartbeat(Duration::ZERO, Duration::ZERO)
        .with_max_reconnect_attempts(3)
}

/// 轮询等待条件成立，超时返回 `false`。
pub async fn wait_until<F: Fn() -> bool>(condition: F, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// 对单个 future 施加统一的测试超时。
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("测试步骤在 5 秒内未完成")
}

/// 单次 `open` 的脚本。
#[derive(Debug, Clone)]
pub enum Plan {
    /// 连接被拒绝 (可重试的传输错误)。
    Refuse,
    /// 永远不返回，用于触发连接超时。
    Hang,
    /// 接入模拟代理。
    Accept,
    /// 对 CONNECT 回复给定的原始文本。
    Greeting(String),
}

pub struct MockFactory {
    plans: Mutex<VecDeque<Plan>>,
    fallback: Plan,
    opens: AtomicUsize,
    pub broker: MockBroker,
}

impl MockFactory {
    /// 所有连接都接入模拟代理。
    pub fn accepting() -> Arc<Self> {
        Self::scripted(Vec::new(), Plan::Accept)
    }

    /// 按顺序执行 `plans`，用完后一律执行 `fallback`。
    pub fn scripted(plans: Vec<Plan>, fallback: Plan) -> Arc<Self> {
        Arc::new(Self {
            plans: Mutex::new(plans.into()),
            fallback,
            opens: AtomicUsize::new(0),
            broker: MockBroker::default(),
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn open(&self, _url: &Url) -> Result<TransportLink, SessionError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let plan = self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match plan {
            Plan::Refuse => Err(SessionError::Transport("连接被拒绝".to_string())),
            Plan::Hang => {
                std::future::pending::<()>().await;
                Err(SessionError::Transport("不可达".to_string()))
            }
            Plan::Accept => {
                let (client, server) = TransportLink::pair();
                tokio::spawn(run_broker_connection(server, self.broker.clone()));
                Ok(client)
            }
            Plan::Greeting(text) => {
                let (client, mut server) = TransportLink::pair();
                tokio::spawn(async move {
                    if let Some(TransportEvent::Text(_connect)) = server.inbound.recv().await {
                        let _ = server.outbound.send(TransportCommand::Text(text));
                    }
                    // 保持链路直到客户端关闭。
                    while server.inbound.recv().await.is_some() {}
                });
                Ok(client)
            }
        }
    }
}

#[derive(Default)]
struct BrokerState {
    frames: Vec<Frame>,
    subscriptions: Vec<(String, String)>,
    connection: Option<tokio::sync::mpsc::UnboundedSender<TransportCommand>>,
    connections: usize,
    closes: usize,
    heartbeats: usize,
    heartbeat: (u64, u64),
    next_message_id: u64,
}

/// 模拟代理的共享状态。
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MockBroker {
    /// CONNECTED 帧中回复的 `heart-beat` 值。
    pub fn set_heartbeat(&self, send_ms: u64, expect_ms: u64) {
        self.state.lock().unwrap().heartbeat = (send_ms, expect_ms);
    }

    /// 收到的全部帧 (按到达顺序)。
    pub fn frames(&self) -> Vec<Frame> {
        self.state.lock().unwrap().frames.clone()
    }

    pub fn frames_of(&self, command: Command) -> Vec<Frame> {
        self.frames().into_iter().filter(|frame| frame.command == command).collect()
    }

    /// 当前连接上的 (订阅 ID, 目的地) 列表，按订阅顺序。
    pub fn subscriptions(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().subscriptions.clone()
    }

    pub fn subscribed_destinations(&self) -> Vec<String> {
        self.subscriptions().into_iter().map(|(_, destination)| destination).collect()
    }

    /// 完成握手的连接数。
    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    /// 观察到的连接关闭次数。
    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn heartbeats(&self) -> usize {
        self.state.lock().unwrap().heartbeats
    }

    /// 客户端对代理产生的全部操作数 (帧、心跳、关闭)。
    pub fn operations(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.frames.len() + state.heartbeats + state.closes
    }

    /// 向当前连接推送一条 MESSAGE；`subscription` 缺省时按目的地查找订阅 ID。
    pub fn publish(&self, destination: &str, subscription: Option<&str>, body: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        let subscription = subscription.map(str::to_string).or_else(|| {
            state
                .subscriptions
                .iter()
                .find(|(_, dest)| dest == destination)
                .map(|(id, _)| id.clone())
        });
        state.next_message_id += 1;
        let mut frame = Frame::new(Command::Message)
            .with_header("destination", destination)
            .with_header("message-id", format!("msg-{}", state.next_message_id))
            .with_body(body);
        if let Some(id) = subscription {
            frame = frame.with_header("subscription", id);
        }
        match state.connection.as_ref() {
            Some(connection) => connection
                .send(TransportCommand::Text(StompCodec.encode(&frame)))
                .is_ok(),
            None => false,
        }
    }

    /// 向当前连接发送任意原始文本。
    pub fn send_raw(&self, text: &str) -> bool {
        let state = self.state.lock().unwrap();
        match state.connection.as_ref() {
            Some(connection) => connection.send(TransportCommand::Text(text.to_string())).is_ok(),
            None => false,
        }
    }

    /// 模拟传输中断：代理侧关闭当前连接。
    pub fn sever(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.subscriptions.clear();
        match state.connection.take() {
            Some(connection) => connection.send(TransportCommand::Close).is_ok(),
            None => false,
        }
    }

    fn handle(
        &self,
        frame: Frame,
        outbound: &tokio::sync::mpsc::UnboundedSender<TransportCommand>,
    ) {
        let mut state = self.state.lock().unwrap();
        state.frames.push(frame.clone());
        match frame.command {
            Command::Connect | Command::Stomp => {
                state.connections += 1;
                state.subscriptions.clear();
                state.connection = Some(outbound.clone());
                let (sx, sy) = state.heartbeat;
                let connected = Frame::new(Command::Connected)
                    .with_header("version", "1.2")
                    .with_header("heart-beat", format!("{},{}", sx, sy));
                let _ = outbound.send(TransportCommand::Text(StompCodec.encode(&connected)));
            }
            Command::Subscribe => {
                if let (Some(id), Some(destination)) = (frame.header("id"), frame.destination()) {
                    state.subscriptions.push((id.to_string(), destination.to_string()));
                }
            }
            Command::Unsubscribe => {
                if let Some(id) = frame.header("id") {
                    state.subscriptions.retain(|(existing, _)| existing != id);
                }
            }
            Command::Send => {
                let Some(destination) = frame.destination() else {
                    return;
                };
                let target = match destination.strip_prefix("/app/") {
                    Some(action) => format!("/topic/{}", action),
                    None => destination.to_string(),
                };
                let targets: Vec<String> = state
                    .subscriptions
                    .iter()
                    .filter(|(_, dest)| *dest == target)
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in targets {
                    state.next_message_id += 1;
                    let mut message = Frame::new(Command::Message)
                        .with_header("destination", target.as_str())
                        .with_header("subscription", id)
                        .with_header("message-id", format!("msg-{}", state.next_message_id))
                        .with_body(frame.body.as_str());
                    if let Some(content_type) = frame.header("content-type") {
                        message = message.with_header("content-type", content_type);
                    }
                    let _ = outbound.send(TransportCommand::Text(StompCodec.encode(&message)));
                }
            }
            _ => {}
        }
    }
}

async fn run_broker_connection(mut link: TransportLink, broker: MockBroker) {
    while let Some(event) = link.inbound.recv().await {
        match event {
            TransportEvent::Text(text) => {
                let Ok(items) = StompCodec.decode(&text) else {
                    continue;
                };
                for item in items {
                    match item {
                        WireItem::Heartbeat => broker.state.lock().unwrap().heartbeats += 1,
                        WireItem::Frame(frame) => broker.handle(frame, &link.outbound),
                    }
                }
            }
            TransportEvent::Closed(_) | TransportEvent::Error(_) => {
                broker.state.lock().unwrap().closes += 1;
                break;
            }
        }
    }
}
