// rust_messaging_session/src/session/mod.rs

//! 消息会话。
//!
//! [`Session`] 在一条传输连接上复用多个主题订阅，对外提供
//! `connect` / `subscribe` / `unsubscribe` / `send` / `disconnect`。
//!
//! 内部结构：
//! - `lifecycle`：后台驱动任务，负责握手、心跳、重连与终止。
//! - `registry`：主题订阅注册表。
//! - `dispatcher`：把 MESSAGE 帧路由到回调。
//! - `publisher`：出站帧的构造与发送。
//! - `shared`：引用计数的共享会话。
//!
//! 全部可变状态集中在一把同步锁保护的 `SessionCore` 中，锁从不跨越 `.await` 持有，
//! 回调也总在锁外执行。

pub mod dispatcher;
pub mod heartbeat;
pub mod lifecycle;
pub mod publisher;
pub mod registry;
pub mod shared;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use log::{debug, error, info};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc::UnboundedSender, watch};
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

use crate::client::transport::{TransportFactory, WebSocketTransportFactory};
use crate::codec::{FrameCodec, StompCodec};
use crate::config::{parse_ws_url, SessionConfig};
use crate::error::SessionError;
use crate::link::TransportCommand;
use crate::message::InboundMessage;
use registry::SubscriptionRegistry;

/// 会话连接状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionState::Disconnected => "已断开",
            ConnectionState::Connecting => "连接中",
            ConnectionState::Connected => "已连接",
        };
        f.write_str(text)
    }
}

/// 终止性错误回调。
pub type ErrorCallback = Arc<dyn Fn(SessionError) + Send + Sync>;

/// 当前连接尝试的结果，供所有 `connect()` 调用方共享。
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ConnectOutcome {
    Pending,
    Connected,
    Failed(SessionError),
}

pub(crate) struct SessionCore {
    pub(crate) state: ConnectionState,
    pub(crate) link: Option<UnboundedSender<TransportCommand>>,
    /// 每次 `connect` 启动新驱动或 `disconnect` 时递增，旧驱动据此识别自己已过期。
    pub(crate) epoch: u64,
    pub(crate) retry_count: u32,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) outcome: watch::Sender<ConnectOutcome>,
    pub(crate) driver: Option<JoinHandle<()>>,
    pub(crate) error_callback: Option<ErrorCallback>,
    pub(crate) url: Option<Url>,
}

pub(crate) struct SessionShared {
    pub(crate) id: Uuid,
    pub(crate) config: SessionConfig,
    pub(crate) factory: Arc<dyn TransportFactory>,
    pub(crate) codec: Arc<dyn FrameCodec>,
    pub(crate) core: Mutex<SessionCore>,
}

impl SessionShared {
    /// 以 `epoch` 的身份执行一段状态修改；驱动已过期时返回 `None`。
    pub(crate) fn with_current<R>(
        &self,
        epoch: u64,
        f: impl FnOnce(&mut SessionCore) -> R,
    ) -> Option<R> {
        let mut core = self.core.lock();
        if core.epoch != epoch || core.state == ConnectionState::Disconnected {
            return None;
        }
        Some(f(&mut core))
    }
}

/// 在锁外调用错误回调，回调中的 panic 会被捕获。
pub(crate) fn notify_error(callback: Option<ErrorCallback>, err: SessionError) {
    if let Some(callback) = callback {
        if catch_unwind(AssertUnwindSafe(|| callback(err))).is_err() {
            error!("[会话生命周期] 错误回调发生 panic，已忽略。");
        }
    }
}

/// 一个消息会话。克隆得到的是同一会话的另一个句柄。
///
/// 会话在 `connect` 后由后台任务驱动，调用 `disconnect` 才会停止该任务。
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    /// 使用默认的 WebSocket 传输和 STOMP 编解码器创建会话。
    pub fn new(config: SessionConfig) -> Self {
        Self::with_transport(config, Arc::new(WebSocketTransportFactory), Arc::new(StompCodec))
    }

    /// 注入传输工厂与编解码器。
    pub fn with_transport(
        config: SessionConfig,
        factory: Arc<dyn TransportFactory>,
        codec: Arc<dyn FrameCodec>,
    ) -> Self {
        let (outcome, _) = watch::channel(ConnectOutcome::Pending);
        let core = SessionCore {
            state: ConnectionState::Disconnected,
            link: None,
            epoch: 0,
            retry_count: 0,
            registry: SubscriptionRegistry::new(),
            outcome,
            driver: None,
            error_callback: None,
            url: None,
        };
        Self {
            shared: Arc::new(SessionShared {
                id: Uuid::new_v4(),
                config,
                factory,
                codec,
                core: Mutex::new(core),
            }),
        }
    }

    /// 连接到配置中的地址。
    pub async fn connect(&self) -> Result<(), SessionError> {
        let url = self.shared.config.url.clone();
        self.connect_to(&url).await
    }

    /// 连接到指定地址。
    ///
    /// 已连接时立即返回；连接进行中时等待现有尝试的结果，不会打开第二条连接。
    pub async fn connect_to(&self, url: &str) -> Result<(), SessionError> {
        let url = parse_ws_url(url)?;
        let mut outcome_rx = {
            let mut core = self.shared.core.lock();
            match core.state {
                ConnectionState::Connected => {
                    debug!("[会话生命周期] 会话已连接，connect() 直接返回。");
                    return Ok(());
                }
                ConnectionState::Connecting => {
                    debug!("[会话生命周期] 连接进行中，等待现有连接尝试的结果。");
                    core.outcome.subscribe()
                }
                ConnectionState::Disconnected => {
                    core.epoch += 1;
                    core.state = ConnectionState::Connecting;
                    core.retry_count = 0;
                    core.url = Some(url.clone());
                    core.outcome.send_replace(ConnectOutcome::Pending);
                    let outcome_rx = core.outcome.subscribe();
                    info!(
                        "[会话生命周期] 会话 {} 开始连接到 {} (epoch {})",
                        self.shared.id, url, core.epoch
                    );
                    let driver =
                        tokio::spawn(lifecycle::drive(self.shared.clone(), url, core.epoch));
                    core.driver = Some(driver);
                    outcome_rx
                }
            }
        };
        loop {
            let outcome = outcome_rx.borrow_and_update().clone();
            match outcome {
                ConnectOutcome::Connected => return Ok(()),
                ConnectOutcome::Failed(err) => return Err(err),
                ConnectOutcome::Pending => {}
            }
            if outcome_rx.changed().await.is_err() {
                return Err(SessionError::Aborted);
            }
        }
    }

    /// 断开连接。已断开时不做任何操作。
    ///
    /// 尽力为每个活动订阅发送 UNSUBSCRIBE，随后发送 DISCONNECT 并关闭传输；
    /// 进行中的连接尝试被放弃，其等待者收到 `SessionError::Aborted`。
    pub fn disconnect(&self) {
        let mut core = self.shared.core.lock();
        if core.state == ConnectionState::Disconnected {
            debug!("[会话生命周期] 会话已处于断开状态，disconnect() 无需操作。");
            return;
        }
        core.epoch += 1;
        if let Some(link) = core.link.take() {
            let codec = self.shared.codec.as_ref();
            for (topic, id) in core.registry.materialized() {
                let frame = publisher::unsubscribe_frame(&id);
                if let Err(e) = publisher::push_frame(&link, codec, &frame) {
                    debug!("[会话生命周期] 退订 {} 失败 (已忽略): {}", topic, e);
                }
            }
            let _ = publisher::push_frame(&link, codec, &publisher::disconnect_frame());
            let _ = link.send(TransportCommand::Close);
        }
        let removed = core.registry.clear();
        core.state = ConnectionState::Disconnected;
        core.retry_count = 0;
        core.outcome.send_replace(ConnectOutcome::Failed(SessionError::Aborted));
        if let Some(driver) = core.driver.take() {
            driver.abort();
        }
        info!("[会话生命周期] 会话 {} 已断开，清除了 {} 个订阅。", self.shared.id, removed.len());
    }

    /// 订阅主题。同一主题再次订阅会替换之前的回调。
    ///
    /// 已连接时立即向代理发送 SUBSCRIBE；否则记录在注册表中，连接建立后按注册顺序重放。
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let mut core = self.shared.core.lock();
        let replaced = core.registry.contains(&topic);
        let token = core.registry.upsert(&topic, Arc::new(handler));
        if core.state == ConnectionState::Connected {
            if let Some(id) = core.registry.materialize(&topic) {
                if let Some(link) = core.link.as_ref() {
                    let frame = publisher::subscribe_frame(&id, &topic);
                    let codec = self.shared.codec.as_ref();
                    if let Err(e) = publisher::push_frame(link, codec, &frame) {
                        // 链路已断，驱动任务会在重连后重放。
                        debug!("[订阅注册表] 立即订阅 {} 失败: {}", topic, e);
                    }
                }
            }
        }
        if replaced {
            info!("[订阅注册表] 已替换主题 {} 的回调。", topic);
        } else {
            info!("[订阅注册表] 已订阅主题 {} (当前状态: {})", topic, core.state);
        }
        SubscriptionHandle {
            session: Arc::downgrade(&self.shared),
            topic,
            token,
        }
    }

    /// 退订主题。未订阅的主题不做任何操作。
    pub fn unsubscribe(&self, topic: &str) {
        let mut core = self.shared.core.lock();
        match core.registry.remove(topic) {
            Some(record) => {
                let codec = self.shared.codec.as_ref();
                cancel_broker_subscription(&core, codec, topic, record.broker_id.as_deref());
                info!("[订阅注册表] 已退订主题 {}", topic);
            }
            None => debug!("[订阅注册表] 主题 {} 未订阅，unsubscribe() 无需操作。", topic),
        }
    }

    /// 把负载序列化为 JSON 发送到目的地。未连接时返回 `SessionError::NotConnected`。
    pub fn send<T: Serialize + ?Sized>(
        &self,
        destination: &str,
        payload: &T,
    ) -> Result<(), SessionError> {
        let frame = publisher::json_send_frame(destination, payload)?;
        let core = self.shared.core.lock();
        publisher::publish(&core, self.shared.codec.as_ref(), &frame)
    }

    /// 发送纯文本正文。
    pub fn send_text(&self, destination: &str, text: &str) -> Result<(), SessionError> {
        let frame = publisher::text_send_frame(destination, text);
        let core = self.shared.core.lock();
        publisher::publish(&core, self.shared.codec.as_ref(), &frame)
    }

    /// 注册终止性错误回调，替换之前的回调。
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(SessionError) + Send + Sync + 'static,
    {
        self.shared.core.lock().error_callback = Some(Arc::new(callback));
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.core.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// 自上次成功连接以来连续失败的次数。
    pub fn retry_count(&self) -> u32 {
        self.shared.core.lock().retry_count
    }

    /// 按注册顺序返回当前订阅的主题。
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.shared.core.lock().registry.topics()
    }

    /// 最近一次 `connect` 使用的地址。
    pub fn url(&self) -> Option<Url> {
        self.shared.core.lock().url.clone()
    }

    /// 会话的唯一标识，仅用于日志与诊断。
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.core.lock();
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("state", &core.state)
            .field("retry_count", &core.retry_count)
            .field("topics", &core.registry.topics())
            .finish()
    }
}

fn cancel_broker_subscription(
    core: &SessionCore,
    codec: &dyn FrameCodec,
    topic: &str,
    broker_id: Option<&str>,
) {
    if let (Some(id), Some(link)) = (broker_id, core.link.as_ref()) {
        if let Err(e) = publisher::push_frame(link, codec, &publisher::unsubscribe_frame(id)) {
            debug!("[订阅注册表] 向代理退订 {} 失败 (已忽略): {}", topic, e);
        }
    }
}

/// `subscribe` 返回的句柄。
///
/// 句柄只弱引用会话，不会延长会话的生命周期。
#[derive(Clone)]
pub struct SubscriptionHandle {
    session: Weak<SessionShared>,
    topic: String,
    token: u64,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 取消这次订阅。
    ///
    /// 如果该主题之后又被重新订阅 (回调已被替换)，本句柄已过期，调用无效果。
    /// 返回是否真的移除了订阅。
    pub fn cancel(&self) -> bool {
        let Some(shared) = self.session.upgrade() else {
            return false;
        };
        let mut core = shared.core.lock();
        match core.registry.remove_if_token(&self.topic, self.token) {
            Some(record) => {
                let codec = shared.codec.as_ref();
                cancel_broker_subscription(&core, codec, &self.topic, record.broker_id.as_deref());
                info!("[订阅注册表] 已通过句柄退订主题 {}", self.topic);
                true
            }
            None => {
                debug!("[订阅注册表] 主题 {} 的句柄已过期，忽略取消请求。", self.topic);
                false
            }
        }
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .field("token", &self.token)
            .finish()
    }
}

pub use shared::{SessionLease, SharedSession};
