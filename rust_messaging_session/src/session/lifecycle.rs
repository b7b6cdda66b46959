// rust_messaging_session/src/session/lifecycle.rs

//! 传输生命周期驱动。
//!
//! 每次 `connect()` 从 DISCONNECTED 出发时都会启动一个驱动任务，直到会话回到
//! DISCONNECTED 为止。驱动任务的一轮循环：
//!
//! 1. 在 `connect_timeout` 内打开链路、发送 CONNECT、等待 CONNECTED；
//! 2. 成功后置为 CONNECTED，清零重试计数，并按注册顺序重放全部订阅；
//! 3. 运行连接：分发入站帧、按协商间隔发送心跳、检测接收超时；
//! 4. 连接意外丢失时回到 CONNECTING，等待 `reconnect_delay` 后重试。
//!
//! 可重试的失败 (传输错误、超时) 每次使重试计数加一，达到 `max_reconnect_attempts`
//! 后会话终止。握手/协议错误以及连接期间收到的 ERROR 帧不可重试，直接终止。
//! 终止只发生一次：置为 DISCONNECTED、清空订阅、通知等待者并调用一次错误回调。

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::time::{interval_at, sleep, sleep_until, timeout, Instant, Interval};
use url::Url;

use crate::codec::WireItem;
use crate::error::SessionError;
use crate::frame::{Command, Frame};
use crate::link::{TransportCommand, TransportEvent, TransportLink};
use crate::session::dispatcher;
use crate::session::heartbeat::{parse_heartbeat_header, HeartbeatPolicy};
use crate::session::publisher;
use crate::session::{notify_error, ConnectOutcome, ConnectionState, SessionShared};

/// 一次连接结束的原因。
#[derive(Debug)]
enum ConnectionEnd {
    /// 意外丢失，进入重连。
    Lost(String),
    /// 不可重试的错误，会话终止。
    Fatal(SessionError),
    /// 会话已被 `disconnect()` 或新的 `connect()` 接管。
    Superseded,
}

/// 驱动任务入口。
pub(crate) async fn drive(shared: Arc<SessionShared>, url: Url, epoch: u64) {
    let max_attempts = shared.config.max_reconnect_attempts;
    loop {
        let connect_timeout = shared.config.connect_timeout();
        let attempt = match timeout(connect_timeout, establish(&shared, &url)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::ConnectionTimeout),
        };

        match attempt {
            Ok((link, policy)) => {
                if !on_connected(&shared, epoch, &link) {
                    let _ = link.outbound.send(TransportCommand::Close);
                    return;
                }
                match run_connection(&shared, epoch, link, policy).await {
                    ConnectionEnd::Superseded => return,
                    ConnectionEnd::Fatal(err) => {
                        terminate(&shared, epoch, err);
                        return;
                    }
                    ConnectionEnd::Lost(reason) => {
                        warn!("[会话生命周期] 与 {} 的连接意外丢失: {}", url, reason);
                        if !mark_reconnecting(&shared, epoch) {
                            return;
                        }
                    }
                }
            }
            Err(err) if err.is_retryable() => {
                let Some(attempts) = shared.with_current(epoch, |core| {
                    core.retry_count += 1;
                    core.retry_count
                }) else {
                    return;
                };
                if attempts >= max_attempts {
                    terminate(
                        &shared,
                        epoch,
                        SessionError::RetriesExhausted {
                            attempts,
                            last_error: err.to_string(),
                        },
                    );
                    return;
                }
                warn!(
                    "[会话生命周期] 第 {}/{} 次连接尝试失败: {}，{:?} 后重试。",
                    attempts,
                    max_attempts,
                    err,
                    shared.config.reconnect_delay()
                );
            }
            Err(err) => {
                terminate(&shared, epoch, err);
                return;
            }
        }

        sleep(shared.config.reconnect_delay()).await;
        if shared.with_current(epoch, |_| ()).is_none() {
            debug!("[会话生命周期] 重连等待期间会话已被接管，驱动任务退出。");
            return;
        }
        info!("[会话生命周期] 正在重新连接到 {}", url);
    }
}

/// 打开链路并完成 STOMP 握手。
async fn establish(
    shared: &SessionShared,
    url: &Url,
) -> Result<(TransportLink, HeartbeatPolicy), SessionError> {
    let mut link = shared.factory.open(url).await?;
    let connect = publisher::connect_frame(&shared.config, url);
    publisher::push_frame(&link.outbound, shared.codec.as_ref(), &connect)?;

    loop {
        let text = match link.inbound.recv().await {
            Some(TransportEvent::Text(text)) => text,
            Some(TransportEvent::Closed(reason)) => {
                return Err(SessionError::Transport(format!(
                    "握手完成前连接被关闭: {}",
                    reason.unwrap_or_else(|| "未提供原因".to_string())
                )));
            }
            Some(TransportEvent::Error(e)) => return Err(SessionError::Transport(e)),
            None => return Err(SessionError::Transport("握手完成前链路已关闭".to_string())),
        };
        let items = shared
            .codec
            .decode(&text)
            .map_err(|e| SessionError::Handshake(format!("无法解析代理的问候帧: {}", e)))?;
        for item in items {
            let frame = match item {
                WireItem::Heartbeat => continue,
                WireItem::Frame(frame) => frame,
            };
            match frame.command {
                Command::Connected => {
                    let policy = negotiate(shared, &frame)?;
                    info!(
                        "[会话生命周期] 握手完成 (版本: {}，心跳: {:?})",
                        frame.header("version").unwrap_or("未声明"),
                        policy
                    );
                    return Ok((link, policy));
                }
                Command::Error => return Err(broker_error(&frame)),
                other => {
                    return Err(SessionError::Handshake(format!("握手期间收到意外的帧: {}", other)));
                }
            }
        }
    }
}

fn negotiate(shared: &SessionShared, connected: &Frame) -> Result<HeartbeatPolicy, SessionError> {
    let server = match connected.header("heart-beat") {
        Some(value) => parse_heartbeat_header(value)?,
        None => (0, 0),
    };
    let client = (shared.config.heartbeat_outgoing_ms, shared.config.heartbeat_incoming_ms);
    Ok(HeartbeatPolicy::negotiate(client, server))
}

fn broker_error(frame: &Frame) -> SessionError {
    SessionError::Broker {
        message: frame.header("message").unwrap_or("未提供错误信息").to_string(),
        details: frame.body.clone(),
    }
}

/// 握手成功：切换到 CONNECTED 并重放订阅。驱动已过期时返回 `false`。
fn on_connected(shared: &SessionShared, epoch: u64, link: &TransportLink) -> bool {
    let replayed = shared.with_current(epoch, |core| {
        core.state = ConnectionState::Connected;
        core.retry_count = 0;
        core.link = Some(link.outbound.clone());
        let replay = core.registry.materialize_all();
        for (topic, id) in &replay {
            let frame = publisher::subscribe_frame(id, topic);
            if let Err(e) = publisher::push_frame(&link.outbound, shared.codec.as_ref(), &frame) {
                warn!("[会话生命周期] 重放订阅 {} 失败: {}", topic, e);
            }
        }
        core.outcome.send_replace(ConnectOutcome::Connected);
        replay.len()
    });
    match replayed {
        Some(count) => {
            info!("[会话生命周期] 会话已连接，重放了 {} 个订阅。", count);
            true
        }
        None => {
            debug!("[会话生命周期] 握手完成时会话已被接管，放弃该连接。");
            false
        }
    }
}

/// 连接丢失：回到 CONNECTING，所有代理端订阅失效。
fn mark_reconnecting(shared: &SessionShared, epoch: u64) -> bool {
    shared
        .with_current(epoch, |core| {
            core.state = ConnectionState::Connecting;
            core.link = None;
            core.registry.clear_broker_ids();
            core.outcome.send_replace(ConnectOutcome::Pending);
        })
        .is_some()
}

/// 终止会话并通知一次错误回调。
///
/// 回调先于 `connect()` 等待者被唤醒执行，等待者拿到错误时回调已经完成。
fn terminate(shared: &SessionShared, epoch: u64, err: SessionError) {
    let callback = shared.with_current(epoch, |core| {
        core.state = ConnectionState::Disconnected;
        if let Some(link) = core.link.take() {
            let _ = link.send(TransportCommand::Close);
        }
        core.registry.clear();
        core.driver = None;
        core.error_callback.clone()
    });
    let Some(callback) = callback else {
        debug!("[会话生命周期] 会话已被接管，忽略终止错误: {}", err);
        return;
    };
    error!("[会话生命周期] 会话终止: {} (类别: {:?})", err, err.category());
    notify_error(callback, err.clone());

    let core = shared.core.lock();
    // 回调期间可能已有新的 connect() 接管会话，此时不能覆盖新尝试的结果。
    if core.epoch == epoch {
        core.outcome.send_replace(ConnectOutcome::Failed(err));
    }
}

/// 运行一条已建立的连接，直到它结束。
async fn run_connection(
    shared: &SessionShared,
    epoch: u64,
    link: TransportLink,
    policy: HeartbeatPolicy,
) -> ConnectionEnd {
    let TransportLink { outbound, mut inbound } = link;
    let mut ticker: Option<Interval> = policy
        .outgoing
        .map(|period| interval_at(Instant::now() + period, period));
    let read_deadline: Option<Duration> = policy.read_deadline();
    let mut last_seen = Instant::now();

    loop {
        let heartbeat_due = async {
            match ticker.as_mut() {
                Some(ticker) => {
                    ticker.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        let silence_deadline = read_deadline.map(|limit| last_seen + limit);
        let silence_limit = async move {
            match silence_deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            event = inbound.recv() => match event {
                Some(TransportEvent::Text(text)) => {
                    last_seen = Instant::now();
                    if let Some(end) = handle_text(shared, epoch, &text) {
                        return end;
                    }
                }
                Some(TransportEvent::Closed(reason)) => {
                    let reason = reason.unwrap_or_else(|| "代理关闭了连接".to_string());
                    return ConnectionEnd::Lost(reason);
                }
                Some(TransportEvent::Error(e)) => return ConnectionEnd::Lost(e),
                None => return ConnectionEnd::Lost("传输链路已关闭".to_string()),
            },
            _ = heartbeat_due => {
                trace!("[会话生命周期] 发送心跳。");
                if outbound.send(TransportCommand::Text(shared.codec.heartbeat())).is_err() {
                    return ConnectionEnd::Lost("发送心跳时链路已关闭".to_string());
                }
            }
            _ = silence_limit => {
                let _ = outbound.send(TransportCommand::Close);
                return ConnectionEnd::Lost(format!(
                    "超过 {:?} 未收到代理的任何数据，判定心跳丢失",
                    read_deadline
                ));
            }
        }
    }
}

/// 处理一条入站文本消息。返回 `Some` 表示连接应当结束。
fn handle_text(shared: &SessionShared, epoch: u64, text: &str) -> Option<ConnectionEnd> {
    let items = match shared.codec.decode(text) {
        Ok(items) => items,
        Err(e) => {
            warn!("[帧分发器] 丢弃无法解码的入站消息: {}", e);
            return None;
        }
    };
    for item in items {
        let frame = match item {
            WireItem::Heartbeat => {
                trace!("[会话生命周期] 收到心跳。");
                continue;
            }
            WireItem::Frame(frame) => frame,
        };
        match frame.command {
            Command::Message => {
                let routed =
                    shared.with_current(epoch, |core| dispatcher::route(&core.registry, frame));
                let delivery = match routed {
                    Some(delivery) => delivery,
                    None => return Some(ConnectionEnd::Superseded),
                };
                if let Some(delivery) = delivery {
                    dispatcher::deliver(delivery);
                }
            }
            Command::Error => {
                let err = broker_error(&frame);
                error!("[会话生命周期] 连接期间收到代理的 ERROR 帧: {}", err);
                return Some(ConnectionEnd::Fatal(err));
            }
            Command::Receipt => debug!("[会话生命周期] 收到回执: {:?}", frame.header("receipt-id")),
            other => debug!("[会话生命周期] 忽略非预期的 {} 帧。", other),
        }
    }
    None
}
