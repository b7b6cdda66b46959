// rust_messaging_session/src/session/heartbeat.rs

//! 心跳协商。
//!
//! CONNECT 帧携带 `heart-beat: cx,cy`，CONNECTED 帧返回 `heart-beat: sx,sy`：
//! - 客户端发送间隔 = 0 (任一方为 0) 否则 max(cx, sy)
//! - 客户端接收间隔 = 0 (任一方为 0) 否则 max(cy, sx)
//!
//! 接收方向超过两个间隔没有任何数据到达，即判定连接丢失。

use std::time::Duration;

use crate::error::SessionError;

/// 判定连接丢失前允许错过的接收间隔数。
pub const MISSED_HEARTBEATS_BEFORE_LOSS: u32 = 2;

/// 协商后的心跳策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartbeatPolicy {
    /// 客户端发送心跳的间隔，`None` 表示不发送。
    pub outgoing: Option<Duration>,
    /// 期望从代理收到数据的间隔，`None` 表示不检测。
    pub incoming: Option<Duration>,
}

impl HeartbeatPolicy {
    /// 双向都关闭的策略。
    pub fn disabled() -> Self {
        Self::default()
    }

    /// 按 STOMP 规则协商，参数均为毫秒。
    pub fn negotiate(client: (u64, u64), server: (u64, u64)) -> Self {
        let (cx, cy) = client;
        let (sx, sy) = server;
        Self {
            outgoing: effective(cx, sy),
            incoming: effective(cy, sx),
        }
    }

    /// 最长允许多久没有入站数据。
    pub fn read_deadline(&self) -> Option<Duration> {
        self.incoming.map(|interval| interval * MISSED_HEARTBEATS_BEFORE_LOSS)
    }
}

fn effective(ours: u64, theirs: u64) -> Option<Duration> {
    if ours == 0 || theirs == 0 {
        None
    } else {
        Some(Duration::from_millis(ours.max(theirs)))
    }
}

/// 解析 `heart-beat` 头部值，例如 `"10000,10000"`。
pub fn parse_heartbeat_header(value: &str) -> Result<(u64, u64), SessionError> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| SessionError::Handshake(format!("heart-beat 头部格式错误: '{}'", value)))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<u64>()
            .map_err(|e| {
                SessionError::Handshake(format!("heart-beat 头部数值无效 '{}': {}", value, e))
            })
    };
    Ok((parse(x)?, parse(y)?))
}

/// 生成 `heart-beat` 头部值。
pub fn format_heartbeat_header(outgoing_ms: u64, incoming_ms: u64) -> String {
    format!("{},{}", outgoing_ms, incoming_ms)
}
