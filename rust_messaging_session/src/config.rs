// rust_messaging_session/src/config.rs

//! 会话配置。
//!
//! 配置可以通过 `Default` 获得合理的默认值，也可以从 JSON 字符串或文件加载，
//! 再通过 `with_*` 方法逐项覆盖。

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SessionError;

/// 默认的代理端点地址。
pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";

/// 消息会话配置。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// 代理的 WebSocket 端点。
    pub url: String,
    /// 单次连接尝试 (含握手) 的超时时间 (毫秒)。
    pub connect_timeout_ms: u64,
    /// 客户端期望的发送心跳间隔 (毫秒)，0 表示不发送。
    pub heartbeat_outgoing_ms: u64,
    /// 客户端期望的接收心跳间隔 (毫秒)，0 表示不检测。
    pub heartbeat_incoming_ms: u64,
    /// 连接丢失后等待多久再重连 (毫秒)。
    pub reconnect_delay_ms: u64,
    /// 连续失败多少次后放弃重连。
    pub max_reconnect_attempts: u32,
    /// CONNECT 帧的 `login` 头。
    pub login: Option<String>,
    /// CONNECT 帧的 `passcode` 头。
    pub passcode: Option<String>,
    /// CONNECT 帧的 `host` 头，缺省时取 URL 中的主机名。
    pub host: Option<String>,
    /// 附加到 CONNECT 帧的自定义头部，例如 `Authorization`。
    pub connect_headers: BTreeMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            connect_timeout_ms: 10_000,
            heartbeat_outgoing_ms: 4_000,
            heartbeat_incoming_ms: 4_000,
            reconnect_delay_ms: 5_000,
            max_reconnect_attempts: 5,
            login: None,
            passcode: None,
            host: None,
            connect_headers: BTreeMap::new(),
        }
    }
}

impl SessionConfig {
    /// 使用指定地址和默认参数创建配置。
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// 从 JSON 字符串加载配置，缺失的字段取默认值。
    pub fn from_json_str(content: &str) -> Result<Self, SessionError> {
        serde_json::from_str(content)
            .map_err(|e| SessionError::InvalidConfig(format!("会话配置解析失败: {}", e)))
    }

    /// 从 JSON 文件加载配置。
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| {
                SessionError::InvalidConfig(format!("读取会话配置文件 {:?} 失败: {}", path, e))
            })?;
        let config = Self::from_json_str(&content)?;
        info!("[会话配置] 已从 {:?} 加载会话配置，端点: {}", path, config.url);
        Ok(config)
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_to_ms(timeout);
        self
    }

    pub fn with_heartbeat(mut self, outgoing: Duration, incoming: Duration) -> Self {
        self.heartbeat_outgoing_ms = duration_to_ms(outgoing);
        self.heartbeat_incoming_ms = duration_to_ms(incoming);
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = duration_to_ms(delay);
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_credentials(
        mut self,
        login: impl Into<String>,
        passcode: impl Into<String>,
    ) -> Self {
        self.login = Some(login.into());
        self.passcode = Some(passcode.into());
        self
    }

    pub fn with_connect_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.connect_headers.insert(name.into(), value.into());
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// 解析并校验配置中的端点地址。
    pub fn parsed_url(&self) -> Result<Url, SessionError> {
        parse_ws_url(&self.url)
    }
}

/// 解析 WebSocket 地址，只接受 `ws` 与 `wss` 协议。
pub fn parse_ws_url(raw: &str) -> Result<Url, SessionError> {
    let url = Url::parse(raw).map_err(|e| {
        SessionError::InvalidUrl(format!("无效的 WebSocket URL '{}': {}", raw, e))
    })?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(SessionError::InvalidUrl(format!(
                "不支持的协议 '{}'，仅支持 ws/wss: {}",
                other, raw
            )));
        }
    }
    if url.host_str().is_none() {
        return Err(SessionError::InvalidUrl(format!("URL 缺少主机名: {}", raw)));
    }
    Ok(url)
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
