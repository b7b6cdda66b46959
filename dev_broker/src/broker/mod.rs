// dev_broker/src/broker/mod.rs

//! STOMP 开发代理的核心组件。
//!
//! - `client_session`: 单个客户端连接的状态。
//! - `connection_manager`: 活动客户端与主题订阅的并发索引。
//! - `heartbeat_monitor`: 周期性清理长时间无数据的客户端。
//! - `service`: 监听、握手以及 SUBSCRIBE / SEND / DISCONNECT 等帧的处理。

pub mod client_session;
pub mod connection_manager;
pub mod heartbeat_monitor;
pub mod service;

pub use client_session::ClientSession;
pub use connection_manager::ConnectionManager;
pub use heartbeat_monitor::HeartbeatMonitor;
pub use service::BrokerService;
