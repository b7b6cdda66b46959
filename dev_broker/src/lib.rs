//! `dev_broker`：本地联调与端到端测试用的 STOMP over WebSocket 开发代理。
//!
//! 代理只实现 `rust_messaging_session` 客户端需要的子集：CONNECT/STOMP 握手与心跳协商、
//! SUBSCRIBE / UNSUBSCRIBE、SEND 广播 (含 `/app/<x>` 到 `/topic/<x>` 的转发)、
//! RECEIPT 与 DISCONNECT。不支持事务和 ACK。
//!
//! 主要模块包括：
//! - `broker`: 连接管理、心跳监视与帧处理。
//! - `config`: `app_settings.json` 配置的加载与访问。
//! - `error`: 代理的错误类型。

pub mod broker;
pub mod config;
pub mod error;
