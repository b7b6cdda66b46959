// rust_messaging_session/src/client/mod.rs

//! WebSocket 客户端模块。
//!
//! 负责打开到代理的传输链路。`transport` 子模块定义了 [`transport::TransportFactory`]
//! 抽象以及基于 `tokio-tungstenite` 的默认实现。

pub mod transport;
