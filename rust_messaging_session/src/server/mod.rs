// rust_messaging_session/src/server/mod.rs

//! WebSocket 服务端模块。
//!
//! 提供接收客户端连接的监听器。每个连接在完成握手后以 [`crate::link::TransportLink`]
//! 的形式交给上层处理，上层只需处理文本事件，无需接触底层流。

pub mod transport;
