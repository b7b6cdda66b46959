//! `rust_messaging_session` 是一个基于 WebSocket 的 STOMP 消息会话库。
//!
//! 一个 [`Session`] 持有到消息代理的单条传输连接，在其上复用多个主题订阅，
//! 把入站帧分发给对应主题的回调，并提供发送、订阅、退订与断开等操作。
//! 会话内置心跳检测、固定延迟的有限次重连，以及幂等的连接/断开语义。
//!
//! 主要模块包括：
//! - `frame` / `codec`: STOMP 帧结构与文本编解码器。
//! - `link`: 会话与底层 WebSocket 之间的通道化链路。
//! - `client`: 打开传输链路的工厂 (`tokio-tungstenite`)。
//! - `server`: 服务端监听器，开发用代理和集成测试使用。
//! - `session`: 会话本体，包括生命周期、订阅注册表、分发器、发布器与共享会话。
//! - `config` / `error` / `message`: 配置、错误类型与入站消息。
//!
//! ```no_run
//! use rust_messaging_session::{Session, SessionConfig};
//!
//! # async fn run() -> Result<(), rust_messaging_session::SessionError> {
//! let session = Session::new(SessionConfig::new("ws://localhost:8080/ws"));
//! session.connect().await?;
//! session.subscribe("/topic/chat", |msg| println!("收到: {}", msg.text()));
//! session.send_text("/app/chat", "大家好")?;
//! session.disconnect();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod link;
pub mod message;
pub mod server;
pub mod session;

pub use client::transport::{TransportFactory, WebSocketTransportFactory};
pub use codec::{FrameCodec, StompCodec, WireItem};
pub use config::SessionConfig;
pub use error::{ErrorCategory, ServerError, SessionError};
pub use frame::{Command, Frame};
pub use link::{TransportCommand, TransportEvent, TransportLink};
pub use message::{InboundMessage, MessageBody};
pub use server::transport::ServerTransport;
pub use session::heartbeat::HeartbeatPolicy;
pub use session::{ConnectionState, Session, SessionLease, SharedSession, SubscriptionHandle};
