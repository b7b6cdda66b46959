// rust_messaging_session/src/server/transport.rs

//! 服务端 WebSocket 传输层。
//!
//! [`ServerTransport`] 绑定 TCP 监听器，为每个完成 WebSocket 握手的连接构造一条
//! [`TransportLink`]，并在独立任务中调用上层提供的 `on_connect` 回调。
//! 开发用代理和集成测试都通过它接收客户端连接。

use std::future::Future;
use std::net::SocketAddr;

use log::{debug, error, info};
use tokio::net::{lookup_host, TcpListener};
use tokio_tungstenite::accept_async;

use crate::error::ServerError;
use crate::link::TransportLink;

/// WebSocket 服务端监听器。
pub struct ServerTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ServerTransport {
    /// 绑定到指定地址，例如 `"127.0.0.1:0"` 表示由系统分配端口。
    ///
    /// 主机部分可以是主机名 (如 `localhost:8080`)，解析出的地址依次尝试绑定。
    pub async fn bind(addr: &str) -> Result<Self, ServerError> {
        let candidates: Vec<SocketAddr> = lookup_host(addr)
            .await
            .map_err(|e| ServerError::InvalidAddr(format!("'{}': {}", addr, e)))?
            .collect();
        if candidates.is_empty() {
            return Err(ServerError::InvalidAddr(format!("'{}': 未解析出任何地址", addr)));
        }
        let mut last_error = None;
        let mut bound = None;
        for candidate in candidates {
            match TcpListener::bind(candidate).await {
                Ok(listener) => {
                    bound = Some(listener);
                    break;
                }
                Err(e) => {
                    debug!("[服务端传输层] 绑定 {} 失败: {}", candidate, e);
                    last_error = Some(e);
                }
            }
        }
        let listener = match (bound, last_error) {
            (Some(listener), _) => listener,
            (None, Some(e)) => return Err(ServerError::TcpBind(e)),
            (None, None) => {
                return Err(ServerError::InvalidAddr(format!("'{}': 未解析出任何地址", addr)));
            }
        };
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;
        info!("[服务端传输层] WebSocket 服务器正在监听地址: {}", local_addr);
        Ok(Self { listener, local_addr })
    }

    /// 实际监听的地址。
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 持续接受连接，直到所在任务被取消。
    ///
    /// 单个连接的握手失败只记录日志，不会中断监听。
    pub async fn run<F, Fut>(self, on_connect: F)
    where
        F: Fn(TransportLink, SocketAddr) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            match self.listener.accept().await {
                Ok((tcp_stream, peer_addr)) => {
                    info!("[服务端传输层] 从 {} 接受了新的 TCP 连接", peer_addr);
                    let on_connect_callback = on_connect.clone();
                    tokio::spawn(async move {
                        match accept_async(tcp_stream).await {
                            Ok(ws_stream) => {
                                info!("[服务端传输层] 与 {} 的 WebSocket 握手成功", peer_addr);
                                let link =
                                    TransportLink::from_stream(ws_stream, peer_addr.to_string());
                                on_connect_callback(link, peer_addr).await;
                            }
                            Err(e) => {
                                error!(
                                    "[服务端传输层] 与 {} 的 WebSocket 握手失败: {}",
                                    peer_addr, e
                                );
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("[服务端传输层] 接受 TCP 连接失败: {}。服务器将继续运行。", e);
                }
            }
        }
    }

    /// 绑定并在当前任务中持续运行。
    pub async fn start<F, Fut>(addr: &str, on_connect: F) -> Result<(), ServerError>
    where
        F: Fn(TransportLink, SocketAddr) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let transport = Self::bind(addr).await?;
        transport.run(on_connect).await;
        Ok(())
    }
}
