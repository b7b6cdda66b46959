// rust_messaging_session/src/client/transport.rs

//! 客户端传输层。
//!
//! [`TransportFactory`] 是会话打开连接的唯一入口。生产环境使用
//! [`WebSocketTransportFactory`]，它通过 `tokio-tungstenite` 建立连接，
//! 再把 WebSocket 流交给 [`TransportLink::from_stream`] 托管。
//! 测试可以实现自己的工厂，返回由内存通道构成的链路。

use async_trait::async_trait;
use log::{debug, error, info};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Error as TungsteniteError;
use url::Url;

use crate::error::SessionError;
use crate::link::TransportLink;

/// 打开传输链路的工厂。
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// 打开一条到 `url` 的链路。
    ///
    /// 返回的错误应当区分可重试的传输错误 (`SessionError::Transport`) 与
    /// 不可重试的握手/配置错误 (`SessionError::Handshake` / `SessionError::InvalidUrl`)。
    async fn open(&self, url: &Url) -> Result<TransportLink, SessionError>;
}

/// 基于 `tokio-tungstenite` 的 WebSocket 工厂。
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransportFactory;

#[async_trait]
impl TransportFactory for WebSocketTransportFactory {
    async fn open(&self, url: &Url) -> Result<TransportLink, SessionError> {
        info!("[传输层] 开始尝试连接到 WebSocket 服务器，URL: {}", url);
        match connect_async(url.as_str()).await {
            Ok((ws_stream, response)) => {
                info!("[传输层] 已成功连接到 {} (HTTP 状态码: {})", url, response.status());
                debug!("[传输层] WebSocket 连接响应头: {:?}", response.headers());
                Ok(TransportLink::from_stream(ws_stream, url.to_string()))
            }
            Err(e) => {
                error!("[传输层] 连接到 {} 失败，错误: {}", url, e);
                Err(map_connect_error(e))
            }
        }
    }
}

/// 把 tungstenite 的连接错误归类为会话错误。
///
/// 服务器拒绝升级 (HTTP 4xx 等非 101 响应) 与协议违规属于握手错误，重试不会改变结果；
/// 5xx 响应 (代理或网关暂时不可用)、IO/TLS 错误以及连接中断则交给重连策略。
pub(crate) fn map_connect_error(err: TungsteniteError) -> SessionError {
    match err {
        TungsteniteError::Http(response) => classify_upgrade_rejection(response.status()),
        TungsteniteError::HttpFormat(e) => {
            SessionError::Handshake(format!("HTTP 握手格式错误: {}", e))
        }
        TungsteniteError::Url(e) => SessionError::InvalidUrl(e.to_string()),
        TungsteniteError::Protocol(e) => {
            SessionError::Handshake(format!("WebSocket 协议错误: {}", e))
        }
        other => SessionError::Transport(other.to_string()),
    }
}

/// 按 HTTP 状态码区分升级被拒绝的原因。
fn classify_upgrade_rejection(status: StatusCode) -> SessionError {
    if status.is_server_error() {
        SessionError::Transport(format!(
            "服务器暂时无法完成 WebSocket 升级，HTTP 状态码: {}",
            status
        ))
    } else {
        SessionError::Handshake(format!("服务器拒绝了 WebSocket 升级请求，HTTP 状态码: {}", status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::error::{ProtocolError, UrlError};

    #[test]
    fn test_connect_errors_map_to_session_taxonomy() {
        let io = TungsteniteError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(matches!(map_connect_error(io), SessionError::Transport(_)));
        assert!(map_connect_error(TungsteniteError::ConnectionClosed).is_retryable());
        assert!(matches!(
            map_connect_error(TungsteniteError::Url(UrlError::UnsupportedUrlScheme)),
            SessionError::InvalidUrl(_)
        ));
        assert!(matches!(
            map_connect_error(TungsteniteError::Protocol(ProtocolError::WrongHttpVersion)),
            SessionError::Handshake(_)
        ));
    }

    #[test]
    fn test_server_errors_during_upgrade_are_retryable() {
        for status in [StatusCode::BAD_GATEWAY, StatusCode::SERVICE_UNAVAILABLE] {
            let err = classify_upgrade_rejection(status);
            assert!(err.is_retryable(), "{} 应当可重试，实际: {:?}", status, err);
        }
        for status in [StatusCode::NOT_FOUND, StatusCode::UNAUTHORIZED, StatusCode::OK] {
            assert!(
                matches!(classify_upgrade_rejection(status), SessionError::Handshake(_)),
                "{} 不应重试",
                status
            );
        }
    }

    #[tokio::test]
    async fn test_open_unreachable_endpoint_is_transport_error() {
        let _ = env_logger::builder().is_test(true).try_init();
        // 绑定后立即释放端口，确保该地址上没有监听者。
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("ws://{}/ws", addr)).unwrap();
        match WebSocketTransportFactory.open(&url).await {
            Err(err) => assert!(err.is_retryable(), "连接被拒绝应当可重试，实际: {:?}", err),
            Ok(_) => panic!("不应连接成功"),
        }
    }
}
