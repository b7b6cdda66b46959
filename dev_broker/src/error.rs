// dev_broker/src/error.rs

//! 开发代理的错误类型。

use rust_messaging_session::ServerError;
use thiserror::Error;

/// 开发代理的统一错误类型。
#[derive(Error, Debug)]
pub enum BrokerError {
    /// 监听器启动失败。
    #[error("WebSocket 服务错误: {0}")]
    WebSocketService(#[from] ServerError),

    /// 配置错误。
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 客户端违反了 STOMP 协议，连接将以 ERROR 帧结束。
    #[error("协议错误: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_converts_into_broker_error() {
        let err: BrokerError = ServerError::InvalidAddr("x".to_string()).into();
        assert!(matches!(err, BrokerError::WebSocketService(_)));
        assert!(err.to_string().contains("WebSocket 服务错误"));
    }
}
