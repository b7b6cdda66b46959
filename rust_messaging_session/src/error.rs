// rust_messaging_session/src/error.rs

//! 定义消息会话库相关的错误类型。
//!
//! `SessionError` 覆盖客户端会话的全部失败情形，并通过 [`SessionError::category`]
//! 归入四个类别：配置/握手错误、传输错误、解码错误以及调用方误用。
//! 同一次连接尝试的结果可能被多个等待者共享，因此错误类型实现了 `Clone`，
//! 底层错误统一以字符串形式承载。

use thiserror::Error;

/// 错误类别，调用方据此决定如何向用户呈现。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 地址错误、协议不匹配、代理拒绝握手等，不会自动重试。
    Configuration,
    /// 套接字断开、网络不可达、握手超时等，由重连策略吸收。
    Transport,
    /// 帧或消息体无法解析。
    Decode,
    /// 调用方在错误的状态下调用了 API，例如未连接时发送消息。
    Misuse,
}

/// 消息会话库的统一错误类型。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// 无效的 URL 或不受支持的协议方案。
    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    /// 配置内容无法解析或读取。
    #[error("配置错误: {0}")]
    InvalidConfig(String),

    /// 握手阶段的协议错误，例如代理返回了格式不正确的问候帧。
    #[error("握手失败: {0}")]
    Handshake(String),

    /// 代理返回了 ERROR 帧。
    #[error("代理返回错误: {message}")]
    Broker {
        /// ERROR 帧的 `message` 头。
        message: String,
        /// ERROR 帧正文，可能为空。
        details: String,
    },

    /// 底层传输错误，例如连接被对方关闭或网络不可达。
    #[error("传输错误: {0}")]
    Transport(String),

    /// 连接超时错误。
    #[error("连接超时")]
    ConnectionTimeout,

    /// 连续重连失败次数达到上限。
    #[error("重连 {attempts} 次后仍然失败，最后一次错误: {last_error}")]
    RetriesExhausted {
        /// 已经尝试的次数。
        attempts: u32,
        /// 最后一次失败的描述。
        last_error: String,
    },

    /// 未连接错误，当尝试在未建立连接时进行操作。
    #[error("未连接")]
    NotConnected,

    /// 当 serde 序列化失败时返回。
    #[error("序列化错误: {0}")]
    Serialization(String),

    /// 帧或消息体解码失败。
    #[error("解码错误: {0}")]
    Decode(String),

    /// 连接尝试被 `disconnect()` 放弃。
    #[error("连接尝试已被放弃")]
    Aborted,
}

impl SessionError {
    /// 返回该错误所属的类别。
    pub fn category(&self) -> ErrorCategory {
        match self {
            SessionError::InvalidUrl(_)
            | SessionError::InvalidConfig(_)
            | SessionError::Handshake(_)
            | SessionError::Broker { .. } => ErrorCategory::Configuration,
            SessionError::Transport(_)
            | SessionError::ConnectionTimeout
            | SessionError::RetriesExhausted { .. }
            | SessionError::Aborted => ErrorCategory::Transport,
            SessionError::Decode(_) => ErrorCategory::Decode,
            SessionError::NotConnected | SessionError::Serialization(_) => ErrorCategory::Misuse,
        }
    }

    /// 是否应由重连策略吸收并重试。
    ///
    /// `RetriesExhausted` 与 `Aborted` 虽属传输类别，但本身已是终态，不再重试。
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Transport(_) | SessionError::ConnectionTimeout)
    }
}

/// 服务端监听相关的错误。
#[derive(Error, Debug)]
pub enum ServerError {
    /// 当 TCP 监听器无法绑定到指定地址时发生。
    #[error("TCP 监听器绑定错误: {0}")]
    TcpBind(#[source] std::io::Error),

    /// 无法获取监听器的本地地址。
    #[error("无法获取本地监听地址: {0}")]
    LocalAddr(#[source] std::io::Error),

    /// 地址字符串无法解析。
    #[error("无效的监听地址: {0}")]
    InvalidAddr(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories_follow_taxonomy() {
        assert_eq!(SessionError::InvalidUrl("x".into()).category(), ErrorCategory::Configuration);
        assert_eq!(SessionError::Handshake("x".into()).category(), ErrorCategory::Configuration);
        assert_eq!(
            SessionError::Broker { message: "denied".into(), details: String::new() }.category(),
            ErrorCategory::Configuration
        );
        assert_eq!(SessionError::Transport("x".into()).category(), ErrorCategory::Transport);
        assert_eq!(SessionError::ConnectionTimeout.category(), ErrorCategory::Transport);
        assert_eq!(SessionError::Decode("x".into()).category(), ErrorCategory::Decode);
        assert_eq!(SessionError::NotConnected.category(), ErrorCategory::Misuse);
        assert_eq!(SessionError::Serialization("x".into()).category(), ErrorCategory::Misuse);
    }

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(SessionError::Transport("reset".into()).is_retryable());
        assert!(SessionError::ConnectionTimeout.is_retryable());
        assert!(!SessionError::Handshake("bad greeting".into()).is_retryable());
        assert!(!SessionError::InvalidUrl("ftp://x".into()).is_retryable());
        let exhausted = SessionError::RetriesExhausted {
            attempts: 3,
            last_error: "x".into(),
        };
        assert!(!exhausted.is_retryable());
        assert!(!SessionError::Aborted.is_retryable());
        assert!(!SessionError::NotConnected.is_retryable());
    }

    #[test]
    fn test_display_contains_details() {
        let err = SessionError::RetriesExhausted { attempts: 5, last_error: "连接被拒绝".into() };
        let text = err.to_string();
        assert!(text.contains('5'));
        assert!(text.contains("连接被拒绝"));
    }
}
