//! 消息代理错误类型定义

use thiserror::Error;

/// 消息代理操作错误
#[derive(Error, Debug)]
pub enum BrokerError {
    /// 连接错误
    #[error("代理连接错误: {message}")]
    ConnectionError { message: String },

    /// 发布错误
    #[error("代理发布错误: {message}")]
    PublishError { message: String },

    /// 订阅错误
    #[error("代理订阅错误: {message}")]
    SubscribeError { message: String },

    /// 流操作错误
    #[error("流操作错误: {message}")]
    StreamError { message: String },

    /// 序列化错误
    #[error("序列化错误: {message}")]
    SerializationError { message: String },

    /// 请求超时
    #[error("请求超时: {subject} 在 {timeout_ms}ms 内未收到回复")]
    Timeout { subject: String, timeout_ms: u64 },
}

/// 代理结果类型
pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
        }
    }

    pub fn publish(message: impl Into<String>) -> Self {
        Self::PublishError {
            message: message.into(),
        }
    }

    pub fn subscribe(message: impl Into<String>) -> Self {
        Self::SubscribeError {
            message: message.into(),
        }
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::StreamError {
            message: message.into(),
        }
    }
}

impl From<redis::RedisError> for BrokerError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::InvalidClientConfig => BrokerError::ConnectionError {
                message: format!("客户端配置无效: {}", err),
            },
            redis::ErrorKind::IoError => BrokerError::ConnectionError {
                message: err.to_string(),
            },
            _ => BrokerError::ConnectionError {
                message: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::SerializationError {
            message: err.to_string(),
        }
    }
}
