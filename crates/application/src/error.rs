use domain::DomainError;
use thiserror::Error;

use crate::publisher::{PublishError, RequestError};

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error("credential expired at {exp}")]
    CredentialExpired { exp: i64 },
    #[error("publish error: {0}")]
    Publish(#[from] PublishError),
    #[error("request error: {0}")]
    Request(#[from] RequestError),
    #[error("abilities already attached")]
    AbilitiesAlreadySet,
    #[error("handler error: {message}")]
    Handler { message: String },
    #[error("infrastructure error: {message}")]
    Infrastructure { message: String },
}

impl ApplicationError {
    /// 创建配置错误
    pub fn configuration(message: impl Into<String>) -> Self {
        ApplicationError::Configuration {
            message: message.into(),
        }
    }

    /// 创建处理器错误
    pub fn handler(message: impl Into<String>) -> Self {
        ApplicationError::Handler {
            message: message.into(),
        }
    }

    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ApplicationError {
    fn from(err: serde_json::Error) -> Self {
        ApplicationError::Domain(err.into())
    }
}
