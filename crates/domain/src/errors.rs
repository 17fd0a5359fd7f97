//! 领域模型错误定义

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 主题格式错误
    #[error("主题格式错误: {message}")]
    InvalidSubject { message: String },

    /// nkey密钥错误
    #[error("密钥错误: {message}")]
    InvalidKey { message: String },

    /// 凭证格式错误
    #[error("凭证错误: {message}")]
    InvalidCredential { message: String },

    /// 签名验证失败
    #[error("签名验证失败")]
    SignatureVerification,

    /// 序列化错误
    #[error("序列化错误: {message}")]
    Serialization { message: String },

    /// 验证错误
    #[error("验证失败: {field}: {message}")]
    ValidationError { field: String, message: String },
}

impl DomainError {
    /// 创建主题错误
    pub fn invalid_subject(message: impl Into<String>) -> Self {
        Self::InvalidSubject {
            message: message.into(),
        }
    }

    /// 创建密钥错误
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// 创建凭证错误
    pub fn invalid_credential(message: impl Into<String>) -> Self {
        Self::InvalidCredential {
            message: message.into(),
        }
    }

    /// 创建验证错误
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization {
            message: err.to_string(),
        }
    }
}
