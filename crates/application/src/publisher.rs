//! 消息代理发布抽象
//!
//! 应用层通过该 trait 发布、回复和请求，具体的代理客户端由
//! 基础设施层实现（测试中可用内存实现替换）。

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// 默认请求超时（毫秒）
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish failed: {0}")]
    Failed(String),
}

impl PublishError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    /// 请求在超时时间内未收到回复
    #[error("request timed out: {subject} after {timeout_ms}ms")]
    Timeout { subject: String, timeout_ms: u64 },
    #[error("request failed: {0}")]
    Failed(String),
}

/// 请求选项
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// 超时（毫秒），缺省时由客户端配置决定
    pub timeout_ms: Option<u64>,
    /// 附加头部（链路追踪、身份提示）
    pub headers: HashMap<String, String>,
}

impl RequestOptions {
    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            timeout_ms: Some(timeout_ms),
            headers: HashMap::new(),
        }
    }
}

/// 发布/回复/请求的统一入口
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    /// 尽力而为的发布，至多一次，无确认
    async fn publish(&self, subject: &str, payload: &Value) -> Result<(), PublishError>;

    /// 将处理结果发回请求方的回复主题
    async fn reply(
        &self,
        request_subject: &str,
        reply_subject: &str,
        payload: &Value,
    ) -> Result<(), PublishError>;

    /// 发布请求并等待恰好一个回复
    async fn request(
        &self,
        subject: &str,
        payload: &Value,
        options: RequestOptions,
    ) -> Result<Value, RequestError>;
}
