//! 单条消息的处理上下文
//!
//! 包装一条入站消息和它命中的订阅模式，向处理器暴露主题、载荷、
//! 头部、派生身份和授权决策槽。上下文归属单个分发任务，不跨
//! 消息共享。

use once_cell::sync::OnceCell;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use domain::{derive_identity, subject, AbilitySet, ActiveIdentity, WireMessage};

use crate::error::ApplicationError;
use crate::publisher::BrokerPublisher;

pub struct BrokerContext {
    message: WireMessage,
    pattern: String,
    client: Arc<dyn BrokerPublisher>,
    identity: OnceCell<Option<ActiveIdentity>>,
    abilities: OnceCell<AbilitySet>,
}

impl BrokerContext {
    pub fn new(
        message: WireMessage,
        pattern: impl Into<String>,
        client: Arc<dyn BrokerPublisher>,
    ) -> Self {
        Self {
            message,
            pattern: pattern.into(),
            client,
            identity: OnceCell::new(),
            abilities: OnceCell::new(),
        }
    }

    /// 实际投递主题
    pub fn topic(&self) -> &str {
        &self.message.subject
    }

    /// 命中的订阅模式
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// 原始载荷
    pub fn payload(&self) -> &Value {
        &self.message.payload
    }

    /// 消息头部
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.message.headers
    }

    /// 完整线路消息
    pub fn message(&self) -> &WireMessage {
        &self.message
    }

    /// 回复主题（请求/响应语义下存在）
    pub fn reply_subject(&self) -> Option<&str> {
        self.message.reply.as_deref()
    }

    /// 主题的第 `index` 个分段
    pub fn topic_token(&self, index: usize) -> Option<&str> {
        subject::token(self.topic(), index)
    }

    /// 供处理器发布/回复的客户端
    pub fn client(&self) -> &Arc<dyn BrokerPublisher> {
        &self.client
    }

    /// 派生调用方身份
    ///
    /// 结果是 (主题, 头部) 的纯函数，同一上下文内只计算一次。
    pub fn user(&self) -> Option<&ActiveIdentity> {
        self.identity
            .get_or_init(|| derive_identity(self.topic(), self.headers()))
            .as_ref()
    }

    /// 附加授权决策，单次处理内只允许写入一次
    pub fn set_abilities(&self, abilities: AbilitySet) -> Result<(), ApplicationError> {
        self.abilities
            .set(abilities)
            .map_err(|_| ApplicationError::AbilitiesAlreadySet)
    }

    /// 读取已附加的授权决策
    pub fn abilities(&self) -> Option<&AbilitySet> {
        self.abilities.get()
    }
}
