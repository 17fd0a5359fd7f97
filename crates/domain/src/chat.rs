//! 聊天消息实体
//!
//! 代理层只需要最小的消息形状：发送路由校验载荷、回复调用方、
//! 并按用户主题扇出。持久化由外部协作方完成。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 一条聊天消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub from: String,
    pub to: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    /// 创建消息，校验必填字段
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let from = from.into();
        let to = to.into();
        let content = content.into();

        if from.is_empty() {
            return Err(DomainError::validation("from", "发送方不能为空"));
        }
        if to.is_empty() {
            return Err(DomainError::validation("to", "接收方不能为空"));
        }
        if content.is_empty() {
            return Err(DomainError::validation("content", "消息内容不能为空"));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            from,
            to,
            content,
            sent_at,
        })
    }

    /// 接收方的扇出主题
    pub fn fanout_subject(&self) -> String {
        format!("chat.user.{}.message.new", self.to)
    }
}
