//! 线路消息封装
//!
//! Redis 频道本身没有回复主题和头部的概念，所有载荷统一放进
//! JSON 封装的 [`WireMessage`] 传输。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// 回复主题的默认前缀
pub const DEFAULT_INBOX_PREFIX: &str = "_inbox";

/// 一条进出消息代理的线路消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// 消息唯一标识，同时用作消费组抢占键
    pub id: Uuid,
    /// 发布主题
    pub subject: String,
    /// 回复主题（请求/响应语义）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    /// 自由头部（链路追踪、身份提示等）
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// JSON 载荷
    pub payload: Value,
}

impl WireMessage {
    /// 创建普通发布消息
    pub fn new(subject: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            reply: None,
            headers: HashMap::new(),
            payload,
        }
    }

    /// 创建带回复主题的请求消息
    pub fn with_reply(subject: impl Into<String>, payload: Value, reply: impl Into<String>) -> Self {
        let mut message = Self::new(subject, payload);
        message.reply = Some(reply.into());
        message
    }

    /// 附加头部
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// 读取头部
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// RPC 回复封装：`{error}` 或 `{response}` 二选一
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl ReplyEnvelope {
    /// 成功回复
    pub fn response(value: Value) -> Self {
        Self {
            error: None,
            response: Some(value),
        }
    }

    /// 错误回复
    pub fn error(value: Value) -> Self {
        Self {
            error: Some(value),
            response: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_message_roundtrip() {
        let message = WireMessage::with_reply("chat.message.send", json!({"x": 1}), "_inbox.abc");
        let encoded = serde_json::to_string(&message).unwrap();
        let decoded: WireMessage = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.subject, "chat.message.send");
        assert_eq!(decoded.reply.as_deref(), Some("_inbox.abc"));
        assert_eq!(decoded.payload, json!({"x": 1}));
    }

    #[test]
    fn test_headers_omitted_when_empty() {
        let message = WireMessage::new("chat.ping", json!({}));
        let encoded = serde_json::to_string(&message).unwrap();
        assert!(!encoded.contains("headers"));
        assert!(!encoded.contains("reply"));
    }

    #[test]
    fn test_reply_envelope_shapes() {
        let ok = serde_json::to_value(ReplyEnvelope::response(json!({"id": 7}))).unwrap();
        assert_eq!(ok, json!({"response": {"id": 7}}));

        let err = serde_json::to_value(ReplyEnvelope::error(json!("boom"))).unwrap();
        assert_eq!(err, json!({"error": "boom"}));
    }
}
