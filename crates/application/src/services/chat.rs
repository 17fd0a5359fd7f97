//! 消息发送路由
//!
//! 处理 `chat.message.send` 请求：校验载荷、构建消息、扇出到
//! 收件人主题，并把结果回给调用方。校验失败属于业务错误，以
//! 错误回复的形式返回而不是中断处理。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use domain::ChatMessage;

use crate::clock::Clock;
use crate::context::BrokerContext;
use crate::error::ApplicationError;
use crate::router::{HandlerReply, RouteHandler};

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    from: String,
    to: String,
    content: String,
}

pub struct ChatMessageRoute {
    clock: Arc<dyn Clock>,
}

impl ChatMessageRoute {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl RouteHandler for ChatMessageRoute {
    async fn handle(
        &self,
        payload: Value,
        context: &BrokerContext,
    ) -> Result<HandlerReply, ApplicationError> {
        let request: SendMessageRequest = match serde_json::from_value(payload) {
            Ok(request) => request,
            Err(e) => {
                return Ok(HandlerReply::Error(json!({
                    "success": false,
                    "error": format!("invalid send request: {}", e),
                })));
            }
        };

        let message = match ChatMessage::new(
            &request.from,
            &request.to,
            &request.content,
            self.clock.now(),
        ) {
            Ok(message) => message,
            Err(e) => {
                return Ok(HandlerReply::Error(json!({
                    "success": false,
                    "error": e.to_string(),
                })));
            }
        };

        info!(from = %message.from, to = %message.to, message_id = %message.id, "转发聊天消息");
        context
            .client()
            .publish(&message.fanout_subject(), &json!(message))
            .await?;

        Ok(HandlerReply::Response(json!({
            "success": true,
            "message": message,
        })))
    }
}
