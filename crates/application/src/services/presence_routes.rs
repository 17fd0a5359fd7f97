//! 在线状态事件路由
//!
//! `chat.presence` 订阅通过 `action` 字段多路分发到这里的两个
//! 事件路由。事件路由永不回复，即使消息带回复主题。用户 id 优先
//! 取载荷里的 `userId`，缺省时回落到派生身份。

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::context::BrokerContext;
use crate::error::ApplicationError;
use crate::presence::PresenceTracker;
use crate::router::{HandlerReply, RouteHandler};

fn resolve_user_id(payload: &Value, context: &BrokerContext) -> Option<String> {
    payload
        .get("userId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .or_else(|| context.user().map(|identity| identity.id.clone()))
}

pub struct PresenceHeartbeatRoute {
    tracker: Arc<PresenceTracker>,
}

impl PresenceHeartbeatRoute {
    pub fn new(tracker: Arc<PresenceTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl RouteHandler for PresenceHeartbeatRoute {
    async fn handle(
        &self,
        payload: Value,
        context: &BrokerContext,
    ) -> Result<HandlerReply, ApplicationError> {
        match resolve_user_id(&payload, context) {
            Some(user_id) => self.tracker.heartbeat(&user_id).await,
            None => debug!(topic = %context.topic(), "心跳消息缺少用户标识，忽略"),
        }
        Ok(HandlerReply::Empty)
    }
}

pub struct PresenceDisconnectRoute {
    tracker: Arc<PresenceTracker>,
}

impl PresenceDisconnectRoute {
    pub fn new(tracker: Arc<PresenceTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl RouteHandler for PresenceDisconnectRoute {
    async fn handle(
        &self,
        payload: Value,
        context: &BrokerContext,
    ) -> Result<HandlerReply, ApplicationError> {
        match resolve_user_id(&payload, context) {
            Some(user_id) => self.tracker.remove_user(&user_id).await,
            None => debug!(topic = %context.topic(), "下线消息缺少用户标识，忽略"),
        }
        Ok(HandlerReply::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::presence::memory::MemoryLastSeenStore;
    use crate::presence::PresenceSettings;
    use crate::publisher::{BrokerPublisher, PublishError, RequestError, RequestOptions};
    use domain::WireMessage;
    use serde_json::json;
    use std::time::Duration;

    struct NullPublisher;

    #[async_trait]
    impl BrokerPublisher for NullPublisher {
        async fn publish(&self, _subject: &str, _payload: &Value) -> Result<(), PublishError> {
            Ok(())
        }

        async fn reply(
            &self,
            _request_subject: &str,
            _reply_subject: &str,
            _payload: &Value,
        ) -> Result<(), PublishError> {
            Ok(())
        }

        async fn request(
            &self,
            _subject: &str,
            _payload: &Value,
            _options: RequestOptions,
        ) -> Result<Value, RequestError> {
            Ok(Value::Null)
        }
    }

    fn tracker() -> Arc<PresenceTracker> {
        Arc::new(PresenceTracker::new(
            Arc::new(NullPublisher),
            Arc::new(MemoryLastSeenStore::new()),
            Arc::new(SystemClock),
            PresenceSettings {
                heartbeat_timeout: Duration::from_secs(60),
                sweep_interval: Duration::from_secs(10),
                broadcast_subject: "chat.presence.online".to_string(),
            },
        ))
    }

    fn context(topic: &str) -> BrokerContext {
        BrokerContext::new(
            WireMessage::new(topic, json!({})),
            "chat.presence",
            Arc::new(NullPublisher),
        )
    }

    #[tokio::test]
    async fn test_heartbeat_marks_user_online() {
        let tracker = tracker();
        let route = PresenceHeartbeatRoute::new(tracker.clone());

        let reply = route
            .handle(json!({"userId": "u1"}), &context("chat.presence"))
            .await
            .unwrap();

        assert_eq!(reply, HandlerReply::Empty);
        assert!(tracker.is_online("u1").await);
    }

    #[tokio::test]
    async fn test_heartbeat_falls_back_to_derived_identity() {
        let tracker = tracker();
        let route = PresenceHeartbeatRoute::new(tracker.clone());

        // 载荷无 userId 时取主题第三段派生的身份
        route
            .handle(json!({}), &context("local1.user.u42.heartbeat"))
            .await
            .unwrap();

        assert!(tracker.is_online("u42").await);
    }

    #[tokio::test]
    async fn test_heartbeat_without_any_identity_is_ignored() {
        let tracker = tracker();
        let route = PresenceHeartbeatRoute::new(tracker.clone());

        route
            .handle(json!({}), &context("chat.presence"))
            .await
            .unwrap();

        assert!(tracker.online_users().await.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_removes_user() {
        let tracker = tracker();
        tracker.heartbeat("u1").await;

        let route = PresenceDisconnectRoute::new(tracker.clone());
        let reply = route
            .handle(json!({"userId": "u1"}), &context("chat.presence"))
            .await
            .unwrap();

        assert_eq!(reply, HandlerReply::Empty);
        assert!(!tracker.is_online("u1").await);
    }
}
