//! 路由表与消息多路分发
//!
//! 传输层把复合主题拆成分发键后在这里查表。一个键只对应一个
//! 处理器；重复注册时后注册者生效（确定性行为）。

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::context::BrokerContext;
use crate::error::ApplicationError;

/// 处理器返回的结果
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerReply {
    /// 成功结果，原样发回调用方
    Response(Value),
    /// 业务错误，包装为 `{error: …}` 发回
    Error(Value),
    /// 无回复内容
    Empty,
}

/// 路由类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// 请求/响应路由：有回复主题时把结果发回调用方
    Request,
    /// 事件路由：从不回复，即使消息携带回复主题
    Event,
}

/// 消息处理器
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(
        &self,
        payload: Value,
        context: &BrokerContext,
    ) -> Result<HandlerReply, ApplicationError>;
}

/// 一条路由
pub struct Route {
    pub kind: RouteKind,
    pub handler: Arc<dyn RouteHandler>,
}

impl Route {
    pub fn request(handler: Arc<dyn RouteHandler>) -> Self {
        Self {
            kind: RouteKind::Request,
            handler,
        }
    }

    pub fn event(handler: Arc<dyn RouteHandler>) -> Self {
        Self {
            kind: RouteKind::Event,
            handler,
        }
    }
}

/// 分发键到处理器的路由表，启动时构建完毕后只读
#[derive(Default)]
pub struct BrokerRouter {
    routes: HashMap<String, Route>,
}

impl BrokerRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册路由，重复注册时后注册者生效
    pub fn add_route(&mut self, pattern: impl Into<String>, route: Route) {
        let pattern = pattern.into();
        if self.routes.insert(pattern.clone(), route).is_some() {
            warn!(pattern = %pattern, "路由重复注册，后注册者生效");
        }
    }

    /// 按分发键查找路由
    pub fn resolve(&self, key: &str) -> Option<&Route> {
        self.routes.get(key)
    }

    /// 已注册的分发键
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// 主题多路分解
///
/// 载荷携带 `action` 字段时，分发键变为 `topic.action`，载荷被
/// 其嵌套的 `data` 字段取代（没有 `data` 时去掉 `action` 后原样
/// 保留）。这样多个逻辑操作可以共享一个通配符订阅。
pub fn demultiplex(topic: &str, payload: Value) -> (String, Value) {
    let Value::Object(mut fields) = payload else {
        return (topic.to_string(), payload);
    };

    let action = fields
        .remove("action")
        .and_then(|v| v.as_str().map(str::to_string));

    match action {
        Some(action) => {
            let key = format!("{}.{}", topic, action);
            let payload = fields
                .remove("data")
                .unwrap_or(Value::Object(fields));
            (key, payload)
        }
        None => (topic.to_string(), Value::Object(fields)),
    }
}
