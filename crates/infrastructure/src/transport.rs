//! RPC 传输层
//!
//! 把底层订阅到的消息分发给路由表里的处理器。传输层显式接收
//! 路由表，不做任何隐式扫描注册；每条消息在独立任务中处理，
//! 单条消息的失败只影响它自己。
//!
//! 回复策略集中在 [`reply_payload`] 一个纯函数里：事件路由永不
//! 回复；请求路由把成功结果原样发回，业务错误包装为 `{error}`；
//! 处理器异常只记录日志，调用方等待超时。

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, Instrument};

use application::{
    demultiplex, ApplicationError, BrokerContext, BrokerPublisher, BrokerRouter, HandlerReply,
    RouteKind,
};
use config::TransportConfig;
use domain::TraceContext;

use crate::client::{BrokerClient, Subscription, SubscriptionHandler};
use crate::error::BrokerResult;

/// RPC 传输
pub struct BrokerTransport {
    client: Arc<BrokerClient>,
    router: Arc<BrokerRouter>,
    queue: String,
    subscriptions: Vec<String>,
}

impl BrokerTransport {
    /// 用显式路由表构建传输层
    pub fn new(client: Arc<BrokerClient>, router: BrokerRouter, config: &TransportConfig) -> Self {
        Self {
            client,
            router: Arc::new(router),
            queue: config.queue.clone(),
            subscriptions: config.subscriptions.clone(),
        }
    }

    /// 建立全部底层订阅并开始分发
    ///
    /// 返回的订阅句柄决定投递生命周期，丢弃即停止。
    pub async fn listen(&self) -> BrokerResult<Vec<Subscription>> {
        let dispatcher = Arc::new(Dispatcher {
            client: Arc::clone(&self.client),
            router: Arc::clone(&self.router),
        });

        let mut handles = Vec::with_capacity(self.subscriptions.len());
        for pattern in &self.subscriptions {
            let subscription = self
                .client
                .subscribe(
                    pattern,
                    Some(self.queue.clone()),
                    Arc::clone(&dispatcher) as Arc<dyn SubscriptionHandler>,
                )
                .await?;
            handles.push(subscription);
        }

        info!(
            subscriptions = handles.len(),
            routes = self.router.len(),
            queue = %self.queue,
            "传输层开始监听"
        );
        Ok(handles)
    }
}

/// 订阅消息到路由处理器的分发器
struct Dispatcher {
    client: Arc<BrokerClient>,
    router: Arc<BrokerRouter>,
}

#[async_trait]
impl SubscriptionHandler for Dispatcher {
    async fn on_message(&self, message: domain::WireMessage, pattern: &str) {
        let span = tracing::info_span!(
            "broker.dispatch",
            topic = %message.subject,
            pattern = %pattern,
            trace_id = tracing::field::Empty,
            parent_id = tracing::field::Empty,
        );

        // 上游追踪上下文只作标注，格式非法时静默忽略
        if let Some(trace) = message
            .header("traceparent")
            .and_then(|tp| TraceContext::parse(tp, message.header("tracestate")))
        {
            span.record("trace_id", trace.trace_id.as_str());
            span.record("parent_id", trace.parent_id.as_str());
        }

        let (key, payload) = demultiplex(&message.subject, message.payload.clone());

        let Some(route) = self.router.resolve(&key) else {
            // 无人认领的消息静默丢弃
            debug!(parent: &span, key = %key, "没有匹配的路由");
            return;
        };

        let kind = route.kind;
        let handler = Arc::clone(&route.handler);
        let client = Arc::clone(&self.client);
        let context = BrokerContext::new(
            message,
            pattern,
            Arc::clone(&self.client) as Arc<dyn BrokerPublisher>,
        );

        // 每条消息独立任务处理，互不阻塞；守卫让优雅断开能等到
        // 任务结束
        let guard = self.client.in_flight_guard();
        tokio::spawn(
            async move {
                let _guard = guard;
                let result = handler.handle(payload, &context).await;

                if let Err(e) = &result {
                    error!(error = %e, topic = %context.topic(), "处理器执行失败");
                }

                let Some(reply_subject) = context.reply_subject() else {
                    return;
                };
                let Some(reply) = reply_payload(kind, &result) else {
                    return;
                };

                if let Err(e) = BrokerClient::reply(&client, context.topic(), reply_subject, &reply).await
                {
                    error!(error = %e, reply = %reply_subject, "发送回复失败");
                }
            }
            .instrument(span),
        );
    }
}

/// 决定一次处理要发回什么
///
/// 事件路由永不回复，即使消息带回复主题；请求路由把成功结果
/// 原样发回，业务错误包装为 `{error}`，无内容和处理器异常不回复。
pub fn reply_payload(
    kind: RouteKind,
    result: &Result<HandlerReply, ApplicationError>,
) -> Option<Value> {
    if kind == RouteKind::Event {
        return None;
    }
    match result {
        Ok(HandlerReply::Response(value)) => Some(value.clone()),
        Ok(HandlerReply::Error(value)) => Some(json!({ "error": value })),
        Ok(HandlerReply::Empty) => None,
        Err(_) => None,
    }
}
