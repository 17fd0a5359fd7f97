//! 消息代理集成测试
//!
//! 需要本地 Redis 实例，设置 REDIS_INTEGRATION_TEST=1 后运行。

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use application::{
    ApplicationError, BrokerContext, BrokerPublisher, BrokerRouter, HandlerReply, RequestOptions,
    Route, RouteHandler,
};
use config::{BrokerConfig, TransportConfig};
use domain::WireMessage;
use infrastructure::{
    BrokerClient, BrokerTransport, StreamConsumer, StreamHandler, SubscriptionHandler,
};

fn integration_enabled() -> bool {
    std::env::var("REDIS_INTEGRATION_TEST").is_ok()
}

fn test_config() -> BrokerConfig {
    BrokerConfig {
        url: std::env::var("BROKER_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        client_id: format!("test-{}", Uuid::new_v4().simple()),
        inbox_prefix: "_inbox".to_string(),
        request_timeout_ms: 2000,
        reconnect_interval_ms: 500,
    }
}

/// 每个测试使用独立的主题前缀，避免互相干扰
fn unique_topic(base: &str) -> String {
    format!("{}.{}", Uuid::new_v4().simple(), base)
}

#[derive(Default)]
struct CollectingHandler {
    received: Mutex<Vec<WireMessage>>,
}

impl CollectingHandler {
    fn received(&self) -> Vec<WireMessage> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubscriptionHandler for CollectingHandler {
    async fn on_message(&self, message: WireMessage, _pattern: &str) {
        self.received.lock().unwrap().push(message);
    }
}

/// 轮询等待直到条件满足或超时
async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

#[tokio::test]
async fn test_publish_subscribe_with_wildcard_filtering() {
    if !integration_enabled() {
        return;
    }

    let client = BrokerClient::connect(&test_config()).await.unwrap();
    let prefix = Uuid::new_v4().simple().to_string();
    let pattern = format!("{}.user.*.message.new", prefix);

    let handler = Arc::new(CollectingHandler::default());
    let _subscription = client
        .subscribe(&pattern, None, handler.clone())
        .await
        .unwrap();

    // 匹配：* 恰好对应一个分段
    client
        .publish(
            &format!("{}.user.u2.message.new", prefix),
            &json!({"content": "hi"}),
        )
        .await
        .unwrap();
    // 不匹配：glob 会放行，但进程内精确匹配必须过滤掉
    client
        .publish(
            &format!("{}.user.a.b.message.new", prefix),
            &json!({"content": "no"}),
        )
        .await
        .unwrap();

    assert!(wait_until(|| handler.received().len() >= 1, Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let received = handler.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].subject, format!("{}.user.u2.message.new", prefix));
}

#[tokio::test]
async fn test_request_reply_roundtrip() {
    if !integration_enabled() {
        return;
    }

    let client = Arc::new(BrokerClient::connect(&test_config()).await.unwrap());
    let topic = unique_topic("echo");

    struct Responder {
        client: Arc<BrokerClient>,
    }

    #[async_trait]
    impl SubscriptionHandler for Responder {
        async fn on_message(&self, message: WireMessage, _pattern: &str) {
            if let Some(reply) = &message.reply {
                let payload = json!({"echo": message.payload});
                self.client
                    .reply(&message.subject, reply, &payload)
                    .await
                    .unwrap();
            }
        }
    }

    let _subscription = client
        .subscribe(
            &topic,
            None,
            Arc::new(Responder {
                client: client.clone(),
            }),
        )
        .await
        .unwrap();

    let reply = client
        .request(&topic, &json!({"n": 7}), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(reply, json!({"echo": {"n": 7}}));
}

#[tokio::test]
async fn test_request_times_out_without_responder() {
    if !integration_enabled() {
        return;
    }

    let client = BrokerClient::connect(&test_config()).await.unwrap();
    let topic = unique_topic("nobody.home");

    let result = client
        .request(&topic, &json!({}), RequestOptions::with_timeout(300))
        .await;
    assert!(matches!(
        result,
        Err(infrastructure::BrokerError::Timeout { .. })
    ));
}

#[tokio::test]
async fn test_queue_group_splits_load() {
    if !integration_enabled() {
        return;
    }

    let client = BrokerClient::connect(&test_config()).await.unwrap();
    let topic = unique_topic("work");
    let queue = format!("q-{}", Uuid::new_v4().simple());

    let first = Arc::new(CollectingHandler::default());
    let second = Arc::new(CollectingHandler::default());
    let _sub1 = client
        .subscribe(&topic, Some(queue.clone()), first.clone())
        .await
        .unwrap();
    let _sub2 = client
        .subscribe(&topic, Some(queue.clone()), second.clone())
        .await
        .unwrap();

    const TOTAL: usize = 20;
    for i in 0..TOTAL {
        client.publish(&topic, &json!({"seq": i})).await.unwrap();
    }

    assert!(
        wait_until(
            || first.received().len() + second.received().len() >= TOTAL,
            Duration::from_secs(3)
        )
        .await
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    // 同组实例分摊：每条消息恰好投递一次
    assert_eq!(first.received().len() + second.received().len(), TOTAL);
}

#[tokio::test]
async fn test_consumer_group_provisioning_is_idempotent() {
    if !integration_enabled() {
        return;
    }

    let client = BrokerClient::connect(&test_config()).await.unwrap();
    let topic = unique_topic("durable");

    // 重复创建不报错，收敛到同一状态
    client
        .ensure_consumer_group(&topic, "workers", "$")
        .await
        .unwrap();
    client
        .ensure_consumer_group(&topic, "workers", "$")
        .await
        .unwrap();
    client
        .ensure_consumer_group(&topic, "workers", "0")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_stream_publish_and_consume() {
    if !integration_enabled() {
        return;
    }

    let client = Arc::new(BrokerClient::connect(&test_config()).await.unwrap());
    let topic = unique_topic("audit");

    client
        .ensure_consumer_group(&topic, "workers", "0")
        .await
        .unwrap();

    let entry_id = client
        .stream_publish(&topic, &json!({"event": "login"}))
        .await
        .unwrap();
    assert!(entry_id.contains('-'));

    #[derive(Default)]
    struct Collector {
        entries: Mutex<Vec<WireMessage>>,
    }

    #[async_trait]
    impl StreamHandler for Collector {
        async fn on_entry(&self, message: WireMessage) -> Result<(), ApplicationError> {
            self.entries.lock().unwrap().push(message);
            Ok(())
        }
    }

    let collector = Arc::new(Collector::default());
    let task = StreamConsumer::new(&topic, "workers", "c1").start(client.clone(), collector.clone());

    assert!(
        wait_until(
            || !collector.entries.lock().unwrap().is_empty(),
            Duration::from_secs(3)
        )
        .await
    );
    task.abort();

    let entries = collector.entries.lock().unwrap().clone();
    assert_eq!(entries[0].subject, topic);
    assert_eq!(entries[0].payload, json!({"event": "login"}));
}

#[tokio::test]
async fn test_transport_dispatches_send_and_replies() {
    if !integration_enabled() {
        return;
    }

    let client = Arc::new(BrokerClient::connect(&test_config()).await.unwrap());
    let prefix = Uuid::new_v4().simple().to_string();
    let send_topic = format!("{}.chat.message.send", prefix);

    struct SendRoute;

    #[async_trait]
    impl RouteHandler for SendRoute {
        async fn handle(
            &self,
            payload: Value,
            context: &BrokerContext,
        ) -> Result<HandlerReply, ApplicationError> {
            let to = payload["to"].as_str().unwrap_or_default().to_string();
            if to.is_empty() {
                return Ok(HandlerReply::Error(json!("missing recipient")));
            }
            let fanout = format!("{}.new", context.topic().replace("message.send", &to));
            context.client().publish(&fanout, &payload).await?;
            Ok(HandlerReply::Response(json!({"success": true})))
        }
    }

    let mut router = BrokerRouter::new();
    router.add_route(&send_topic, Route::request(Arc::new(SendRoute)));

    let transport = BrokerTransport::new(
        client.clone(),
        router,
        &TransportConfig {
            queue: format!("q-{}", prefix),
            subscriptions: vec![send_topic.clone()],
        },
    );
    let _handles = transport.listen().await.unwrap();

    // 成功路径：原样收到处理器的返回值
    let reply = client
        .request(
            &send_topic,
            &json!({"from": "u1", "to": "u2", "content": "hello"}),
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(reply, json!({"success": true}));

    // 业务错误被包装为 {error}
    let reply = client
        .request(
            &send_topic,
            &json!({"from": "u1", "content": "hello"}),
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(reply, json!({"error": "missing recipient"}));
}

#[tokio::test]
async fn test_graceful_disconnect_waits_for_in_flight_message() {
    if !integration_enabled() {
        return;
    }

    let client = Arc::new(BrokerClient::connect(&test_config()).await.unwrap());
    let prefix = Uuid::new_v4().simple().to_string();
    let topic = format!("{}.chat.slow", prefix);

    #[derive(Default)]
    struct SlowRoute {
        completed: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl RouteHandler for SlowRoute {
        async fn handle(
            &self,
            payload: Value,
            _context: &BrokerContext,
        ) -> Result<HandlerReply, ApplicationError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            self.completed.lock().unwrap().push(payload);
            Ok(HandlerReply::Empty)
        }
    }

    let route = Arc::new(SlowRoute::default());
    let mut router = BrokerRouter::new();
    router.add_route(&topic, Route::event(route.clone()));

    let transport = BrokerTransport::new(
        client.clone(),
        router,
        &TransportConfig {
            queue: format!("q-{}", prefix),
            subscriptions: vec![topic.clone()],
        },
    );
    let handles = transport.listen().await.unwrap();

    client.publish(&topic, &json!({"seq": 1})).await.unwrap();
    // 等消息进入处理器后再发起断开
    tokio::time::sleep(Duration::from_millis(200)).await;

    // 优雅断开必须等慢处理器跑完才返回
    client.disconnect(true).await;
    assert_eq!(route.completed.lock().unwrap().len(), 1);

    // 断开后发布的消息不再投递
    client.publish(&topic, &json!({"seq": 2})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(route.completed.lock().unwrap().len(), 1);

    drop(handles);
}

#[tokio::test]
async fn test_transport_demultiplexes_action_field() {
    if !integration_enabled() {
        return;
    }

    let client = Arc::new(BrokerClient::connect(&test_config()).await.unwrap());
    let prefix = Uuid::new_v4().simple().to_string();
    let presence_topic = format!("{}.chat.presence", prefix);

    #[derive(Default)]
    struct HeartbeatRoute {
        seen: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl RouteHandler for HeartbeatRoute {
        async fn handle(
            &self,
            payload: Value,
            _context: &BrokerContext,
        ) -> Result<HandlerReply, ApplicationError> {
            self.seen.lock().unwrap().push(payload);
            Ok(HandlerReply::Empty)
        }
    }

    let route = Arc::new(HeartbeatRoute::default());
    let mut router = BrokerRouter::new();
    router.add_route(
        format!("{}.heartbeat", presence_topic),
        Route::event(route.clone()),
    );

    let transport = BrokerTransport::new(
        client.clone(),
        router,
        &TransportConfig {
            queue: format!("q-{}", prefix),
            subscriptions: vec![presence_topic.clone()],
        },
    );
    let _handles = transport.listen().await.unwrap();

    // action 字段决定分发键，data 字段成为处理器载荷
    client
        .publish(
            &presence_topic,
            &json!({"action": "heartbeat", "data": {"userId": "u1"}}),
        )
        .await
        .unwrap();
    // 未注册的 action 静默丢弃
    client
        .publish(&presence_topic, &json!({"action": "unknown"}))
        .await
        .unwrap();

    assert!(
        wait_until(
            || !route.seen.lock().unwrap().is_empty(),
            Duration::from_secs(2)
        )
        .await
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    let seen = route.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![json!({"userId": "u1"})]);
}
