//! 消息代理客户端
//!
//! 在 Redis Pub/Sub 之上实现主题发布、通配符订阅、消费组负载
//! 分摊和请求/响应。所有载荷经由 [`WireMessage`] JSON 封装传输，
//! 频道名即主题名。
//!
//! 通配符订阅走 PSUBSCRIBE：glob 的 `*` 可跨越点号，模式会过度
//! 匹配，投递前在进程内用精确匹配再过滤一次。消费组语义通过
//! 按消息 id 的抢占键实现：同组多个实例只有抢到键的那个投递。

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use application::{BrokerPublisher, PublishError, RequestError, RequestOptions};
use config::BrokerConfig;
use domain::{subject, WireMessage};

use crate::connection::BrokerConnection;
use crate::error::{BrokerError, BrokerResult};

/// 消费组抢占键的存活时间（毫秒）
const QUEUE_CLAIM_TTL_MS: u64 = 30_000;

/// 优雅断开时等待在途处理的上限
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// 在途工作计数器
///
/// 订阅循环和派生的处理任务各持有一个守卫，守卫全部释放即
/// 排空完成。
#[derive(Clone, Default)]
pub(crate) struct InFlightTracker {
    active: Arc<AtomicUsize>,
}

impl InFlightTracker {
    pub(crate) fn guard(&self) -> InFlightGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            active: Arc::clone(&self.active),
        }
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// 等待全部在途工作结束，超时返回 `false`
    pub(crate) async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.active() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }
}

pub(crate) struct InFlightGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 订阅消息处理器
#[async_trait]
pub trait SubscriptionHandler: Send + Sync {
    async fn on_message(&self, message: WireMessage, pattern: &str);
}

/// 一个活跃订阅的句柄，丢弃即停止投递
pub struct Subscription {
    pattern: String,
    queue: Option<String>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 消息代理客户端
pub struct BrokerClient {
    connection: BrokerConnection,
    request_timeout_ms: u64,
    shutdown: watch::Sender<bool>,
    in_flight: InFlightTracker,
}

impl BrokerClient {
    /// 连接代理并创建客户端
    pub async fn connect(config: &BrokerConfig) -> BrokerResult<Self> {
        let connection = BrokerConnection::connect(config).await?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            connection,
            request_timeout_ms: config.request_timeout_ms,
            shutdown,
            in_flight: InFlightTracker::default(),
        })
    }

    pub fn client_id(&self) -> &str {
        self.connection.client_id()
    }

    pub(crate) fn manager(&self) -> ConnectionManager {
        self.connection.manager()
    }

    pub(crate) fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.guard()
    }

    /// 断开客户端
    ///
    /// 优雅模式下先通知所有订阅循环停止接收，再等待在途消息和
    /// 已派生的处理任务结束（有上限，超时只记录不报错）；非优雅
    /// 模式只发停止信号立即返回。两种模式都不会失败。
    pub async fn disconnect(&self, graceful: bool) {
        let _ = self.shutdown.send(true);

        if !graceful {
            info!("客户端已断开（未排空）");
            return;
        }

        if self.in_flight.drain(DRAIN_TIMEOUT).await {
            info!("在途工作已排空，客户端断开");
        } else {
            warn!(
                remaining = self.in_flight.active(),
                "排空超时，仍有在途工作未结束"
            );
        }
    }

    /// 发布一条消息，尽力而为，至多一次
    pub async fn publish(&self, subject: &str, payload: &Value) -> BrokerResult<()> {
        self.publish_message(&WireMessage::new(subject, payload.clone()))
            .await
    }

    /// 发布完整的线路消息
    pub async fn publish_message(&self, message: &WireMessage) -> BrokerResult<()> {
        let encoded = serde_json::to_string(message)?;
        let mut conn = self.connection.manager();
        let receivers: i64 = conn
            .publish(&message.subject, encoded)
            .await
            .map_err(|e| BrokerError::publish(format!("发布到 {} 失败: {}", message.subject, e)))?;

        debug!(subject = %message.subject, receivers = receivers, "消息已发布");
        Ok(())
    }

    /// 发布请求并等待恰好一个回复
    ///
    /// 为每次请求生成一次性回复主题并在独占连接上订阅，订阅确认
    /// 后才发布请求，保证回复不会先于订阅到达。
    pub async fn request(
        &self,
        subject: &str,
        payload: &Value,
        options: RequestOptions,
    ) -> BrokerResult<Value> {
        let inbox = format!(
            "{}.{}",
            self.connection.inbox_prefix(),
            Uuid::new_v4().simple()
        );

        let mut pubsub = self.connection.pubsub().await?;
        pubsub
            .subscribe(&inbox)
            .await
            .map_err(|e| BrokerError::subscribe(format!("订阅回复主题失败: {}", e)))?;

        let message = WireMessage::with_reply(subject, payload.clone(), &inbox)
            .with_headers(options.headers);
        self.publish_message(&message).await?;

        let timeout_ms = options.timeout_ms.unwrap_or(self.request_timeout_ms);
        let mut replies = pubsub.into_on_message();

        match tokio::time::timeout(Duration::from_millis(timeout_ms), replies.next()).await {
            Ok(Some(msg)) => {
                let reply: WireMessage = serde_json::from_slice(msg.get_payload_bytes())?;
                debug!(subject = %subject, "收到请求回复");
                Ok(reply.payload)
            }
            Ok(None) => Err(BrokerError::connection("回复连接在等待期间中断")),
            Err(_) => Err(BrokerError::Timeout {
                subject: subject.to_string(),
                timeout_ms,
            }),
        }
    }

    /// 把处理结果发回请求方的一次性回复主题
    pub async fn reply(
        &self,
        request_subject: &str,
        reply_subject: &str,
        payload: &Value,
    ) -> BrokerResult<()> {
        debug!(request = %request_subject, reply = %reply_subject, "发送回复");
        self.publish_message(&WireMessage::new(reply_subject, payload.clone()))
            .await
    }

    /// 订阅主题模式
    ///
    /// `queue` 给定时同组实例分摊消息：每条消息按 id 抢占，抢到
    /// 的实例投递，其余实例丢弃。抢占失败（代理不可达）时降级为
    /// 正常投递，宁可重复也不丢失。
    pub async fn subscribe(
        &self,
        pattern: &str,
        queue: Option<String>,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> BrokerResult<Subscription> {
        let mut pubsub = self.connection.pubsub().await?;

        let wildcard = pattern.contains(subject::WILDCARD_TOKEN)
            || pattern.contains(subject::WILDCARD_TAIL);
        if wildcard {
            let glob = subject::to_redis_glob(pattern);
            pubsub
                .psubscribe(&glob)
                .await
                .map_err(|e| BrokerError::subscribe(format!("订阅模式 {} 失败: {}", glob, e)))?;
        } else {
            pubsub
                .subscribe(pattern)
                .await
                .map_err(|e| BrokerError::subscribe(format!("订阅主题 {} 失败: {}", pattern, e)))?;
        }

        info!(pattern = %pattern, queue = ?queue, "订阅已建立");

        let pattern_owned = pattern.to_string();
        let queue_owned = queue.clone();
        let manager = self.connection.manager();
        let mut shutdown = self.shutdown.subscribe();
        let guard = self.in_flight.guard();

        let task = tokio::spawn(async move {
            let _guard = guard;
            let mut messages = pubsub.into_on_message();
            loop {
                let msg = tokio::select! {
                    // 停止信号只在消息间隙生效，当前消息处理完才退出
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                    maybe = messages.next() => match maybe {
                        Some(msg) => msg,
                        None => break,
                    },
                };

                let message: WireMessage = match serde_json::from_slice(msg.get_payload_bytes()) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(pattern = %pattern_owned, error = %e, "丢弃无法解析的消息");
                        continue;
                    }
                };

                // glob 过度匹配的消息在这里过滤掉
                if !subject::matches(&pattern_owned, &message.subject) {
                    continue;
                }

                if let Some(queue) = &queue_owned {
                    match claim_for_queue(manager.clone(), queue, &message.id).await {
                        Ok(true) => {}
                        Ok(false) => {
                            debug!(queue = %queue, message_id = %message.id, "消息已被同组其他实例抢占");
                            continue;
                        }
                        Err(e) => {
                            warn!(queue = %queue, error = %e, "消费组抢占失败，降级为正常投递");
                        }
                    }
                }

                handler.on_message(message, &pattern_owned).await;
            }
            info!(pattern = %pattern_owned, "订阅流已结束");
        });

        Ok(Subscription {
            pattern: pattern.to_string(),
            queue,
            task,
        })
    }
}

/// 以消息 id 为键做消费组抢占，返回是否抢到
async fn claim_for_queue(
    mut conn: ConnectionManager,
    queue: &str,
    message_id: &Uuid,
) -> BrokerResult<bool> {
    let key = format!("qgroup:{}:{}", queue, message_id);
    let outcome: Option<String> = redis::cmd("SET")
        .arg(&key)
        .arg(1)
        .arg("NX")
        .arg("PX")
        .arg(QUEUE_CLAIM_TTL_MS)
        .query_async(&mut conn)
        .await?;
    Ok(outcome.is_some())
}

#[async_trait]
impl BrokerPublisher for BrokerClient {
    async fn publish(&self, subject: &str, payload: &Value) -> Result<(), PublishError> {
        BrokerClient::publish(self, subject, payload)
            .await
            .map_err(|e| PublishError::failed(e.to_string()))
    }

    async fn reply(
        &self,
        request_subject: &str,
        reply_subject: &str,
        payload: &Value,
    ) -> Result<(), PublishError> {
        BrokerClient::reply(self, request_subject, reply_subject, payload)
            .await
            .map_err(|e| PublishError::failed(e.to_string()))
    }

    async fn request(
        &self,
        subject: &str,
        payload: &Value,
        options: RequestOptions,
    ) -> Result<Value, RequestError> {
        match BrokerClient::request(self, subject, payload, options).await {
            Ok(value) => Ok(value),
            Err(BrokerError::Timeout {
                subject,
                timeout_ms,
            }) => Err(RequestError::Timeout {
                subject,
                timeout_ms,
            }),
            Err(e) => Err(RequestError::Failed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let tracker = InFlightTracker::default();
        assert_eq!(tracker.active(), 0);

        let first = tracker.guard();
        let second = tracker.guard();
        assert_eq!(tracker.active(), 2);

        drop(first);
        assert_eq!(tracker.active(), 1);
        drop(second);
        assert_eq!(tracker.active(), 0);
    }

    #[tokio::test]
    async fn test_drain_waits_for_outstanding_work() {
        let tracker = InFlightTracker::default();
        let guard = tracker.guard();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.drain(Duration::from_secs(1)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_drain_times_out_while_work_is_held() {
        let tracker = InFlightTracker::default();
        let _guard = tracker.guard();

        assert!(!tracker.drain(Duration::from_millis(100)).await);
        assert_eq!(tracker.active(), 1);
    }
}
