//! 持久化消息流
//!
//! Pub/Sub 只投递给在线订阅者，需要持久化保障的主题改走 Redis
//! Stream：发布方 XADD，消费方以消费组读取并逐条确认，实例离线
//! 期间的消息在重新上线后继续投递。
//!
//! 消费组的创建是幂等的：组已存在时改为原地更新起始位置，不报错
//! 也不重建，保证多实例并发启动安全。

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use application::ApplicationError;
use domain::WireMessage;

use crate::client::BrokerClient;
use crate::error::{BrokerError, BrokerResult};

/// 流键前缀，与 Pub/Sub 频道命名空间隔离
const STREAM_KEY_PREFIX: &str = "stream:";

/// 单次读取的最大条数
const READ_BATCH_SIZE: usize = 16;

/// 阻塞读取的超时（毫秒）
const READ_BLOCK_MS: usize = 5_000;

/// 读取失败后的退避间隔
const READ_RETRY_DELAY: Duration = Duration::from_secs(2);

/// 主题对应的流键
pub fn stream_key(subject: &str) -> String {
    format!("{}{}", STREAM_KEY_PREFIX, subject)
}

impl BrokerClient {
    /// 持久化发布，返回流条目 id
    ///
    /// 返回 `Ok` 即代理已确认写入；返回 `Err` 时调用方不得假设
    /// 消息已持久化，需要自行决定重试或放弃。
    pub async fn stream_publish(&self, subject: &str, payload: &Value) -> BrokerResult<String> {
        let message = WireMessage::new(subject, payload.clone());
        let encoded = serde_json::to_string(&message)?;

        let mut conn = self.manager();
        let entry_id: String = conn
            .xadd(stream_key(subject), "*", &[("message", encoded.as_str())])
            .await
            .map_err(|e| BrokerError::stream(format!("追加流 {} 失败: {}", subject, e)))?;

        debug!(subject = %subject, entry_id = %entry_id, "消息已持久化");
        Ok(entry_id)
    }

    /// 幂等地创建消费组
    ///
    /// 流不存在时一并创建；组已存在时原地把起始位置更新为
    /// `start_id`，重复调用收敛到同一状态。
    pub async fn ensure_consumer_group(
        &self,
        subject: &str,
        group: &str,
        start_id: &str,
    ) -> BrokerResult<()> {
        let key = stream_key(subject);
        let mut conn = self.manager();

        let created: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&key)
            .arg(group)
            .arg(start_id)
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(_) => {
                info!(subject = %subject, group = %group, start_id = %start_id, "消费组已创建");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                let _: String = redis::cmd("XGROUP")
                    .arg("SETID")
                    .arg(&key)
                    .arg(group)
                    .arg(start_id)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| {
                        BrokerError::stream(format!("更新消费组 {} 起始位置失败: {}", group, e))
                    })?;
                info!(subject = %subject, group = %group, start_id = %start_id, "消费组已存在，起始位置已更新");
                Ok(())
            }
            Err(e) => Err(BrokerError::stream(format!(
                "创建消费组 {} 失败: {}",
                group, e
            ))),
        }
    }
}

/// 流条目处理器
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn on_entry(&self, message: WireMessage) -> Result<(), ApplicationError>;
}

/// 持久化流消费者
///
/// 以消费组身份循环读取并逐条处理；处理成功才确认，失败的条目
/// 留在待处理列表等待重投。
pub struct StreamConsumer {
    subject: String,
    group: String,
    consumer: String,
}

impl StreamConsumer {
    pub fn new(
        subject: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            group: group.into(),
            consumer: consumer.into(),
        }
    }

    /// 启动后台消费任务
    pub fn start(
        self,
        client: Arc<BrokerClient>,
        handler: Arc<dyn StreamHandler>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let key = stream_key(&self.subject);
            let mut conn = client.manager();
            info!(subject = %self.subject, group = %self.group, consumer = %self.consumer, "流消费者启动");

            loop {
                let options = StreamReadOptions::default()
                    .group(&self.group, &self.consumer)
                    .block(READ_BLOCK_MS)
                    .count(READ_BATCH_SIZE);

                let reply: Result<Option<StreamReadReply>, redis::RedisError> = conn
                    .xread_options(&[&key], &[">"], &options)
                    .await;

                let reply = match reply {
                    Ok(Some(reply)) => reply,
                    // BLOCK 超时，没有新条目
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(subject = %self.subject, error = %e, "读取流失败，稍后重试");
                        tokio::time::sleep(READ_RETRY_DELAY).await;
                        continue;
                    }
                };

                for stream in reply.keys {
                    for entry in stream.ids {
                        let Some(encoded) = entry.get::<String>("message") else {
                            warn!(entry_id = %entry.id, "流条目缺少消息字段，跳过并确认");
                            Self::ack(&mut conn, &key, &self.group, &entry.id).await;
                            continue;
                        };

                        let message: WireMessage = match serde_json::from_str(&encoded) {
                            Ok(message) => message,
                            Err(e) => {
                                warn!(entry_id = %entry.id, error = %e, "流条目无法解析，跳过并确认");
                                Self::ack(&mut conn, &key, &self.group, &entry.id).await;
                                continue;
                            }
                        };

                        match handler.on_entry(message).await {
                            Ok(()) => Self::ack(&mut conn, &key, &self.group, &entry.id).await,
                            Err(e) => {
                                // 不确认，条目留在待处理列表等待重投
                                warn!(entry_id = %entry.id, error = %e, "流条目处理失败");
                            }
                        }
                    }
                }
            }
        })
    }

    async fn ack(conn: &mut ConnectionManager, key: &str, group: &str, entry_id: &str) {
        let acked: Result<i64, redis::RedisError> = conn.xack(key, group, &[entry_id]).await;
        if let Err(e) = acked {
            warn!(entry_id = %entry_id, error = %e, "确认流条目失败");
        }
    }
}
