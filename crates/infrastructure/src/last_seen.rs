//! 最后在线时间的 Redis 存储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::sync::Arc;

use application::{ApplicationError, LastSeenStore};

use crate::client::BrokerClient;

/// 存放最后在线时间的哈希键
const LAST_SEEN_KEY: &str = "presence:last_seen";

pub struct RedisLastSeenStore {
    client: Arc<BrokerClient>,
}

impl RedisLastSeenStore {
    pub fn new(client: Arc<BrokerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LastSeenStore for RedisLastSeenStore {
    async fn record_last_seen(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let mut conn = self.client.manager();
        let _: i64 = conn
            .hset(LAST_SEEN_KEY, user_id, at.to_rfc3339())
            .await
            .map_err(|e| ApplicationError::infrastructure(format!("记录最后在线时间失败: {}", e)))?;
        Ok(())
    }
}
