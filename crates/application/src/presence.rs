//! 在线状态跟踪
//!
//! 心跳驱动的在线表：收到心跳就刷新时间戳，超过阈值未刷新的
//! 用户由后台清扫任务移除。在线集合发生变化（上线、下线、被
//! 清扫）时向固定主题广播一次完整快照；无变化不广播。

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use config::PresenceConfig;
use domain::{OnlineUser, PresenceBroadcast};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::publisher::BrokerPublisher;

/// 在线状态参数
#[derive(Debug, Clone)]
pub struct PresenceSettings {
    /// 心跳超时（秒）
    pub heartbeat_timeout: Duration,
    /// 清扫间隔（秒）
    pub sweep_interval: Duration,
    /// 在线快照广播主题
    pub broadcast_subject: String,
}

impl From<&PresenceConfig> for PresenceSettings {
    fn from(config: &PresenceConfig) -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(config.heartbeat_timeout_secs),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            broadcast_subject: config.broadcast_subject.clone(),
        }
    }
}

/// 最后在线时间持久化
///
/// 存储失败只记录日志，不影响心跳本身。
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LastSeenStore: Send + Sync {
    async fn record_last_seen(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ApplicationError>;
}

pub mod memory {
    //! 内存实现，测试和单机运行用

    use super::*;

    #[derive(Default)]
    pub struct MemoryLastSeenStore {
        entries: RwLock<HashMap<String, DateTime<Utc>>>,
    }

    impl MemoryLastSeenStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn last_seen(&self, user_id: &str) -> Option<DateTime<Utc>> {
            self.entries.read().await.get(user_id).copied()
        }
    }

    #[async_trait::async_trait]
    impl LastSeenStore for MemoryLastSeenStore {
        async fn record_last_seen(
            &self,
            user_id: &str,
            at: DateTime<Utc>,
        ) -> Result<(), ApplicationError> {
            self.entries.write().await.insert(user_id.to_string(), at);
            Ok(())
        }
    }
}

/// 在线状态跟踪器
pub struct PresenceTracker {
    users: RwLock<HashMap<String, OnlineUser>>,
    publisher: Arc<dyn BrokerPublisher>,
    store: Arc<dyn LastSeenStore>,
    clock: Arc<dyn Clock>,
    settings: PresenceSettings,
}

impl PresenceTracker {
    pub fn new(
        publisher: Arc<dyn BrokerPublisher>,
        store: Arc<dyn LastSeenStore>,
        clock: Arc<dyn Clock>,
        settings: PresenceSettings,
    ) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            publisher,
            store,
            clock,
            settings,
        }
    }

    /// 处理一次心跳
    ///
    /// 已在线用户只刷新时间戳不广播；新上线用户触发广播。
    pub async fn heartbeat(&self, user_id: &str) {
        let now = self.clock.now();
        let was_online = {
            let mut users = self.users.write().await;
            users
                .insert(
                    user_id.to_string(),
                    OnlineUser {
                        user_id: user_id.to_string(),
                        last_heartbeat: now,
                    },
                )
                .is_some()
        };

        if let Err(e) = self.store.record_last_seen(user_id, now).await {
            warn!(user_id = %user_id, error = %e, "最后在线时间持久化失败");
        }

        if !was_online {
            info!(user_id = %user_id, "用户上线");
            self.broadcast_online().await;
        }
    }

    /// 主动下线
    pub async fn remove_user(&self, user_id: &str) {
        let removed = self.users.write().await.remove(user_id).is_some();
        if removed {
            info!(user_id = %user_id, "用户下线");
            self.broadcast_online().await;
        }
    }

    /// 当前在线用户 id 列表
    pub async fn online_users(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.users.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.users.read().await.contains_key(user_id)
    }

    /// 执行一轮清扫，返回被移除的用户数
    pub async fn sweep_once(&self) -> usize {
        let threshold = self.clock.now()
            - chrono::Duration::from_std(self.settings.heartbeat_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let expired: Vec<String> = {
            let mut users = self.users.write().await;
            let expired: Vec<String> = users
                .values()
                .filter(|user| user.last_heartbeat < threshold)
                .map(|user| user.user_id.clone())
                .collect();
            for user_id in &expired {
                users.remove(user_id);
            }
            expired
        };

        if !expired.is_empty() {
            info!(count = expired.len(), "清扫超时用户");
            self.broadcast_online().await;
        }
        expired.len()
    }

    /// 启动后台清扫任务
    pub fn start_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tracker.settings.sweep_interval);
            // 跳过立即触发的首个 tick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracker.sweep_once().await;
            }
        })
    }

    /// 广播完整在线快照
    async fn broadcast_online(&self) {
        let snapshot = PresenceBroadcast {
            user_ids: self.online_users().await,
            timestamp: self.clock.now().timestamp_millis(),
        };
        debug!(count = snapshot.user_ids.len(), "广播在线快照");

        let payload = json!(snapshot);
        if let Err(e) = self
            .publisher
            .publish(&self.settings.broadcast_subject, &payload)
            .await
        {
            warn!(error = %e, "在线快照广播失败");
        }
    }
}
