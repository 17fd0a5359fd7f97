//! 代理连接管理
//!
//! 普通命令复用单个自动重连的多路复用连接；Pub/Sub 需要独占
//! 连接，按需从同一个客户端创建。重连采用固定间隔、不限次数，
//! 连接恢复前的命令返回错误由调用方按发布语义处理（尽力而为，
//! 不补发）。

use redis::aio::{ConnectionManager, ConnectionManagerConfig, PubSub};
use redis::Client;
use std::time::Duration;
use tracing::info;

use config::BrokerConfig;

use crate::error::{BrokerError, BrokerResult};

#[derive(Clone)]
pub struct BrokerConnection {
    client: Client,
    manager: ConnectionManager,
    client_id: String,
    inbox_prefix: String,
}

impl BrokerConnection {
    /// 建立到代理的连接
    pub async fn connect(config: &BrokerConfig) -> BrokerResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| {
            BrokerError::connection(format!("创建客户端失败: {}", e))
        })?;

        // 指数底数为 1 即固定间隔重连
        let manager_config = ConnectionManagerConfig::new()
            .set_number_of_retries(usize::MAX)
            .set_factor(config.reconnect_interval_ms)
            .set_exponent_base(1)
            .set_max_delay(config.reconnect_interval_ms)
            .set_connection_timeout(Duration::from_millis(config.request_timeout_ms));

        let manager = client
            .get_connection_manager_with_config(manager_config)
            .await
            .map_err(|e| BrokerError::connection(format!("连接代理失败: {}", e)))?;

        info!(url = %config.url, client_id = %config.client_id, "代理连接已建立");

        Ok(Self {
            client,
            manager,
            client_id: config.client_id.clone(),
            inbox_prefix: config.inbox_prefix.clone(),
        })
    }

    /// 多路复用命令连接，克隆开销很小
    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// 创建独占的 Pub/Sub 连接
    pub async fn pubsub(&self) -> BrokerResult<PubSub> {
        self.client
            .get_async_pubsub()
            .await
            .map_err(|e| BrokerError::connection(format!("获取 PubSub 连接失败: {}", e)))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn inbox_prefix(&self) -> &str {
        &self.inbox_prefix
    }
}
