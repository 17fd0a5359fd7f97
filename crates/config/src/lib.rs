//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 消息代理连接
//! - 凭证签发账户
//! - RPC 传输订阅
//! - 在线状态跟踪

use serde::{Deserialize, Serialize};
use std::env;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 消息代理配置
    pub broker: BrokerConfig,
    /// 凭证签发账户配置
    pub account: AccountConfig,
    /// RPC 传输配置
    pub transport: TransportConfig,
    /// 在线状态配置
    pub presence: PresenceConfig,
}

/// 消息代理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Redis 连接地址
    pub url: String,
    /// 客户端标识
    pub client_id: String,
    /// 回复主题前缀
    pub inbox_prefix: String,
    /// 请求默认超时（毫秒）
    pub request_timeout_ms: u64,
    /// 重连固定间隔（毫秒）
    pub reconnect_interval_ms: u64,
}

/// 凭证签发账户配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// 账户标识（账户公钥）
    pub account_id: Option<String>,
    /// 账户签名种子，机密材料
    pub account_seed: Option<String>,
}

/// RPC 传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// 消费组名称，水平扩展实例共享
    pub queue: String,
    /// 底层订阅的主题列表
    pub subscriptions: Vec<String>,
}

/// 在线状态配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// 心跳超时（秒）
    pub heartbeat_timeout_secs: u64,
    /// 清理周期（秒）
    pub sweep_interval_secs: u64,
    /// 在线列表广播主题
    pub broadcast_subject: String,
}

impl AppConfig {
    /// 从环境变量加载配置
    ///
    /// BROKER_URL 缺失时 panic，确保生产环境不会使用不安全的默认值；
    /// 凭证账户是可选能力，缺失时签发服务不启动。
    pub fn from_env() -> Self {
        Self {
            broker: BrokerConfig {
                url: env::var("BROKER_URL")
                    .expect("BROKER_URL environment variable is required for production safety"),
                client_id: env::var("BROKER_CLIENT_ID")
                    .unwrap_or_else(|_| "chatbus-api".to_string()),
                inbox_prefix: env::var("BROKER_INBOX_PREFIX")
                    .unwrap_or_else(|_| "_inbox".to_string()),
                request_timeout_ms: env::var("BROKER_REQUEST_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5000),
                reconnect_interval_ms: env::var("BROKER_RECONNECT_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            },
            account: AccountConfig {
                account_id: env::var("BROKER_ACCOUNT_ID").ok(),
                account_seed: env::var("BROKER_ACCOUNT_SEED").ok(),
            },
            transport: TransportConfig {
                queue: env::var("TRANSPORT_QUEUE").unwrap_or_else(|_| "chatbus".to_string()),
                subscriptions: env::var("TRANSPORT_SUBSCRIPTIONS")
                    .map(|s| {
                        s.split(',')
                            .map(str::trim)
                            .filter(|t| !t.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_else(|_| {
                        vec![
                            "chat.message.send".to_string(),
                            "chat.presence".to_string(),
                            "chat.credentials.issue".to_string(),
                        ]
                    }),
            },
            presence: PresenceConfig {
                heartbeat_timeout_secs: env::var("PRESENCE_HEARTBEAT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
                sweep_interval_secs: env::var("PRESENCE_SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                broadcast_subject: env::var("PRESENCE_BROADCAST_SUBJECT")
                    .unwrap_or_else(|_| "chat.presence.online".to_string()),
            },
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 60,
            sweep_interval_secs: 10,
            broadcast_subject: "chat.presence.online".to_string(),
        }
    }
}
