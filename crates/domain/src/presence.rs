//! 在线状态实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 一名在线用户的心跳记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineUser {
    pub user_id: String,
    pub last_heartbeat: DateTime<Utc>,
}

/// 在线用户广播载荷，始终携带完整集合而非增量
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceBroadcast {
    pub user_ids: Vec<String>,
    /// 毫秒时间戳
    pub timestamp: i64,
}
