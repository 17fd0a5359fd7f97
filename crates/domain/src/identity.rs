//! 调用方身份派生
//!
//! 身份完全由 (主题, 头部) 这对输入决定，不做任何外部查询。
//! 主题约定为 `<local>.<entity>.<userId>.<action>`：第一段是租户/
//! 本地标识，第三段是用户标识；可选头部 `name`、`isAdmin`、`type`、
//! `roles` 进一步修饰派生结果。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::subject;

/// 默认角色
pub const DEFAULT_ROLE: &str = "APP_ADMIN";

/// 身份类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityKind {
    App,
    Internal,
}

/// 本地（租户）子身份
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub id: String,
    pub is_admin: bool,
}

/// 从消息派生出的调用方身份
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveIdentity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: IdentityKind,
    pub name: String,
    pub roles: Vec<String>,
    pub local: LocalIdentity,
}

/// 从 (主题, 头部) 派生身份，纯函数
///
/// 主题第三段缺失或为空时返回 `None`。
pub fn derive_identity(
    topic: &str,
    headers: &HashMap<String, String>,
) -> Option<ActiveIdentity> {
    let user_id = subject::token(topic, 2)?;
    let local_id = subject::token(topic, 0).unwrap_or_default();

    let mut identity = ActiveIdentity {
        id: user_id.to_string(),
        kind: IdentityKind::App,
        name: String::new(),
        roles: vec![DEFAULT_ROLE.to_string()],
        local: LocalIdentity {
            id: local_id.to_string(),
            is_admin: false,
        },
    };

    if let Some(name) = headers.get("name") {
        identity.name = name.clone();
    }

    if headers.get("isAdmin").map(String::as_str) == Some("true") {
        identity.roles = vec![DEFAULT_ROLE.to_string()];
        identity.local.is_admin = true;
    }

    if headers.get("type").map(String::as_str) == Some("INTERNAL") {
        identity.kind = IdentityKind::Internal;
    }

    if let Some(roles) = headers.get("roles") {
        identity.roles = roles.split(',').map(str::to_string).collect();
    }

    Some(identity)
}

/// 单条授权能力
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ability {
    pub action: String,
    pub subject: String,
}

/// 一次消息处理内计算出的授权决策集合
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbilitySet {
    abilities: Vec<Ability>,
}

impl AbilitySet {
    pub fn new(abilities: Vec<Ability>) -> Self {
        Self { abilities }
    }

    /// 判断是否允许对某资源执行某动作
    pub fn can(&self, action: &str, subject: &str) -> bool {
        self.abilities
            .iter()
            .any(|a| a.action == action && a.subject == subject)
    }

    pub fn is_empty(&self) -> bool {
        self.abilities.is_empty()
    }
}
