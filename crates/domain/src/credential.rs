//! 代理用户凭证声明
//!
//! 凭证是三段 Base64URL（头部.声明.签名）组成的令牌。声明的
//! `jti` 由声明内容自身派生：将 `jti` 置空后按字段顺序序列化，
//! 取 SHA-256 再 Base32 编码。

use data_encoding::BASE32_NOPAD;
use ring::digest;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// 令牌头部的 `alg` 取值
pub const CREDENTIAL_ALG: &str = "ed25519-nkey";
/// 令牌头部的 `typ` 取值
pub const CREDENTIAL_TYP: &str = "JWT";

/// 令牌头部
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialHeader {
    pub typ: String,
    pub alg: String,
}

impl Default for CredentialHeader {
    fn default() -> Self {
        Self {
            typ: CREDENTIAL_TYP.to_string(),
            alg: CREDENTIAL_ALG.to_string(),
        }
    }
}

/// 用户凭证声明
///
/// 字段顺序即规范序列化顺序，计算 `jti` 时依赖该顺序。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserClaim {
    /// 签发时间（秒）
    pub iat: i64,
    /// 签发者（账户签名公钥）
    pub iss: String,
    /// 内容派生的唯一标识
    pub jti: String,
    /// 过期时间（秒），0 表示永不过期
    pub exp: i64,
    /// 主体（新用户公钥）
    pub sub: String,
    /// 展示名称
    pub name: String,
    /// 权限与标签块
    pub nats: ClaimPermissions,
}

/// 声明中的权限/标签块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimPermissions {
    pub issuer_account: String,
    #[serde(rename = "pub")]
    pub publish: PermissionSet,
    #[serde(rename = "sub")]
    pub subscribe: PermissionSet,
    #[serde(rename = "type")]
    pub claim_type: String,
    pub version: u8,
    pub tags: Vec<String>,
}

/// 发布/订阅权限集合，当前设计保持开放（空集合）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny: Option<Vec<String>>,
}

impl UserClaim {
    /// 计算内容派生的 `jti`
    ///
    /// 置空 `jti` 后序列化整个声明，SHA-256 哈希再 Base32 编码，
    /// 因此两个只在 `jti` 上不同的声明哈希结果一致。
    pub fn compute_jti(&self) -> Result<String, DomainError> {
        let mut canonical = self.clone();
        canonical.jti.clear();

        let bytes = serde_json::to_vec(&canonical)?;
        let hash = digest::digest(&digest::SHA256, &bytes);

        Ok(BASE32_NOPAD.encode(hash.as_ref()))
    }
}

/// 把令牌和用户种子包装成 creds 文件格式
///
/// 种子是机密材料，只在返回值中出现这一次，服务端不保留副本。
pub fn format_creds(jwt: &str, seed: &str) -> String {
    format!(
        "-----BEGIN NATS USER JWT-----\n\
         {jwt}\n\
         ------END NATS USER JWT------\n\
         \n\
         ************************* IMPORTANT *************************\n\
         NKEY Seed printed below can be used sign and prove identity.\n\
         NKEYs are sensitive and should be treated as secrets.\n\
         \n\
         -----BEGIN USER NKEY SEED-----\n\
         {seed}\n\
         ------END USER NKEY SEED------\n\
         *************************************************************"
    )
}
