//! 代理凭证签发
//!
//! 为单个终端用户铸造有作用域、可限时的签名凭证：账户签名密钥
//! 对（头部.声明）签名，声明的主体是新生成的一次性用户密钥。
//! 签发完全在本地完成且确定，任何失败都是配置或编程错误，不做
//! 重试；服务端不保留任何已签发材料。

use chrono::Utc;
use data_encoding::BASE64URL_NOPAD;
use serde::Serialize;

use config::AccountConfig;
use domain::nkeys::KeyPair;
use domain::{
    format_creds, ClaimPermissions, CredentialHeader, DomainError, PermissionSet, UserClaim,
};

use crate::error::ApplicationError;

/// 返回格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialFormat {
    /// 仅返回紧凑令牌
    Jwt,
    /// 返回包含令牌和用户种子的 creds 文件块（默认）
    #[default]
    Creds,
}

/// 签发请求
#[derive(Debug, Clone)]
pub struct CreateUserCredential {
    /// 用户展示名称（用户 id 或用户名）
    pub name: String,
    /// 返回格式
    pub format: CredentialFormat,
    /// 自签发起的有效期（秒），`None` 或 0 表示永不过期
    pub expires_in: Option<u64>,
}

/// 凭证签发服务
pub struct CredentialIssuer {
    account_id: String,
    account_key: KeyPair,
}

impl std::fmt::Debug for CredentialIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialIssuer")
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

impl CredentialIssuer {
    /// 从账户配置构建签发服务
    ///
    /// 账户标识或种子缺失/无效是致命的配置错误，签发服务不启动。
    pub fn new(config: &AccountConfig) -> Result<Self, ApplicationError> {
        let account_id = config
            .account_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ApplicationError::configuration("credential issuer requires account_id")
            })?;
        let account_seed = config
            .account_seed
            .as_deref()
            .filter(|seed| !seed.is_empty())
            .ok_or_else(|| {
                ApplicationError::configuration("credential issuer requires account_seed")
            })?;

        let account_key = KeyPair::from_seed(account_seed).map_err(|e| {
            ApplicationError::configuration(format!("invalid account_seed: {}", e))
        })?;

        Ok(Self {
            account_id: account_id.to_string(),
            account_key,
        })
    }

    /// 账户签名公钥，验证已签发令牌时使用
    pub fn account_public_key(&self) -> String {
        self.account_key.public_key()
    }

    /// 签发一份凭证
    pub fn issue(&self, input: &CreateUserCredential) -> Result<String, ApplicationError> {
        self.issue_at(input, Utc::now().timestamp())
    }

    /// 以指定签发时间签发，声明内容对相同输入完全确定
    pub fn issue_at(
        &self,
        input: &CreateUserCredential,
        iat: i64,
    ) -> Result<String, ApplicationError> {
        let user_key = KeyPair::create_user()?;

        let exp = match input.expires_in {
            Some(seconds) if seconds > 0 => iat + seconds as i64,
            _ => 0,
        };

        let mut claim = UserClaim {
            iat,
            iss: self.account_key.public_key(),
            jti: String::new(),
            exp,
            sub: user_key.public_key(),
            name: input.name.clone(),
            nats: ClaimPermissions {
                issuer_account: self.account_id.clone(),
                publish: PermissionSet::default(),
                subscribe: PermissionSet::default(),
                claim_type: "user".to_string(),
                version: 2,
                tags: vec!["team:*".to_string()],
            },
        };
        claim.jti = claim.compute_jti()?;

        let jwt = encode_token(&CredentialHeader::default(), &claim, &self.account_key)?;

        match input.format {
            CredentialFormat::Jwt => Ok(jwt),
            CredentialFormat::Creds => Ok(format_creds(&jwt, &user_key.seed())),
        }
    }
}

/// 编码并签名：`base64url(头部).base64url(声明).base64url(签名)`
fn encode_token(
    header: &CredentialHeader,
    claim: &UserClaim,
    key: &KeyPair,
) -> Result<String, ApplicationError> {
    let encoded_header = encode_segment(header)?;
    let encoded_claim = encode_segment(claim)?;

    let signing_input = format!("{}.{}", encoded_header, encoded_claim);
    let signature = key.sign(signing_input.as_bytes());

    Ok(format!(
        "{}.{}",
        signing_input,
        BASE64URL_NOPAD.encode(&signature)
    ))
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, ApplicationError> {
    let bytes = serde_json::to_vec(value)?;
    Ok(BASE64URL_NOPAD.encode(&bytes))
}

/// 解码并校验一份令牌
///
/// 用账户公钥验证签名；`exp = 0` 的令牌永不过期，`exp > 0` 的
/// 令牌在到期后校验失败。
pub fn verify_credential(
    token: &str,
    account_public_key: &str,
    now: i64,
) -> Result<UserClaim, ApplicationError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(DomainError::invalid_credential("令牌必须由三段组成").into());
    }

    let signing_input = format!("{}.{}", segments[0], segments[1]);
    let signature = BASE64URL_NOPAD
        .decode(segments[2].as_bytes())
        .map_err(|e| DomainError::invalid_credential(format!("签名解码失败: {}", e)))?;

    domain::nkeys::verify(account_public_key, signing_input.as_bytes(), &signature)?;

    let claim_bytes = BASE64URL_NOPAD
        .decode(segments[1].as_bytes())
        .map_err(|e| DomainError::invalid_credential(format!("声明解码失败: {}", e)))?;
    let claim: UserClaim = serde_json::from_slice(&claim_bytes)
        .map_err(|e| DomainError::invalid_credential(format!("声明解析失败: {}", e)))?;

    if claim.exp > 0 && now >= claim.exp {
        return Err(ApplicationError::CredentialExpired { exp: claim.exp });
    }

    Ok(claim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::nkeys;

    fn issuer() -> CredentialIssuer {
        let account = KeyPair::create_account().unwrap();
        CredentialIssuer::new(&AccountConfig {
            account_id: Some(account.public_key()),
            account_seed: Some(account.seed()),
        })
        .unwrap()
    }

    fn jwt_input(name: &str, expires_in: Option<u64>) -> CreateUserCredential {
        CreateUserCredential {
            name: name.to_string(),
            format: CredentialFormat::Jwt,
            expires_in,
        }
    }

    #[test]
    fn test_missing_config_is_fatal() {
        let err = CredentialIssuer::new(&AccountConfig {
            account_id: None,
            account_seed: Some("SU".to_string()),
        })
        .unwrap_err();
        assert!(matches!(err, ApplicationError::Configuration { .. }));

        let err = CredentialIssuer::new(&AccountConfig {
            account_id: Some("A".to_string()),
            account_seed: None,
        })
        .unwrap_err();
        assert!(matches!(err, ApplicationError::Configuration { .. }));

        let err = CredentialIssuer::new(&AccountConfig {
            account_id: Some("A".to_string()),
            account_seed: Some("not-a-seed".to_string()),
        })
        .unwrap_err();
        assert!(matches!(err, ApplicationError::Configuration { .. }));
    }

    #[test]
    fn test_issued_token_signature_verifies() {
        let issuer = issuer();
        let token = issuer.issue(&jwt_input("alice", None)).unwrap();

        let claim = verify_credential(&token, &issuer.account_public_key(), Utc::now().timestamp())
            .unwrap();
        assert_eq!(claim.name, "alice");
        assert_eq!(claim.exp, 0);
        assert_eq!(claim.nats.claim_type, "user");
        assert_eq!(claim.nats.version, 2);
        assert_eq!(claim.nats.tags, vec!["team:*".to_string()]);
        assert!(claim.sub.starts_with('U'));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let issuer = issuer();
        let token = issuer.issue(&jwt_input("alice", None)).unwrap();

        let mut segments: Vec<String> = token.split('.').map(str::to_string).collect();
        // 篡改声明段
        segments[1] = BASE64URL_NOPAD.encode(b"{\"iat\":0}");
        let tampered = segments.join(".");

        assert!(
            verify_credential(&tampered, &issuer.account_public_key(), 0).is_err()
        );
    }

    #[test]
    fn test_jti_matches_claim_content() {
        let issuer = issuer();
        let token = issuer.issue_at(&jwt_input("alice", None), 1_700_000_000).unwrap();
        let claim = verify_credential(&token, &issuer.account_public_key(), 0).unwrap();

        assert_eq!(claim.compute_jti().unwrap(), claim.jti);
    }

    #[test]
    fn test_expiry_semantics() {
        let issuer = issuer();
        let iat = 1_700_000_000;

        // exp = 0 永不过期
        let eternal = issuer.issue_at(&jwt_input("alice", None), iat).unwrap();
        assert!(verify_credential(&eternal, &issuer.account_public_key(), i64::MAX).is_ok());

        // exp > 0 到期后校验失败
        let bounded = issuer
            .issue_at(&jwt_input("alice", Some(3600)), iat)
            .unwrap();
        assert!(verify_credential(&bounded, &issuer.account_public_key(), iat + 10).is_ok());
        let err =
            verify_credential(&bounded, &issuer.account_public_key(), iat + 3600).unwrap_err();
        assert!(matches!(err, ApplicationError::CredentialExpired { .. }));
    }

    #[test]
    fn test_creds_format_embeds_token_and_seed() {
        let issuer = issuer();
        let creds = issuer
            .issue(&CreateUserCredential {
                name: "alice".to_string(),
                format: CredentialFormat::Creds,
                expires_in: None,
            })
            .unwrap();

        assert!(creds.contains("-----BEGIN NATS USER JWT-----"));
        assert!(creds.contains("-----BEGIN USER NKEY SEED-----"));

        // 种子可以恢复出密钥对，且令牌签名有效
        let seed_line = creds
            .lines()
            .find(|line| line.starts_with("SU"))
            .expect("creds 块应包含用户种子");
        assert!(nkeys::KeyPair::from_seed(seed_line).is_ok());

        let token_line = creds
            .lines()
            .find(|line| line.matches('.').count() == 2)
            .expect("creds 块应包含令牌");
        assert!(
            verify_credential(token_line, &issuer.account_public_key(), 0).is_ok()
        );
    }

    #[test]
    fn test_each_issue_uses_fresh_user_key() {
        let issuer = issuer();
        let first = verify_credential(
            &issuer.issue(&jwt_input("alice", None)).unwrap(),
            &issuer.account_public_key(),
            0,
        )
        .unwrap();
        let second = verify_credential(
            &issuer.issue(&jwt_input("alice", None)).unwrap(),
            &issuer.account_public_key(),
            0,
        )
        .unwrap();

        assert_ne!(first.sub, second.sub);
    }
}
