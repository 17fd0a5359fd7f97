//! 凭证签发路由
//!
//! 处理 `chat.credentials.issue` 请求：为载荷指定的用户铸造一份
//! 签名凭证并发回。载荷非法属于业务错误；签发本身失败说明配置
//! 或编程有问题，作为处理器异常向上传播。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::context::BrokerContext;
use crate::credentials::{CreateUserCredential, CredentialFormat, CredentialIssuer};
use crate::error::ApplicationError;
use crate::router::{HandlerReply, RouteHandler};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueRequest {
    name: String,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

pub struct CredentialIssueRoute {
    issuer: Arc<CredentialIssuer>,
}

impl CredentialIssueRoute {
    pub fn new(issuer: Arc<CredentialIssuer>) -> Self {
        Self { issuer }
    }
}

#[async_trait]
impl RouteHandler for CredentialIssueRoute {
    async fn handle(
        &self,
        payload: Value,
        _context: &BrokerContext,
    ) -> Result<HandlerReply, ApplicationError> {
        let request: IssueRequest = match serde_json::from_value(payload) {
            Ok(request) => request,
            Err(e) => {
                return Ok(HandlerReply::Error(json!({
                    "success": false,
                    "error": format!("invalid issue request: {}", e),
                })));
            }
        };

        if request.name.is_empty() {
            return Ok(HandlerReply::Error(json!({
                "success": false,
                "error": "name must not be empty",
            })));
        }

        let format = match request.format.as_deref() {
            Some("jwt") => CredentialFormat::Jwt,
            Some("creds") | None => CredentialFormat::Creds,
            Some(other) => {
                return Ok(HandlerReply::Error(json!({
                    "success": false,
                    "error": format!("unknown credential format: {}", other),
                })));
            }
        };

        let credential = self.issuer.issue(&CreateUserCredential {
            name: request.name.clone(),
            format,
            expires_in: request.expires_in,
        })?;

        info!(name = %request.name, "凭证已签发");
        Ok(HandlerReply::Response(json!({
            "success": true,
            "credential": credential,
        })))
    }
}
