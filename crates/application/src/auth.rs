//! 握手凭证的提取与校验抽象

use async_trait::async_trait;
use domain::Identity;

use crate::error::ApplicationError;

/// 默认的访问令牌 cookie 名
pub const DEFAULT_COOKIE_NAME: &str = "accessToken";

/// `Sec-WebSocket-Protocol` 中标记令牌的子协议名
pub const TOKEN_SUBPROTOCOL: &str = "access_token";

/// 凭证校验器，校验失败时返回 `Unauthorized`
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, ApplicationError>;
}

/// 握手请求中可能携带令牌的位置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSources {
    pub cookie_token: Option<String>,
    pub handshake_token: Option<String>,
    pub bearer_token: Option<String>,
    pub query_token: Option<String>,
}

impl CredentialSources {
    /// 从 `Cookie` 头中读取指定 cookie，值会做 URL 解码
    pub fn with_cookie_header(mut self, header: Option<&str>, cookie_name: &str) -> Self {
        self.cookie_token = header.and_then(|raw| {
            url::form_urlencoded::parse(raw.replace(';', "&").as_bytes())
                .find(|(name, _)| name.trim() == cookie_name)
                .map(|(_, value)| value.trim().to_string())
        });
        self
    }

    /// 解析 `Sec-WebSocket-Protocol: access_token, <token>`
    pub fn with_handshake_protocol(mut self, header: Option<&str>) -> Self {
        self.handshake_token = header.and_then(|raw| {
            let mut parts = raw.split(',').map(str::trim);
            match (parts.next(), parts.next()) {
                (Some(TOKEN_SUBPROTOCOL), Some(token)) => Some(token.to_string()),
                _ => None,
            }
        });
        self
    }

    pub fn with_authorization_header(mut self, header: Option<&str>) -> Self {
        self.bearer_token = header
            .and_then(|raw| raw.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string());
        self
    }

    /// 从查询串 `?token=` 读取
    pub fn with_query(mut self, query: Option<&str>) -> Self {
        self.query_token = query.and_then(|raw| {
            url::form_urlencoded::parse(raw.as_bytes())
                .find(|(name, _)| name == "token")
                .map(|(_, value)| value.into_owned())
        });
        self
    }

    /// 按 cookie、握手字段、Bearer 头、查询串的顺序取第一个非空令牌
    pub fn token(&self) -> Option<&str> {
        [
            &self.cookie_token,
            &self.handshake_token,
            &self.bearer_token,
            &self.query_token,
        ]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .find(|token| !token.is_empty())
    }
}
