//! JWT 凭证校验
//!
//! 令牌使用 HS256 签名，必须带 `exp`。用户 id 取自 `sub`（数字或数字字符串），
//! 缺失时回退到 `userId`；`email` 必填。

use application::{ApplicationError, CredentialVerifier};
use async_trait::async_trait;
use config::JwtConfig;
use domain::{Identity, UserId};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JWT Claims 结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<Value>,
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
}

impl TokenClaims {
    fn identity(&self) -> Result<Identity, ApplicationError> {
        let user_id = self
            .sub
            .as_ref()
            .and_then(numeric_id)
            .or_else(|| self.user_id.as_ref().and_then(numeric_id))
            .ok_or_else(|| ApplicationError::unauthorized("token carries no user id"))?;
        let email = self
            .email
            .as_deref()
            .filter(|email| !email.is_empty())
            .ok_or_else(|| ApplicationError::unauthorized("token carries no email"))?;
        Ok(Identity::new(UserId(user_id), email))
    }
}

fn numeric_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// HS256 JWT 校验器
#[derive(Clone)]
pub struct JwtCredentialVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtCredentialVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn from_config(config: &JwtConfig) -> Self {
        Self::new(&config.secret)
    }

    /// 签发令牌，供开发工具和测试使用
    pub fn issue(
        &self,
        user_id: UserId,
        email: &str,
        ttl: chrono::Duration,
    ) -> Result<String, ApplicationError> {
        let claims = TokenClaims {
            sub: Some(Value::from(user_id.value())),
            user_id: None,
            email: Some(email.to_string()),
            exp: (chrono::Utc::now() + ttl).timestamp(),
        };
        self.encode(&claims)
    }

    pub fn encode(&self, claims: &TokenClaims) -> Result<String, ApplicationError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|err| ApplicationError::unauthorized(format!("token generation failed: {err}")))
    }
}

#[async_trait]
impl CredentialVerifier for JwtCredentialVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, ApplicationError> {
        let claims = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| ApplicationError::unauthorized(format!("invalid token: {err}")))?;
        claims.identity()
    }
}
