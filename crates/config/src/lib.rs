//! 统一配置中心
//!
//! 加载顺序：内置默认值 -> `APP_CONFIG_FILE` 指向的 YAML/TOML 文件 -> `APP_*` 环境变量
//! （嵌套字段用 `__` 分隔，例如 `APP_JWT__SECRET`）。

use figment::providers::{Env, Format, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 配置文件路径的环境变量名
pub const CONFIG_FILE_ENV: &str = "APP_CONFIG_FILE";

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub jwt: JwtConfig,
    #[validate(nested)]
    pub database: DatabaseConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1, message = "host cannot be empty"))]
    pub host: String,
    #[validate(range(min = 1, message = "port must be greater than 0"))]
    pub port: u16,
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JwtConfig {
    /// HS256 密钥，至少 256 位
    #[validate(length(min = 32, message = "JWT secret must be at least 32 characters long"))]
    pub secret: String,
    /// 握手时读取访问令牌的 cookie 名
    #[validate(length(min = 1))]
    pub cookie_name: String,
}

/// 数据库配置，未配置 `url` 时使用内存存储
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[validate(range(min = 1, message = "max connections must be greater than 0"))]
    pub max_connections: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
            },
            jwt: JwtConfig {
                secret: String::new(),
                cookie_name: "accessToken".into(),
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
            },
        }
    }
}

impl AppConfig {
    /// 按默认值、配置文件、环境变量的优先级加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            figment = if path.ends_with(".yml") || path.ends_with(".yaml") {
                figment.merge(Yaml::file(path))
            } else {
                figment.merge(Toml::file(path))
            };
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Self::extract(figment)
    }

    /// 从 YAML 文本加载（叠加在默认值之上）
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(AppConfig::default()))
                .merge(Yaml::string(s)),
        )
    }

    /// 从 TOML 文本加载（叠加在默认值之上）
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(AppConfig::default()))
                .merge(Toml::string(s)),
        )
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let cfg: AppConfig = figment
            .extract()
            .map_err(|err| ConfigError::Load(err.to_string()))?;
        cfg.check()?;
        Ok(cfg)
    }

    /// 验证配置有效性
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if let Some(url) = &self.database.url {
            if url.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "database.url cannot be blank".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 日志用的脱敏表示
    pub fn sanitize(&self) -> String {
        format!(
            "server={} database={} pool={} cookie={}",
            self.bind_address(),
            if self.database.url.is_some() {
                "postgres://[REDACTED]"
            } else {
                "in-memory"
            },
            self.database.max_connections,
            self.jwt.cookie_name,
        )
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
