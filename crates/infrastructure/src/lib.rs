//! 基础设施层实现。
//!
//! 提供 JWT 凭证校验与 PostgreSQL 仓储，实现应用层定义的接口。

pub mod auth;
pub mod db;
pub mod migrations;

pub use auth::{JwtCredentialVerifier, TokenClaims};
pub use db::{
    create_pg_pool, DbPool, PgChatRoomRepository, PgMessageRepository, PgReactionRepository,
    PgReadReceiptRepository, PgStorage,
};
pub use migrations::MIGRATOR;
