//! PostgreSQL 仓储

use std::sync::Arc;

use domain::RepositoryError;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub mod repositories;

pub use repositories::{
    PgChatRoomRepository, PgMessageRepository, PgReactionRepository, PgReadReceiptRepository,
};

pub type DbPool = PgPool;

pub async fn create_pg_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    tracing::info!(max_connections, "PostgreSQL 连接池已创建");
    Ok(pool)
}

/// 唯一约束冲突映射为 `Conflict`，外键缺失映射为 `NotFound`
pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    if let Some(db_err) = err.as_database_error() {
        match db_err.code().as_deref() {
            Some("23505") => return RepositoryError::Conflict,
            Some("23503") => return RepositoryError::NotFound,
            _ => {}
        }
    }
    RepositoryError::storage(err.to_string())
}

pub(crate) fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

/// 基于同一连接池的全部仓储
#[derive(Clone)]
pub struct PgStorage {
    pub message_repository: Arc<PgMessageRepository>,
    pub reaction_repository: Arc<PgReactionRepository>,
    pub receipt_repository: Arc<PgReadReceiptRepository>,
    pub room_repository: Arc<PgChatRoomRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            reaction_repository: Arc::new(PgReactionRepository::new(pool.clone())),
            receipt_repository: Arc::new(PgReadReceiptRepository::new(pool.clone())),
            room_repository: Arc::new(PgChatRoomRepository::new(pool)),
        }
    }
}
