//! 聊天室Repository实现

use application::ChatRoomRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{ChatRoom, RepositoryError, RoomId, UserId};
use sqlx::{query_as, query_scalar, FromRow};

use crate::db::{map_sqlx_err, DbPool};

#[derive(Debug, Clone, FromRow)]
struct DbChatRoom {
    id: i64,
    name: String,
    owner_id: i64,
    created_at: DateTime<Utc>,
}

impl From<DbChatRoom> for ChatRoom {
    fn from(row: DbChatRoom) -> Self {
        ChatRoom {
            id: RoomId(row.id),
            name: row.name,
            owner_id: UserId(row.owner_id),
            created_at: row.created_at,
        }
    }
}

pub struct PgChatRoomRepository {
    pool: DbPool,
}

impl PgChatRoomRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// 房间通常由 HTTP 层创建，此处供初始化和测试使用
    pub async fn insert(&self, name: &str, owner_id: UserId) -> Result<ChatRoom, RepositoryError> {
        let row = query_as::<_, DbChatRoom>(
            r#"
            INSERT INTO chat_rooms (name, owner_id, created_at)
            VALUES ($1, $2, NOW())
            RETURNING id, name, owner_id, created_at
            "#,
        )
        .bind(name)
        .bind(owner_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.into())
    }
}

#[async_trait]
impl ChatRoomRepository for PgChatRoomRepository {
    async fn find_by_id(&self, id: RoomId) -> Result<Option<ChatRoom>, RepositoryError> {
        let row = query_as::<_, DbChatRoom>(
            "SELECT id, name, owner_id, created_at FROM chat_rooms WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(ChatRoom::from))
    }

    async fn is_owner(&self, room_id: RoomId, user_id: UserId) -> Result<bool, RepositoryError> {
        query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM chat_rooms WHERE id = $1 AND owner_id = $2)",
        )
        .bind(room_id.0)
        .bind(user_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }
}
