//! 消息Repository实现

use application::MessageRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Message, MessageContent, MessageId, NewMessage, RepositoryError, RoomId, UserId,
};
use sqlx::{query, query_as, query_scalar, FromRow};

use crate::db::{invalid_data, map_sqlx_err, DbPool};

/// 数据库消息模型
#[derive(Debug, Clone, FromRow)]
struct DbMessage {
    id: i64,
    room_id: i64,
    sender_id: i64,
    content: String,
    is_edited: bool,
    edited_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<DbMessage> for Message {
    type Error = RepositoryError;

    fn try_from(row: DbMessage) -> Result<Self, Self::Error> {
        let content = MessageContent::new(row.content)
            .map_err(|err| invalid_data(format!("message {} has invalid content: {err}", row.id)))?;
        Ok(Message {
            id: MessageId(row.id),
            room_id: RoomId(row.room_id),
            sender_id: UserId(row.sender_id),
            content,
            created_at: row.created_at,
            is_edited: row.is_edited,
            edited_at: row.edited_at,
        })
    }
}

fn into_messages(rows: Vec<DbMessage>) -> Result<Vec<Message>, RepositoryError> {
    rows.into_iter().map(Message::try_from).collect()
}

/// 消息Repository实现
pub struct PgMessageRepository {
    pool: DbPool,
}

impl PgMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let row = query_as::<_, DbMessage>(
            r#"
            INSERT INTO messages (room_id, sender_id, content, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, room_id, sender_id, content, is_edited, edited_at, created_at
            "#,
        )
        .bind(message.room_id.0)
        .bind(message.sender_id.0)
        .bind(message.content.as_str())
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.try_into()
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        query_as::<_, DbMessage>(
            r#"
            SELECT id, room_id, sender_id, content, is_edited, edited_at, created_at
            FROM messages
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .map(Message::try_from)
        .transpose()
    }

    async fn update(&self, message: Message) -> Result<Message, RepositoryError> {
        query_as::<_, DbMessage>(
            r#"
            UPDATE messages
            SET content = $2, is_edited = $3, edited_at = $4
            WHERE id = $1
            RETURNING id, room_id, sender_id, content, is_edited, edited_at, created_at
            "#,
        )
        .bind(message.id.0)
        .bind(message.content.as_str())
        .bind(message.is_edited)
        .bind(message.edited_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?
        .try_into()
    }

    async fn delete(&self, id: MessageId) -> Result<(), RepositoryError> {
        // 回应与回执通过外键 ON DELETE CASCADE 一并删除
        let result = query("DELETE FROM messages WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete_by_room(&self, room_id: RoomId) -> Result<u64, RepositoryError> {
        let result = query("DELETE FROM messages WHERE room_id = $1")
            .bind(room_id.0)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }

    async fn unread_for_reader(
        &self,
        room_id: RoomId,
        reader: UserId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = query_as::<_, DbMessage>(
            r#"
            SELECT m.id, m.room_id, m.sender_id, m.content, m.is_edited, m.edited_at, m.created_at
            FROM messages m
            WHERE m.room_id = $1
              AND m.sender_id <> $2
              AND NOT EXISTS (
                  SELECT 1 FROM message_reads r
                  WHERE r.message_id = m.id AND r.user_id = $2
              )
            ORDER BY m.id
            "#,
        )
        .bind(room_id.0)
        .bind(reader.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        into_messages(rows)
    }

    async fn count_unread(&self, room_id: RoomId, reader: UserId) -> Result<u64, RepositoryError> {
        let count = query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM messages m
            WHERE m.room_id = $1
              AND m.sender_id <> $2
              AND NOT EXISTS (
                  SELECT 1 FROM message_reads r
                  WHERE r.message_id = m.id AND r.user_id = $2
              )
            "#,
        )
        .bind(room_id.0)
        .bind(reader.0)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        u64::try_from(count).map_err(|_| invalid_data("negative unread count"))
    }
}
