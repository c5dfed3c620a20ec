//! 表情回应Repository实现

use application::ReactionRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Emoji, MessageId, Reaction, RepositoryError, UserId};
use sqlx::{query, query_as, FromRow};

use crate::db::{invalid_data, map_sqlx_err, DbPool};

#[derive(Debug, Clone, FromRow)]
struct DbReaction {
    message_id: i64,
    user_id: i64,
    emoji: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<DbReaction> for Reaction {
    type Error = RepositoryError;

    fn try_from(row: DbReaction) -> Result<Self, Self::Error> {
        let emoji = Emoji::new(row.emoji)
            .map_err(|err| invalid_data(format!("stored emoji is invalid: {err}")))?;
        Ok(Reaction::new(
            MessageId(row.message_id),
            UserId(row.user_id),
            emoji,
            row.created_at,
        ))
    }
}

pub struct PgReactionRepository {
    pool: DbPool,
}

impl PgReactionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReactionRepository for PgReactionRepository {
    async fn find_for_user(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<Option<Reaction>, RepositoryError> {
        query_as::<_, DbReaction>(
            r#"
            SELECT message_id, user_id, emoji, created_at
            FROM message_reactions
            WHERE message_id = $1 AND user_id = $2
            "#,
        )
        .bind(message_id.0)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .map(Reaction::try_from)
        .transpose()
    }

    async fn create(&self, reaction: Reaction) -> Result<Reaction, RepositoryError> {
        // 主键 (message_id, user_id) 已存在时不写入任何行
        query_as::<_, DbReaction>(
            r#"
            INSERT INTO message_reactions (message_id, user_id, emoji, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (message_id, user_id) DO NOTHING
            RETURNING message_id, user_id, emoji, created_at
            "#,
        )
        .bind(reaction.message_id.0)
        .bind(reaction.user_id.0)
        .bind(reaction.emoji.as_str())
        .bind(reaction.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::Conflict)?
        .try_into()
    }

    async fn delete_exact(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &Emoji,
    ) -> Result<bool, RepositoryError> {
        let result = query(
            "DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
        )
        .bind(message_id.0)
        .bind(user_id.0)
        .bind(emoji.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() > 0)
    }
}
