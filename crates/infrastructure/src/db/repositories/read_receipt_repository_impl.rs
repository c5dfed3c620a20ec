//! 已读回执Repository实现

use application::ReadReceiptRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{MessageId, ReadReceipt, RepositoryError, UserId};
use sqlx::{query_as, FromRow};

use crate::db::{map_sqlx_err, DbPool};

#[derive(Debug, Clone, FromRow)]
struct DbReadReceipt {
    message_id: i64,
    user_id: i64,
    read_at: DateTime<Utc>,
}

impl From<DbReadReceipt> for ReadReceipt {
    fn from(row: DbReadReceipt) -> Self {
        ReadReceipt::new(MessageId(row.message_id), UserId(row.user_id), row.read_at)
    }
}

pub struct PgReadReceiptRepository {
    pool: DbPool,
}

impl PgReadReceiptRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadReceiptRepository for PgReadReceiptRepository {
    async fn find(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<Option<ReadReceipt>, RepositoryError> {
        let row = query_as::<_, DbReadReceipt>(
            r#"
            SELECT message_id, user_id, read_at
            FROM message_reads
            WHERE message_id = $1 AND user_id = $2
            "#,
        )
        .bind(message_id.0)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(ReadReceipt::from))
    }

    async fn create(&self, receipt: ReadReceipt) -> Result<ReadReceipt, RepositoryError> {
        let row = query_as::<_, DbReadReceipt>(
            r#"
            INSERT INTO message_reads (message_id, user_id, read_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id, user_id) DO NOTHING
            RETURNING message_id, user_id, read_at
            "#,
        )
        .bind(receipt.message_id.0)
        .bind(receipt.user_id.0)
        .bind(receipt.read_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::Conflict)?;

        Ok(row.into())
    }

    async fn create_many(
        &self,
        receipts: Vec<ReadReceipt>,
    ) -> Result<Vec<ReadReceipt>, RepositoryError> {
        if receipts.is_empty() {
            return Ok(Vec::new());
        }

        let mut message_ids = Vec::with_capacity(receipts.len());
        let mut user_ids = Vec::with_capacity(receipts.len());
        let mut read_ats = Vec::with_capacity(receipts.len());
        for receipt in &receipts {
            message_ids.push(receipt.message_id.0);
            user_ids.push(receipt.user_id.0);
            read_ats.push(receipt.read_at);
        }

        // 已删除的消息和已存在的回执都被跳过
        let rows = query_as::<_, DbReadReceipt>(
            r#"
            INSERT INTO message_reads (message_id, user_id, read_at)
            SELECT batch.message_id, batch.user_id, batch.read_at
            FROM UNNEST($1::BIGINT[], $2::BIGINT[], $3::TIMESTAMPTZ[])
                AS batch(message_id, user_id, read_at)
            WHERE EXISTS (SELECT 1 FROM messages m WHERE m.id = batch.message_id)
            ON CONFLICT (message_id, user_id) DO NOTHING
            RETURNING message_id, user_id, read_at
            "#,
        )
        .bind(&message_ids)
        .bind(&user_ids)
        .bind(&read_ats)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut created: Vec<ReadReceipt> = rows.into_iter().map(ReadReceipt::from).collect();
        created.sort_by_key(|receipt| receipt.message_id);
        Ok(created)
    }
}
