use std::sync::Arc;

use domain::{MessageId, ReadReceipt, RepositoryError, RoomId, ServerEvent, UserId};

use crate::{
    clock::Clock,
    connection_registry::ConnectionContext,
    error::ApplicationError,
    fanout::RoomFanoutRouter,
    repository::{MessageRepository, ReadReceiptRepository},
};

/// 单条已读标记的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// 新写入回执并已广播 `message-status`
    Recorded(ReadReceipt),
    /// 回执早已存在，不再广播
    AlreadyRead(ReadReceipt),
    /// 自己发送的消息不产生回执
    OwnMessage,
}

pub struct ReadReceiptDependencies {
    pub message_repository: Arc<dyn MessageRepository>,
    pub receipt_repository: Arc<dyn ReadReceiptRepository>,
    pub router: Arc<RoomFanoutRouter>,
    pub clock: Arc<dyn Clock>,
}

/// 已读回执聚合：`(message_id, user_id)` 至多一条回执，重复标记是无操作
pub struct ReadReceiptAggregator {
    deps: ReadReceiptDependencies,
}

impl ReadReceiptAggregator {
    pub fn new(deps: ReadReceiptDependencies) -> Self {
        Self { deps }
    }

    pub async fn mark_read(
        &self,
        ctx: &ConnectionContext,
        message_id: MessageId,
    ) -> Result<ReadOutcome, ApplicationError> {
        let message = self
            .deps
            .message_repository
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("message"))?;

        if message.is_sent_by(ctx.user_id()) {
            return Ok(ReadOutcome::OwnMessage);
        }
        if let Some(existing) = self.deps.receipt_repository.find(message_id, ctx.user_id()).await? {
            return Ok(ReadOutcome::AlreadyRead(existing));
        }

        let receipt = ReadReceipt::new(message_id, ctx.user_id(), self.deps.clock.now());
        match self.deps.receipt_repository.create(receipt).await {
            Ok(receipt) => {
                self.deps
                    .router
                    .publish_to_room_and_sender(
                        ctx.connection_id,
                        message.room_id,
                        ServerEvent::message_status(&receipt, message.room_id),
                    )
                    .await;
                Ok(ReadOutcome::Recorded(receipt))
            }
            // 另一条连接抢先写入
            Err(RepositoryError::Conflict) => self
                .deps
                .receipt_repository
                .find(message_id, ctx.user_id())
                .await?
                .map(ReadOutcome::AlreadyRead)
                .ok_or_else(|| ApplicationError::persistence("read receipt vanished after conflict")),
            Err(err) => Err(err.into()),
        }
    }

    /// 把房间内所有他人发送且未读的消息标记为已读，每条新回执广播一次 `message-status`
    pub async fn mark_room_read(
        &self,
        ctx: &ConnectionContext,
        room_id: RoomId,
    ) -> Result<Vec<ReadReceipt>, ApplicationError> {
        let unread = self
            .deps
            .message_repository
            .unread_for_reader(room_id, ctx.user_id())
            .await?;
        if unread.is_empty() {
            return Ok(Vec::new());
        }

        let now = self.deps.clock.now();
        let created = self
            .deps
            .receipt_repository
            .create_many(
                unread
                    .iter()
                    .map(|message| ReadReceipt::new(message.id, ctx.user_id(), now))
                    .collect(),
            )
            .await?;

        for receipt in &created {
            self.deps
                .router
                .publish_to_room_and_sender(
                    ctx.connection_id,
                    room_id,
                    ServerEvent::message_status(receipt, room_id),
                )
                .await;
        }

        tracing::info!(
            room_id = %room_id,
            user_id = %ctx.user_id(),
            marked = created.len(),
            "房间消息已全部标记为已读"
        );
        Ok(created)
    }

    pub async fn unread_count(&self, user_id: UserId, room_id: RoomId) -> Result<u64, ApplicationError> {
        Ok(self
            .deps
            .message_repository
            .count_unread(room_id, user_id)
            .await?)
    }
}
