use std::sync::Arc;

use domain::{
    Message, MessageContent, MessageId, MessagePayload, NewMessage, RoomId, ServerEvent,
};

use crate::{
    clock::Clock,
    connection_registry::ConnectionContext,
    error::ApplicationError,
    fanout::{FanoutScope, RoomFanoutRouter},
    repository::{ChatRoomRepository, MessageRepository},
};

pub struct MessageLifecycleDependencies {
    pub message_repository: Arc<dyn MessageRepository>,
    pub room_repository: Arc<dyn ChatRoomRepository>,
    pub router: Arc<RoomFanoutRouter>,
    pub clock: Arc<dyn Clock>,
}

/// 消息的发送、编辑、删除与清空房间。
///
/// 只有持久化成功后才会扇出事件；存储失败时不产生任何广播。
pub struct MessageLifecycleCoordinator {
    deps: MessageLifecycleDependencies,
}

impl MessageLifecycleCoordinator {
    pub fn new(deps: MessageLifecycleDependencies) -> Self {
        Self { deps }
    }

    /// 持久化并广播新消息：房间内其他人收到 `new-message`，发送者收到携带 `tempId` 的 `message-sent`
    pub async fn send(
        &self,
        ctx: &ConnectionContext,
        room_id: RoomId,
        content: String,
        temp_id: Option<String>,
    ) -> Result<Message, ApplicationError> {
        let content = MessageContent::new(content)?;
        let new_message = NewMessage::new(room_id, ctx.user_id(), content, self.deps.clock.now());

        let message = self
            .deps
            .message_repository
            .create(new_message)
            .await
            .inspect_err(|err| {
                tracing::error!(
                    connection_id = %ctx.connection_id,
                    room_id = %room_id,
                    error = %err,
                    "消息持久化失败"
                );
            })?;

        let payload = MessagePayload::new(&message, ctx.identity.email.clone());
        self.deps
            .router
            .publish(
                FanoutScope::ExceptSender {
                    sender: ctx.connection_id,
                    room_id,
                },
                ServerEvent::NewMessage(payload.clone()),
            )
            .await;
        self.deps
            .router
            .publish(
                FanoutScope::Sender(ctx.connection_id),
                ServerEvent::MessageSent {
                    message: payload,
                    temp_id,
                },
            )
            .await;

        tracing::info!(
            connection_id = %ctx.connection_id,
            room_id = %room_id,
            message_id = %message.id,
            "消息已发送"
        );
        Ok(message)
    }

    pub async fn edit(
        &self,
        ctx: &ConnectionContext,
        message_id: MessageId,
        content: String,
    ) -> Result<Message, ApplicationError> {
        let content = MessageContent::new(content)?;
        let mut message = self.owned_message(ctx, message_id).await?;

        message.edit(content, self.deps.clock.now());
        let message = self.deps.message_repository.update(message).await?;

        self.deps
            .router
            .publish_to_room_and_sender(
                ctx.connection_id,
                message.room_id,
                ServerEvent::MessageUpdated(MessagePayload::new(
                    &message,
                    ctx.identity.email.clone(),
                )),
            )
            .await;
        tracing::info!(message_id = %message_id, user_id = %ctx.user_id(), "消息已编辑");
        Ok(message)
    }

    pub async fn delete(
        &self,
        ctx: &ConnectionContext,
        message_id: MessageId,
    ) -> Result<Message, ApplicationError> {
        let message = self.owned_message(ctx, message_id).await?;
        self.deps.message_repository.delete(message_id).await?;

        self.deps
            .router
            .publish_to_room_and_sender(
                ctx.connection_id,
                message.room_id,
                ServerEvent::MessageDeleted {
                    message_id,
                    room_id: message.room_id,
                },
            )
            .await;
        tracing::info!(message_id = %message_id, user_id = %ctx.user_id(), "消息已删除");
        Ok(message)
    }

    /// 清空房间的全部消息，仅房主可以执行。返回删除数量。
    pub async fn clear_room(
        &self,
        ctx: &ConnectionContext,
        room_id: RoomId,
    ) -> Result<u64, ApplicationError> {
        if !self
            .deps
            .room_repository
            .is_owner(room_id, ctx.user_id())
            .await?
        {
            return match self.deps.room_repository.find_by_id(room_id).await? {
                Some(_) => Err(ApplicationError::forbidden(
                    "only the room owner can clear the room",
                )),
                None => Err(ApplicationError::not_found("room")),
            };
        }

        let removed = self.deps.message_repository.delete_by_room(room_id).await?;
        self.deps
            .router
            .publish_to_room_and_sender(
                ctx.connection_id,
                room_id,
                ServerEvent::RoomCleared {
                    room_id,
                    cleared_by: ctx.user_id(),
                    timestamp: self.deps.clock.now(),
                },
            )
            .await;
        tracing::info!(room_id = %room_id, user_id = %ctx.user_id(), removed, "房间消息已清空");
        Ok(removed)
    }

    /// 读取消息并确认调用者是发送者
    async fn owned_message(
        &self,
        ctx: &ConnectionContext,
        message_id: MessageId,
    ) -> Result<Message, ApplicationError> {
        let message = self
            .deps
            .message_repository
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("message"))?;

        if !message.is_sent_by(ctx.user_id()) {
            tracing::warn!(
                message_id = %message_id,
                user_id = %ctx.user_id(),
                "拒绝修改他人的消息"
            );
            return Err(ApplicationError::forbidden(
                "you can only modify your own messages",
            ));
        }
        Ok(message)
    }
}
