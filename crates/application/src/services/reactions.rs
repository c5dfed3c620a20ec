use std::sync::Arc;

use domain::{Emoji, MessageId, Reaction, RepositoryError, ServerEvent};

use crate::{
    clock::Clock,
    connection_registry::ConnectionContext,
    error::ApplicationError,
    fanout::RoomFanoutRouter,
    repository::{MessageRepository, ReactionRepository},
};

/// 添加表情回应后的状态迁移
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionTransition {
    Added(Reaction),
    /// 旧表情被移除并替换为新表情
    Replaced { previous: Reaction, current: Reaction },
    /// 已经是同一个表情，不产生事件
    Unchanged(Reaction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionRemoval {
    Removed,
    Absent,
}

pub struct ReactionDependencies {
    pub message_repository: Arc<dyn MessageRepository>,
    pub reaction_repository: Arc<dyn ReactionRepository>,
    pub router: Arc<RoomFanoutRouter>,
    pub clock: Arc<dyn Clock>,
}

/// 表情回应协调：每个用户在一条消息上至多一个表情
pub struct ReactionReconciler {
    deps: ReactionDependencies,
}

impl ReactionReconciler {
    pub fn new(deps: ReactionDependencies) -> Self {
        Self { deps }
    }

    pub async fn add_reaction(
        &self,
        ctx: &ConnectionContext,
        message_id: MessageId,
        emoji: String,
    ) -> Result<ReactionTransition, ApplicationError> {
        let emoji = Emoji::new(emoji)?;
        let message = self
            .deps
            .message_repository
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("message"))?;
        let user_id = ctx.user_id();

        let previous = match self
            .deps
            .reaction_repository
            .find_for_user(message_id, user_id)
            .await?
        {
            Some(existing) if existing.emoji == emoji => {
                return Ok(ReactionTransition::Unchanged(existing));
            }
            Some(existing) => {
                if self
                    .deps
                    .reaction_repository
                    .delete_exact(message_id, user_id, &existing.emoji)
                    .await?
                {
                    self.deps
                        .router
                        .publish_to_room_and_sender(
                            ctx.connection_id,
                            message.room_id,
                            ServerEvent::ReactionRemoved {
                                message_id,
                                user_id,
                                emoji: existing.emoji.clone(),
                                timestamp: self.deps.clock.now(),
                            },
                        )
                        .await;
                }
                Some(existing)
            }
            None => None,
        };

        let reaction = Reaction::new(message_id, user_id, emoji, self.deps.clock.now());
        let current = match self.deps.reaction_repository.create(reaction).await {
            Ok(current) => current,
            // 并发写入已经落地了一条回应，以存储为准
            Err(RepositoryError::Conflict) => {
                return self
                    .deps
                    .reaction_repository
                    .find_for_user(message_id, user_id)
                    .await?
                    .map(ReactionTransition::Unchanged)
                    .ok_or_else(|| {
                        ApplicationError::persistence("reaction vanished after conflict")
                    });
            }
            Err(err) => return Err(err.into()),
        };

        self.deps
            .router
            .publish_to_room_and_sender(
                ctx.connection_id,
                message.room_id,
                ServerEvent::ReactionAdded {
                    message_id,
                    user_id,
                    emoji: current.emoji.clone(),
                    timestamp: current.created_at,
                },
            )
            .await;
        tracing::debug!(message_id = %message_id, user_id = %user_id, emoji = %current.emoji, "表情回应已添加");

        Ok(match previous {
            Some(previous) => ReactionTransition::Replaced { previous, current },
            None => ReactionTransition::Added(current),
        })
    }

    /// 只在三元组完全匹配时删除；不存在的回应静默忽略
    pub async fn remove_reaction(
        &self,
        ctx: &ConnectionContext,
        message_id: MessageId,
        emoji: String,
    ) -> Result<ReactionRemoval, ApplicationError> {
        let emoji = Emoji::new(emoji)?;
        let Some(message) = self
            .deps
            .message_repository
            .find_by_id(message_id)
            .await?
        else {
            return Ok(ReactionRemoval::Absent);
        };

        let user_id = ctx.user_id();
        if !self
            .deps
            .reaction_repository
            .delete_exact(message_id, user_id, &emoji)
            .await?
        {
            return Ok(ReactionRemoval::Absent);
        }

        self.deps
            .router
            .publish_to_room_and_sender(
                ctx.connection_id,
                message.room_id,
                ServerEvent::ReactionRemoved {
                    message_id,
                    user_id,
                    emoji,
                    timestamp: self.deps.clock.now(),
                },
            )
            .await;
        Ok(ReactionRemoval::Removed)
    }
}
