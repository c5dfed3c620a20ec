//! 实时网关：把连接生命周期与入站事件分派到各个核心组件
//!
//! 同一连接上的事件由传输层串行调用 [`RealtimeGateway::handle`]，
//! 不同连接之间互不等待。任何失败只会以事件形式回给出错的连接。

use std::collections::BTreeMap;
use std::sync::Arc;

use domain::{
    ClientEvent, ConnectionId, Identity, PresenceStatus, RoomId, RoomUser, ServerEvent,
};

use crate::{
    auth::{CredentialSources, CredentialVerifier},
    clock::Clock,
    connection_registry::{ConnectionContext, ConnectionRegistry},
    error::ApplicationError,
    fanout::{EventSink, FanoutScope, RoomFanoutRouter},
    presence::PresenceTracker,
    repository::{ChatRoomRepository, MessageRepository, ReactionRepository, ReadReceiptRepository},
    services::{
        MessageLifecycleCoordinator, MessageLifecycleDependencies, ReactionDependencies,
        ReactionReconciler, ReadReceiptAggregator, ReadReceiptDependencies,
    },
};

pub struct RealtimeGatewayDependencies {
    pub verifier: Arc<dyn CredentialVerifier>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub reaction_repository: Arc<dyn ReactionRepository>,
    pub receipt_repository: Arc<dyn ReadReceiptRepository>,
    pub room_repository: Arc<dyn ChatRoomRepository>,
    pub clock: Arc<dyn Clock>,
}

pub struct RealtimeGateway {
    registry: ConnectionRegistry,
    router: Arc<RoomFanoutRouter>,
    presence: PresenceTracker,
    messages: MessageLifecycleCoordinator,
    receipts: ReadReceiptAggregator,
    reactions: ReactionReconciler,
    clock: Arc<dyn Clock>,
}

impl RealtimeGateway {
    pub fn new(deps: RealtimeGatewayDependencies) -> Self {
        let router = Arc::new(RoomFanoutRouter::new());
        Self {
            registry: ConnectionRegistry::new(deps.verifier),
            presence: PresenceTracker::new(),
            messages: MessageLifecycleCoordinator::new(MessageLifecycleDependencies {
                message_repository: deps.message_repository.clone(),
                room_repository: deps.room_repository,
                router: router.clone(),
                clock: deps.clock.clone(),
            }),
            receipts: ReadReceiptAggregator::new(ReadReceiptDependencies {
                message_repository: deps.message_repository.clone(),
                receipt_repository: deps.receipt_repository,
                router: router.clone(),
                clock: deps.clock.clone(),
            }),
            reactions: ReactionReconciler::new(ReactionDependencies {
                message_repository: deps.message_repository,
                reaction_repository: deps.reaction_repository,
                router: router.clone(),
                clock: deps.clock.clone(),
            }),
            router,
            clock: deps.clock,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn router(&self) -> &RoomFanoutRouter {
        &self.router
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// 握手阶段校验凭证。失败的连接不会进入注册表。
    pub async fn authenticate(
        &self,
        connection_id: ConnectionId,
        sources: &CredentialSources,
    ) -> Result<Identity, ApplicationError> {
        self.presence.begin(connection_id).await;
        match self.registry.authenticate(connection_id, sources).await {
            Ok(identity) => Ok(identity),
            Err(err) => {
                self.presence.abandon(connection_id).await;
                Err(err)
            }
        }
    }

    /// 握手未能完成升级时释放 `Connecting` 状态
    pub async fn abandon(&self, connection_id: ConnectionId) {
        self.presence.abandon(connection_id).await;
    }

    /// 绑定身份并注册出站通道。用户的第一条连接会触发全局上线广播。
    pub async fn attach(
        &self,
        connection_id: ConnectionId,
        identity: Identity,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), ApplicationError> {
        let now = self.clock.now();
        let signal = self.registry.bind(connection_id, identity, now).await?;
        let first_connection = match self.presence.add_connection(signal).await {
            Ok(first) => first,
            Err(err) => {
                self.registry.unbind(connection_id).await;
                return Err(err);
            }
        };

        self.router.attach(connection_id, sink).await;
        self.router
            .publish(
                FanoutScope::Sender(connection_id),
                ServerEvent::Connected {
                    message: "Successfully connected to chat server".to_string(),
                    user_id: signal.user_id,
                },
            )
            .await;

        if first_connection {
            self.router
                .publish(
                    FanoutScope::Broadcast,
                    ServerEvent::UserStatus {
                        user_id: signal.user_id,
                        status: PresenceStatus::Online,
                        room_id: None,
                        timestamp: now,
                    },
                )
                .await;
        }
        Ok(())
    }

    /// `authenticate` 与 `attach` 的组合
    pub async fn connect(
        &self,
        sources: &CredentialSources,
        sink: Arc<dyn EventSink>,
    ) -> Result<ConnectionId, ApplicationError> {
        let connection_id = ConnectionId::new();
        let identity = self.authenticate(connection_id, sources).await?;
        self.attach(connection_id, identity, sink).await?;
        Ok(connection_id)
    }

    /// 解析文本帧并处理；无法解析的帧回复校验错误，连接保持打开
    pub async fn handle_frame(&self, connection_id: ConnectionId, text: &str) {
        match ClientEvent::from_json(text) {
            Ok(event) => self.handle(connection_id, event).await,
            Err(err) => {
                tracing::warn!(connection_id = %connection_id, error = %err, "无法解析的客户端帧");
                let err = ApplicationError::validation(err.to_string());
                self.router
                    .publish(
                        FanoutScope::Sender(connection_id),
                        ServerEvent::error(err.code(), err.to_string()),
                    )
                    .await;
            }
        }
    }

    pub async fn handle(&self, connection_id: ConnectionId, event: ClientEvent) {
        let Some(ctx) = self.registry.context(connection_id).await else {
            tracing::warn!(connection_id = %connection_id, event = event.name(), "未绑定身份的连接发送了事件");
            return;
        };

        let name = event.name();
        let send_temp_id = match &event {
            ClientEvent::SendMessage { temp_id, .. } => Some(temp_id.clone()),
            _ => None,
        };
        tracing::debug!(connection_id = %connection_id, user_id = %ctx.user_id(), event = name, "处理客户端事件");

        let Err(err) = self.dispatch(&ctx, event).await else {
            return;
        };

        tracing::warn!(
            connection_id = %connection_id,
            user_id = %ctx.user_id(),
            event = name,
            code = err.code(),
            error = %err,
            "客户端事件处理失败"
        );
        let reply = match send_temp_id {
            Some(temp_id) => ServerEvent::MessageError {
                error: err.to_string(),
                temp_id,
            },
            None => ServerEvent::error(err.code(), err.to_string()),
        };
        self.router
            .publish(FanoutScope::Sender(connection_id), reply)
            .await;
    }

    async fn dispatch(
        &self,
        ctx: &ConnectionContext,
        event: ClientEvent,
    ) -> Result<(), ApplicationError> {
        match event {
            ClientEvent::JoinRoom { room_id } => self.join_room(ctx, room_id).await,
            ClientEvent::LeaveRoom { room_id } => self.leave_room(ctx, room_id).await,
            ClientEvent::SendMessage {
                room_id,
                content,
                temp_id,
            } => self
                .messages
                .send(ctx, room_id, content, temp_id)
                .await
                .map(drop),
            ClientEvent::MessageRead { message_id, .. } => {
                self.receipts.mark_read(ctx, message_id).await.map(drop)
            }
            ClientEvent::MarkRoomRead { room_id } => {
                self.receipts.mark_room_read(ctx, room_id).await.map(drop)
            }
            ClientEvent::Typing { room_id, is_typing } => {
                self.router
                    .publish(
                        FanoutScope::ExceptSender {
                            sender: ctx.connection_id,
                            room_id,
                        },
                        ServerEvent::UserTyping {
                            user_id: ctx.user_id(),
                            email: ctx.identity.email.clone(),
                            room_id,
                            is_typing,
                        },
                    )
                    .await;
                Ok(())
            }
            ClientEvent::AddReaction {
                message_id, emoji, ..
            } => self
                .reactions
                .add_reaction(ctx, message_id, emoji)
                .await
                .map(drop),
            ClientEvent::RemoveReaction {
                message_id, emoji, ..
            } => self
                .reactions
                .remove_reaction(ctx, message_id, emoji)
                .await
                .map(drop),
            ClientEvent::EditMessage {
                message_id,
                content,
                ..
            } => self.messages.edit(ctx, message_id, content).await.map(drop),
            ClientEvent::DeleteMessage { message_id, .. } => {
                self.messages.delete(ctx, message_id).await.map(drop)
            }
            ClientEvent::ClearRoom { room_id } => {
                self.messages.clear_room(ctx, room_id).await.map(drop)
            }
            ClientEvent::CheckUserStatus { user_id } => {
                let status = if self.presence.is_online(user_id).await {
                    PresenceStatus::Online
                } else {
                    PresenceStatus::Offline
                };
                self.router
                    .publish(
                        FanoutScope::Sender(ctx.connection_id),
                        ServerEvent::UserStatusResponse { user_id, status },
                    )
                    .await;
                Ok(())
            }
            ClientEvent::GetRoomUsers { room_id } => {
                self.send_room_users(ctx, room_id).await;
                Ok(())
            }
        }
    }

    async fn join_room(
        &self,
        ctx: &ConnectionContext,
        room_id: RoomId,
    ) -> Result<(), ApplicationError> {
        // 先完成可能失败的读取，失败时不改动任何内存状态
        let unread_count = self.receipts.unread_count(ctx.user_id(), room_id).await?;
        self.presence.join_room(ctx.connection_id, room_id).await?;
        let newly_joined = self.router.subscribe(ctx.connection_id, room_id).await;

        if newly_joined {
            self.router
                .publish(
                    FanoutScope::ExceptSender {
                        sender: ctx.connection_id,
                        room_id,
                    },
                    ServerEvent::UserJoined {
                        user_id: ctx.user_id(),
                        email: ctx.identity.email.clone(),
                        room_id,
                        timestamp: self.clock.now(),
                    },
                )
                .await;
            tracing::info!(connection_id = %ctx.connection_id, user_id = %ctx.user_id(), room_id = %room_id, "加入房间");
        }

        self.router
            .publish(
                FanoutScope::Sender(ctx.connection_id),
                ServerEvent::JoinedRoom {
                    room_id,
                    message: format!("Successfully joined room {room_id}"),
                    unread_count,
                },
            )
            .await;
        self.send_room_users(ctx, room_id).await;
        Ok(())
    }

    async fn leave_room(
        &self,
        ctx: &ConnectionContext,
        room_id: RoomId,
    ) -> Result<(), ApplicationError> {
        self.presence.leave_room(ctx.connection_id, room_id).await?;
        let was_subscribed = self.router.unsubscribe(ctx.connection_id, room_id).await;

        // 同一用户的其他连接仍在房间里时不算离开
        if was_subscribed && !self.presence.is_in_room(ctx.user_id(), room_id).await {
            self.router
                .publish(
                    FanoutScope::Room(room_id),
                    ServerEvent::UserLeft {
                        user_id: ctx.user_id(),
                        email: ctx.identity.email.clone(),
                        room_id,
                        timestamp: self.clock.now(),
                    },
                )
                .await;
            tracing::info!(connection_id = %ctx.connection_id, user_id = %ctx.user_id(), room_id = %room_id, "离开房间");
        }
        Ok(())
    }

    async fn send_room_users(&self, ctx: &ConnectionContext, room_id: RoomId) {
        let subscribers = self.router.subscribers(room_id).await;
        let users: BTreeMap<_, _> = self
            .registry
            .identities(&subscribers)
            .await
            .into_iter()
            .map(|identity| (identity.user_id, identity.email))
            .collect();
        let users: Vec<RoomUser> = users
            .into_iter()
            .map(|(user_id, email)| RoomUser {
                user_id,
                email,
                status: PresenceStatus::Online,
            })
            .collect();

        self.router
            .publish(
                FanoutScope::Sender(ctx.connection_id),
                ServerEvent::RoomUsers {
                    room_id,
                    count: users.len(),
                    users,
                },
            )
            .await;
    }

    /// 连接关闭时清理全部状态。用户的最后一条连接离开时广播下线通知。
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let departure = self.presence.remove_connection(connection_id).await;
        self.router.detach(connection_id).await;
        let connection = self.registry.unbind(connection_id).await;

        let Some(departure) = departure else {
            return;
        };
        let now = self.clock.now();

        if departure.user_online {
            let email = connection
                .map(|connection| connection.identity.email)
                .unwrap_or_default();
            for room_id in departure.vacated_rooms {
                self.router
                    .publish(
                        FanoutScope::Room(room_id),
                        ServerEvent::UserLeft {
                            user_id: departure.user_id,
                            email: email.clone(),
                            room_id,
                            timestamp: now,
                        },
                    )
                    .await;
            }
            return;
        }

        for room_id in departure.freed_rooms {
            self.router
                .publish(
                    FanoutScope::Room(room_id),
                    ServerEvent::UserStatus {
                        user_id: departure.user_id,
                        status: PresenceStatus::Offline,
                        room_id: Some(room_id),
                        timestamp: now,
                    },
                )
                .await;
        }
        self.router
            .publish(
                FanoutScope::Broadcast,
                ServerEvent::UserStatus {
                    user_id: departure.user_id,
                    status: PresenceStatus::Offline,
                    room_id: None,
                    timestamp: now,
                },
            )
            .await;
        tracing::info!(connection_id = %connection_id, user_id = %departure.user_id, "用户已离线");
    }
}
