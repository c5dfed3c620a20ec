//! 实时网关端到端单元测试
//!
//! 使用内存存储与通道出站端，覆盖消息扇出、已读回执、表情回应、所有权校验和断线清理。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use domain::{
    ChatRoom, ClientEvent, ConnectionId, Identity, MessageId, PresenceStatus, ReceiptStatus,
    RepositoryError, RoomId, ServerEvent, UserId,
};
use tokio::sync::mpsc;

use crate::{
    auth::{CredentialSources, CredentialVerifier},
    clock::SystemClock,
    error::ApplicationError,
    gateway::{RealtimeGateway, RealtimeGatewayDependencies},
    presence::ConnectionState,
    repository::{memory::InMemoryStore, MessageRepository, MockMessageRepository},
};

/// 令牌格式为 `<user_id>:<email>`
struct TokenVerifier;

#[async_trait]
impl CredentialVerifier for TokenVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, ApplicationError> {
        let (id, email) = token
            .split_once(':')
            .ok_or_else(|| ApplicationError::unauthorized("malformed token"))?;
        let id = id
            .parse::<i64>()
            .map_err(|_| ApplicationError::unauthorized("malformed token"))?;
        Ok(Identity::new(UserId(id), email))
    }
}

struct Client {
    id: ConnectionId,
    rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Client {
    fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

struct Harness {
    gateway: RealtimeGateway,
    store: Arc<InMemoryStore>,
}

impl Harness {
    async fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self::with_messages(store.clone(), store).await
    }

    async fn with_messages(
        store: Arc<InMemoryStore>,
        messages: Arc<dyn MessageRepository>,
    ) -> Self {
        store
            .insert_room(ChatRoom {
                id: RoomId(1),
                name: "general".into(),
                owner_id: UserId(1),
                created_at: Utc::now(),
            })
            .await;
        let gateway = RealtimeGateway::new(RealtimeGatewayDependencies {
            verifier: Arc::new(TokenVerifier),
            message_repository: messages,
            reaction_repository: store.clone(),
            receipt_repository: store.clone(),
            room_repository: store.clone(),
            clock: Arc::new(SystemClock),
        });
        Self { gateway, store }
    }

    async fn connect(&self, user: i64) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        let sources = CredentialSources::default()
            .with_query(Some(&format!("token={user}:user{user}@example.com")));
        let id = self
            .gateway
            .connect(&sources, Arc::new(tx))
            .await
            .expect("connect");
        Client { id, rx }
    }

    async fn send(&self, client: &Client, event: ClientEvent) {
        self.gateway.handle(client.id, event).await;
    }

    async fn join(&self, client: &Client, room: i64) {
        self.send(client, ClientEvent::JoinRoom { room_id: RoomId(room) })
            .await;
    }

    async fn post(&self, client: &Client, room: i64, content: &str) -> MessageId {
        self.send(
            client,
            ClientEvent::SendMessage {
                room_id: RoomId(room),
                content: content.into(),
                temp_id: None,
            },
        )
        .await;
        self.store
            .messages_in(RoomId(room))
            .await
            .last()
            .map(|message| message.id)
            .expect("message persisted")
    }
}

fn status_events(events: &[ServerEvent]) -> Vec<(MessageId, UserId)> {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::MessageStatus {
                message_id,
                user_id,
                status: ReceiptStatus::Read,
                ..
            } => Some((*message_id, *user_id)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn sender_gets_confirmation_and_room_gets_new_message() {
    let harness = Harness::new().await;
    let mut alice = harness.connect(1).await;
    let mut bob = harness.connect(2).await;
    harness.join(&alice, 1).await;
    harness.join(&bob, 1).await;
    alice.drain();
    bob.drain();

    harness
        .send(
            &alice,
            ClientEvent::SendMessage {
                room_id: RoomId(1),
                content: "hi".into(),
                temp_id: Some("t1".into()),
            },
        )
        .await;

    let alice_events = alice.drain();
    assert_eq!(alice_events.len(), 1);
    let ServerEvent::MessageSent { message, temp_id } = &alice_events[0] else {
        panic!("expected message-sent, got {alice_events:?}");
    };
    assert_eq!(message.content, "hi");
    assert_eq!(temp_id.as_deref(), Some("t1"));

    let bob_events = bob.drain();
    assert_eq!(bob_events, vec![ServerEvent::NewMessage(message.clone())]);

    harness
        .send(
            &bob,
            ClientEvent::MessageRead {
                room_id: Some(RoomId(1)),
                message_id: message.id,
            },
        )
        .await;
    assert_eq!(status_events(&alice.drain()), vec![(message.id, UserId(2))]);
    assert_eq!(status_events(&bob.drain()), vec![(message.id, UserId(2))]);
}

#[tokio::test]
async fn new_message_reaches_every_other_subscriber_once() {
    let harness = Harness::new().await;
    let mut alice = harness.connect(1).await;
    let mut bob = harness.connect(2).await;
    let mut carol = harness.connect(3).await;
    let mut outsider = harness.connect(4).await;
    for client in [&alice, &bob, &carol] {
        harness.join(client, 1).await;
    }
    for client in [&mut alice, &mut bob, &mut carol, &mut outsider] {
        client.drain();
    }

    harness.post(&alice, 1, "hello room").await;

    let alice_events = alice.drain();
    assert!(alice_events
        .iter()
        .all(|event| !matches!(event, ServerEvent::NewMessage(_))));
    assert_eq!(alice_events.len(), 1);
    for client in [&mut bob, &mut carol] {
        let events = client.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ServerEvent::NewMessage(_)));
    }
    assert!(outsider.drain().is_empty());
}

#[tokio::test]
async fn changing_reaction_removes_old_before_adding_new() {
    let harness = Harness::new().await;
    let mut alice = harness.connect(1).await;
    let mut bob = harness.connect(2).await;
    harness.join(&alice, 1).await;
    harness.join(&bob, 1).await;
    let message_id = harness.post(&alice, 1, "react to me").await;

    let react = |emoji: &str| ClientEvent::AddReaction {
        room_id: Some(RoomId(1)),
        message_id,
        emoji: emoji.into(),
    };
    harness.send(&bob, react("👍")).await;
    alice.drain();
    bob.drain();

    harness.send(&bob, react("🎉")).await;
    for events in [alice.drain(), bob.drain()] {
        let names: Vec<_> = events.iter().map(ServerEvent::name).collect();
        assert_eq!(names, vec!["reaction-removed", "reaction-added"]);
        assert!(matches!(
            &events[0],
            ServerEvent::ReactionRemoved { emoji, .. } if emoji.as_str() == "👍"
        ));
        assert!(matches!(
            &events[1],
            ServerEvent::ReactionAdded { emoji, .. } if emoji.as_str() == "🎉"
        ));
    }

    let stored = harness.store.reactions_on(message_id).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].emoji.as_str(), "🎉");
    assert_eq!(stored[0].user_id, UserId(2));

    // 同一个表情重复添加是无操作
    harness.send(&bob, react("🎉")).await;
    assert!(alice.drain().is_empty());
    assert!(bob.drain().is_empty());
}

#[tokio::test]
async fn removing_a_missing_reaction_is_silent() {
    let harness = Harness::new().await;
    let mut alice = harness.connect(1).await;
    harness.join(&alice, 1).await;
    let message_id = harness.post(&alice, 1, "nothing here").await;
    alice.drain();

    harness
        .send(
            &alice,
            ClientEvent::RemoveReaction {
                room_id: Some(RoomId(1)),
                message_id,
                emoji: "👍".into(),
            },
        )
        .await;
    assert!(alice.drain().is_empty());
}

#[tokio::test]
async fn marking_read_twice_is_idempotent() {
    let harness = Harness::new().await;
    let mut alice = harness.connect(1).await;
    let mut bob = harness.connect(2).await;
    harness.join(&alice, 1).await;
    harness.join(&bob, 1).await;
    let message_id = harness.post(&alice, 1, "read me").await;
    alice.drain();
    bob.drain();

    let read = ClientEvent::MessageRead {
        room_id: Some(RoomId(1)),
        message_id,
    };
    harness.send(&bob, read.clone()).await;
    harness.send(&bob, read).await;

    assert_eq!(harness.store.receipts_on(message_id).await.len(), 1);
    assert_eq!(status_events(&alice.drain()).len(), 1);
    assert_eq!(status_events(&bob.drain()).len(), 1);

    // 自己的消息不产生回执
    harness
        .send(
            &alice,
            ClientEvent::MessageRead {
                room_id: None,
                message_id,
            },
        )
        .await;
    assert!(alice.drain().is_empty());
    assert_eq!(harness.store.receipts_on(message_id).await.len(), 1);
}

#[tokio::test]
async fn mark_room_read_creates_one_receipt_per_unread_message() {
    let harness = Harness::new().await;
    let mut alice = harness.connect(1).await;
    let mut bob = harness.connect(2).await;
    harness.join(&alice, 1).await;
    harness.join(&bob, 1).await;
    let mut expected = Vec::new();
    for n in 0..3 {
        expected.push(harness.post(&alice, 1, &format!("message {n}")).await);
    }
    let own = harness.post(&bob, 1, "mine").await;
    alice.drain();
    bob.drain();

    harness
        .send(&bob, ClientEvent::MarkRoomRead { room_id: RoomId(1) })
        .await;

    let mut ids: Vec<_> = status_events(&bob.drain())
        .into_iter()
        .map(|(message_id, _)| message_id)
        .collect();
    ids.sort();
    assert_eq!(ids, expected);
    assert_eq!(status_events(&alice.drain()).len(), 3);
    assert!(harness.store.receipts_on(own).await.is_empty());

    harness
        .send(&bob, ClientEvent::MarkRoomRead { room_id: RoomId(1) })
        .await;
    assert!(bob.drain().is_empty());
}

#[tokio::test]
async fn only_the_sender_may_edit_or_delete() {
    let harness = Harness::new().await;
    let mut alice = harness.connect(1).await;
    let mut bob = harness.connect(2).await;
    harness.join(&alice, 1).await;
    harness.join(&bob, 1).await;
    let message_id = harness.post(&alice, 1, "original").await;
    alice.drain();
    bob.drain();

    harness
        .send(
            &bob,
            ClientEvent::EditMessage {
                room_id: Some(RoomId(1)),
                message_id,
                content: "hijacked".into(),
            },
        )
        .await;
    harness
        .send(
            &bob,
            ClientEvent::DeleteMessage {
                room_id: Some(RoomId(1)),
                message_id,
            },
        )
        .await;

    let bob_events = bob.drain();
    assert_eq!(bob_events.len(), 2);
    assert!(bob_events
        .iter()
        .all(|event| matches!(event, ServerEvent::Error { code, .. } if code == "FORBIDDEN")));
    assert!(alice.drain().is_empty());
    let stored = harness.store.find_by_id(message_id).await.unwrap().unwrap();
    assert_eq!(stored.content.as_str(), "original");
    assert!(!stored.is_edited);

    harness
        .send(
            &alice,
            ClientEvent::EditMessage {
                room_id: None,
                message_id,
                content: "revised".into(),
            },
        )
        .await;
    let updated = bob.drain();
    assert!(matches!(
        &updated[..],
        [ServerEvent::MessageUpdated(payload)] if payload.content == "revised" && payload.is_edited
    ));
    assert_eq!(alice.drain().len(), 1);

    harness
        .send(
            &alice,
            ClientEvent::DeleteMessage {
                room_id: None,
                message_id,
            },
        )
        .await;
    assert_eq!(
        bob.drain(),
        vec![ServerEvent::MessageDeleted {
            message_id,
            room_id: RoomId(1)
        }]
    );
    assert!(harness.store.find_by_id(message_id).await.unwrap().is_none());
}

#[tokio::test]
async fn editing_a_missing_message_is_not_found() {
    let harness = Harness::new().await;
    let mut alice = harness.connect(1).await;
    harness
        .send(
            &alice,
            ClientEvent::EditMessage {
                room_id: None,
                message_id: MessageId(404),
                content: "anything".into(),
            },
        )
        .await;
    assert!(matches!(
        &alice.drain()[..],
        [ServerEvent::Error { code, .. }] if code == "NOT_FOUND"
    ));
}

#[tokio::test]
async fn clear_room_requires_ownership() {
    let harness = Harness::new().await;
    let mut alice = harness.connect(1).await;
    let mut bob = harness.connect(2).await;
    harness.join(&alice, 1).await;
    harness.join(&bob, 1).await;
    let message_id = harness.post(&alice, 1, "soon gone").await;
    alice.drain();
    bob.drain();

    harness
        .send(&bob, ClientEvent::ClearRoom { room_id: RoomId(1) })
        .await;
    assert!(matches!(
        &bob.drain()[..],
        [ServerEvent::Error { code, .. }] if code == "FORBIDDEN"
    ));
    assert!(alice.drain().is_empty());

    harness
        .send(&alice, ClientEvent::ClearRoom { room_id: RoomId(99) })
        .await;
    assert!(matches!(
        &alice.drain()[..],
        [ServerEvent::Error { code, .. }] if code == "NOT_FOUND"
    ));

    harness
        .send(&alice, ClientEvent::ClearRoom { room_id: RoomId(1) })
        .await;
    for client in [&mut alice, &mut bob] {
        assert!(matches!(
            &client.drain()[..],
            [ServerEvent::RoomCleared { cleared_by: UserId(1), .. }]
        ));
    }
    assert!(harness.store.find_by_id(message_id).await.unwrap().is_none());
}

#[tokio::test]
async fn disconnect_notifies_every_room_once_and_goes_offline() {
    let harness = Harness::new().await;
    let alice = harness.connect(1).await;
    let mut bob = harness.connect(2).await;
    let mut carol = harness.connect(3).await;
    harness.join(&alice, 1).await;
    harness.join(&alice, 2).await;
    harness.join(&bob, 1).await;
    harness.join(&carol, 2).await;
    bob.drain();
    carol.drain();

    harness.gateway.disconnect(alice.id).await;

    assert!(!harness.gateway.presence().is_online(UserId(1)).await);
    assert_eq!(
        harness.gateway.presence().state(alice.id).await,
        ConnectionState::Disconnected
    );
    assert!(harness.gateway.router().subscribers(RoomId(1)).await.iter().all(|id| *id != alice.id));

    for (client, room) in [(&mut bob, RoomId(1)), (&mut carol, RoomId(2))] {
        let events = client.drain();
        let room_notices: Vec<_> = events
            .iter()
            .filter(|event| {
                matches!(event, ServerEvent::UserStatus {
                    user_id: UserId(1),
                    status: PresenceStatus::Offline,
                    room_id: Some(r),
                    ..
                } if *r == room)
            })
            .collect();
        assert_eq!(room_notices.len(), 1);
        // 房间通知在全局通知之前
        assert!(matches!(
            events.last(),
            Some(ServerEvent::UserStatus { room_id: None, status: PresenceStatus::Offline, .. })
        ));
    }
}

#[tokio::test]
async fn second_device_keeps_user_online() {
    let harness = Harness::new().await;
    let mut bob = harness.connect(2).await;
    harness.join(&bob, 1).await;
    bob.drain();

    let phone = harness.connect(1).await;
    let laptop = harness.connect(1).await;
    let online: Vec<_> = bob
        .drain()
        .into_iter()
        .filter(|event| matches!(event, ServerEvent::UserStatus { status: PresenceStatus::Online, .. }))
        .collect();
    assert_eq!(online.len(), 1);

    harness.join(&phone, 1).await;
    harness.join(&phone, 2).await;
    harness.join(&laptop, 1).await;
    bob.drain();

    harness.gateway.disconnect(phone.id).await;
    assert!(harness.gateway.presence().is_online(UserId(1)).await);
    assert!(bob
        .drain()
        .iter()
        .all(|event| !matches!(event, ServerEvent::UserStatus { .. } | ServerEvent::UserLeft { .. })));

    harness.gateway.disconnect(laptop.id).await;
    assert!(!harness.gateway.presence().is_online(UserId(1)).await);
    let offline: Vec<_> = bob
        .drain()
        .into_iter()
        .filter(|event| matches!(event, ServerEvent::UserStatus { status: PresenceStatus::Offline, .. }))
        .collect();
    assert_eq!(offline.len(), 2);
}

#[tokio::test]
async fn leaving_a_room_notifies_remaining_members() {
    let harness = Harness::new().await;
    let mut alice = harness.connect(1).await;
    let mut bob = harness.connect(2).await;
    harness.join(&alice, 1).await;
    harness.join(&bob, 1).await;
    alice.drain();
    bob.drain();

    harness
        .send(&alice, ClientEvent::LeaveRoom { room_id: RoomId(1) })
        .await;
    assert!(matches!(
        &bob.drain()[..],
        [ServerEvent::UserLeft { user_id: UserId(1), .. }]
    ));
    assert!(alice.drain().is_empty());

    // 再次离开是无操作
    harness
        .send(&alice, ClientEvent::LeaveRoom { room_id: RoomId(1) })
        .await;
    assert!(bob.drain().is_empty());
}

#[tokio::test]
async fn joining_replies_with_unread_count_and_members() {
    let harness = Harness::new().await;
    let mut alice = harness.connect(1).await;
    let mut bob = harness.connect(2).await;
    harness.join(&alice, 1).await;
    harness.post(&alice, 1, "one").await;
    harness.post(&alice, 1, "two").await;
    alice.drain();
    bob.drain();

    harness.join(&bob, 1).await;
    let bob_events = bob.drain();
    assert!(matches!(
        &bob_events[..],
        [
            ServerEvent::JoinedRoom { unread_count: 2, .. },
            ServerEvent::RoomUsers { count: 2, .. }
        ]
    ));
    assert!(matches!(
        &alice.drain()[..],
        [ServerEvent::UserJoined { user_id: UserId(2), .. }]
    ));

    // 重复加入只重新确认，不再通知他人
    harness.join(&bob, 1).await;
    assert!(alice.drain().is_empty());
    assert_eq!(bob.drain().len(), 2);
}

#[tokio::test]
async fn typing_reaches_others_only() {
    let harness = Harness::new().await;
    let mut alice = harness.connect(1).await;
    let mut bob = harness.connect(2).await;
    harness.join(&alice, 1).await;
    harness.join(&bob, 1).await;
    alice.drain();
    bob.drain();

    harness
        .send(
            &alice,
            ClientEvent::Typing {
                room_id: RoomId(1),
                is_typing: true,
            },
        )
        .await;
    assert!(alice.drain().is_empty());
    assert!(matches!(
        &bob.drain()[..],
        [ServerEvent::UserTyping { user_id: UserId(1), is_typing: true, .. }]
    ));
}

#[tokio::test]
async fn check_user_status_reflects_presence() {
    let harness = Harness::new().await;
    let mut alice = harness.connect(1).await;
    let bob = harness.connect(2).await;
    let check = ClientEvent::CheckUserStatus { user_id: UserId(2) };
    alice.drain();

    harness.send(&alice, check.clone()).await;
    assert_eq!(
        alice.drain(),
        vec![ServerEvent::UserStatusResponse {
            user_id: UserId(2),
            status: PresenceStatus::Online
        }]
    );

    harness.gateway.disconnect(bob.id).await;
    alice.drain();
    harness.send(&alice, check).await;
    assert_eq!(
        alice.drain(),
        vec![ServerEvent::UserStatusResponse {
            user_id: UserId(2),
            status: PresenceStatus::Offline
        }]
    );
}

#[tokio::test]
async fn connect_announces_identity_to_the_new_connection() {
    let harness = Harness::new().await;
    let mut alice = harness.connect(1).await;
    let events = alice.drain();
    assert!(matches!(
        &events[..],
        [
            ServerEvent::Connected { user_id: UserId(1), .. },
            ServerEvent::UserStatus { status: PresenceStatus::Online, room_id: None, .. }
        ]
    ));
    assert_eq!(
        harness.gateway.presence().state(alice.id).await,
        ConnectionState::Authenticated
    );
}

#[tokio::test]
async fn unauthorized_handshake_leaves_no_state() {
    let harness = Harness::new().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let result = harness
        .gateway
        .connect(&CredentialSources::default(), Arc::new(tx))
        .await;
    assert!(matches!(result, Err(ApplicationError::Unauthorized(_))));

    let (tx, _rx) = mpsc::unbounded_channel();
    let bad = CredentialSources::default().with_query(Some("token=garbage"));
    assert!(harness.gateway.connect(&bad, Arc::new(tx)).await.is_err());
    assert!(harness.gateway.registry().is_empty().await);
}

#[tokio::test]
async fn malformed_frames_get_a_validation_error_and_the_connection_survives() {
    let harness = Harness::new().await;
    let mut alice = harness.connect(1).await;
    alice.drain();

    harness
        .gateway
        .handle_frame(alice.id, r#"{"event":"self-destruct","data":{}}"#)
        .await;
    assert!(matches!(
        &alice.drain()[..],
        [ServerEvent::Error { code, .. }] if code == "VALIDATION_ERROR"
    ));

    harness
        .gateway
        .handle_frame(alice.id, r#"{"event":"check-user-status","data":{"userId":1}}"#)
        .await;
    assert!(matches!(
        &alice.drain()[..],
        [ServerEvent::UserStatusResponse { status: PresenceStatus::Online, .. }]
    ));
}

#[tokio::test]
async fn invalid_content_is_reported_as_message_error() {
    let harness = Harness::new().await;
    let mut alice = harness.connect(1).await;
    let mut bob = harness.connect(2).await;
    harness.join(&alice, 1).await;
    harness.join(&bob, 1).await;
    alice.drain();
    bob.drain();

    harness
        .send(
            &alice,
            ClientEvent::SendMessage {
                room_id: RoomId(1),
                content: "   ".into(),
                temp_id: Some("t-empty".into()),
            },
        )
        .await;
    assert!(matches!(
        &alice.drain()[..],
        [ServerEvent::MessageError { temp_id: Some(t), .. }] if t == "t-empty"
    ));
    assert!(bob.drain().is_empty());
}

#[tokio::test]
async fn storage_failure_on_send_rolls_back_via_message_error() {
    let mut messages = MockMessageRepository::new();
    messages.expect_count_unread().returning(|_, _| Ok(0));
    messages
        .expect_create()
        .returning(|_| Err(RepositoryError::storage("database unavailable")));
    let harness = Harness::with_messages(Arc::new(InMemoryStore::new()), Arc::new(messages)).await;

    let mut alice = harness.connect(1).await;
    let mut bob = harness.connect(2).await;
    harness.join(&alice, 1).await;
    harness.join(&bob, 1).await;
    alice.drain();
    bob.drain();

    harness
        .send(
            &alice,
            ClientEvent::SendMessage {
                room_id: RoomId(1),
                content: "will fail".into(),
                temp_id: Some("t9".into()),
            },
        )
        .await;
    assert!(matches!(
        &alice.drain()[..],
        [ServerEvent::MessageError { temp_id: Some(t), error }]
            if t == "t9" && error.contains("database unavailable")
    ));
    assert!(bob.drain().is_empty());
}

#[tokio::test]
async fn failed_join_leaves_membership_untouched() {
    let mut messages = MockMessageRepository::new();
    messages
        .expect_count_unread()
        .returning(|_, _| Err(RepositoryError::storage("timeout")));
    let harness = Harness::with_messages(Arc::new(InMemoryStore::new()), Arc::new(messages)).await;

    let mut alice = harness.connect(1).await;
    alice.drain();
    harness.join(&alice, 1).await;

    assert!(matches!(
        &alice.drain()[..],
        [ServerEvent::Error { code, .. }] if code == "PERSISTENCE_FAILURE"
    ));
    assert!(harness.gateway.router().subscribers(RoomId(1)).await.is_empty());
    assert_eq!(
        harness.gateway.presence().state(alice.id).await,
        ConnectionState::Authenticated
    );
}
