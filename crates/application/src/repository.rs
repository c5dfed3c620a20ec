use async_trait::async_trait;
use domain::{
    ChatRoom, Emoji, Message, MessageId, NewMessage, Reaction, ReadReceipt, RepositoryError,
    RoomId, UserId,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 持久化新消息并返回带存储 id 的实体
    async fn create(&self, message: NewMessage) -> Result<Message, RepositoryError>;
    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;
    async fn update(&self, message: Message) -> Result<Message, RepositoryError>;
    /// 删除消息，连带删除其表情回应与已读回执
    async fn delete(&self, id: MessageId) -> Result<(), RepositoryError>;
    /// 清空房间，返回删除的消息数
    async fn delete_by_room(&self, room_id: RoomId) -> Result<u64, RepositoryError>;
    /// 房间内由他人发送、且读者尚无回执的消息，按 id 升序
    async fn unread_for_reader(
        &self,
        room_id: RoomId,
        reader: UserId,
    ) -> Result<Vec<Message>, RepositoryError>;
    async fn count_unread(&self, room_id: RoomId, reader: UserId) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait ReactionRepository: Send + Sync {
    async fn find_for_user(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<Option<Reaction>, RepositoryError>;
    /// `(message_id, user_id)` 已存在时返回 `Conflict`
    async fn create(&self, reaction: Reaction) -> Result<Reaction, RepositoryError>;
    /// 仅当三元组完全匹配时删除，返回是否删除了记录
    async fn delete_exact(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &Emoji,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ReadReceiptRepository: Send + Sync {
    async fn find(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<Option<ReadReceipt>, RepositoryError>;
    /// `(message_id, user_id)` 已存在时返回 `Conflict`
    async fn create(&self, receipt: ReadReceipt) -> Result<ReadReceipt, RepositoryError>;
    /// 批量写入，跳过已存在的回执，只返回新写入的部分
    async fn create_many(
        &self,
        receipts: Vec<ReadReceipt>,
    ) -> Result<Vec<ReadReceipt>, RepositoryError>;
}

#[async_trait]
pub trait ChatRoomRepository: Send + Sync {
    async fn find_by_id(&self, id: RoomId) -> Result<Option<ChatRoom>, RepositoryError>;
    async fn is_owner(&self, room_id: RoomId, user_id: UserId) -> Result<bool, RepositoryError>;
}

/// 内存存储实现，约束与 PostgreSQL 实现一致（用于测试和无数据库部署）
pub mod memory {
    use super::*;
    use std::collections::{BTreeMap, HashMap, HashSet};
    use tokio::sync::RwLock;

    #[derive(Default)]
    struct MemoryState {
        last_message_id: i64,
        messages: BTreeMap<MessageId, Message>,
        reactions: HashMap<(MessageId, UserId), Reaction>,
        receipts: HashMap<(MessageId, UserId), ReadReceipt>,
        rooms: HashMap<RoomId, ChatRoom>,
    }

    impl MemoryState {
        fn unread(&self, room_id: RoomId, reader: UserId) -> impl Iterator<Item = &Message> {
            let read: HashSet<MessageId> = self
                .receipts
                .keys()
                .filter(|(_, user_id)| *user_id == reader)
                .map(|(message_id, _)| *message_id)
                .collect();
            self.messages.values().filter(move |message| {
                message.room_id == room_id
                    && message.sender_id != reader
                    && !read.contains(&message.id)
            })
        }

        fn cascade(&mut self, message_id: MessageId) {
            self.reactions.retain(|(id, _), _| *id != message_id);
            self.receipts.retain(|(id, _), _| *id != message_id);
        }
    }

    #[derive(Default)]
    pub struct InMemoryStore {
        state: RwLock<MemoryState>,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// 房间由 HTTP 层创建，这里提供直接写入的入口
        pub async fn insert_room(&self, room: ChatRoom) {
            self.state.write().await.rooms.insert(room.id, room);
        }

        /// 房间内的消息，按 id 升序
        pub async fn messages_in(&self, room_id: RoomId) -> Vec<Message> {
            self.state
                .read()
                .await
                .messages
                .values()
                .filter(|message| message.room_id == room_id)
                .cloned()
                .collect()
        }

        pub async fn reactions_on(&self, message_id: MessageId) -> Vec<Reaction> {
            self.state
                .read()
                .await
                .reactions
                .values()
                .filter(|reaction| reaction.message_id == message_id)
                .cloned()
                .collect()
        }

        pub async fn receipts_on(&self, message_id: MessageId) -> Vec<ReadReceipt> {
            self.state
                .read()
                .await
                .receipts
                .values()
                .filter(|receipt| receipt.message_id == message_id)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl MessageRepository for InMemoryStore {
        async fn create(&self, message: NewMessage) -> Result<Message, RepositoryError> {
            let mut state = self.state.write().await;
            state.last_message_id += 1;
            let message = Message::from_new(MessageId(state.last_message_id), message);
            state.messages.insert(message.id, message.clone());
            Ok(message)
        }

        async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
            Ok(self.state.read().await.messages.get(&id).cloned())
        }

        async fn update(&self, message: Message) -> Result<Message, RepositoryError> {
            let mut state = self.state.write().await;
            let slot = state
                .messages
                .get_mut(&message.id)
                .ok_or(RepositoryError::NotFound)?;
            *slot = message.clone();
            Ok(message)
        }

        async fn delete(&self, id: MessageId) -> Result<(), RepositoryError> {
            let mut state = self.state.write().await;
            state.messages.remove(&id).ok_or(RepositoryError::NotFound)?;
            state.cascade(id);
            Ok(())
        }

        async fn delete_by_room(&self, room_id: RoomId) -> Result<u64, RepositoryError> {
            let mut state = self.state.write().await;
            let doomed: Vec<MessageId> = state
                .messages
                .values()
                .filter(|message| message.room_id == room_id)
                .map(|message| message.id)
                .collect();
            for id in &doomed {
                state.messages.remove(id);
                state.cascade(*id);
            }
            Ok(doomed.len() as u64)
        }

        async fn unread_for_reader(
            &self,
            room_id: RoomId,
            reader: UserId,
        ) -> Result<Vec<Message>, RepositoryError> {
            Ok(self
                .state
                .read()
                .await
                .unread(room_id, reader)
                .cloned()
                .collect())
        }

        async fn count_unread(
            &self,
            room_id: RoomId,
            reader: UserId,
        ) -> Result<u64, RepositoryError> {
            Ok(self.state.read().await.unread(room_id, reader).count() as u64)
        }
    }

    #[async_trait]
    impl ReactionRepository for InMemoryStore {
        async fn find_for_user(
            &self,
            message_id: MessageId,
            user_id: UserId,
        ) -> Result<Option<Reaction>, RepositoryError> {
            Ok(self
                .state
                .read()
                .await
                .reactions
                .get(&(message_id, user_id))
                .cloned())
        }

        async fn create(&self, reaction: Reaction) -> Result<Reaction, RepositoryError> {
            let mut state = self.state.write().await;
            if !state.messages.contains_key(&reaction.message_id) {
                return Err(RepositoryError::NotFound);
            }
            let key = (reaction.message_id, reaction.user_id);
            if state.reactions.contains_key(&key) {
                return Err(RepositoryError::Conflict);
            }
            state.reactions.insert(key, reaction.clone());
            Ok(reaction)
        }

        async fn delete_exact(
            &self,
            message_id: MessageId,
            user_id: UserId,
            emoji: &Emoji,
        ) -> Result<bool, RepositoryError> {
            let mut state = self.state.write().await;
            let key = (message_id, user_id);
            match state.reactions.get(&key) {
                Some(existing) if &existing.emoji == emoji => {
                    state.reactions.remove(&key);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }

    #[async_trait]
    impl ReadReceiptRepository for InMemoryStore {
        async fn find(
            &self,
            message_id: MessageId,
            user_id: UserId,
        ) -> Result<Option<ReadReceipt>, RepositoryError> {
            Ok(self
                .state
                .read()
                .await
                .receipts
                .get(&(message_id, user_id))
                .cloned())
        }

        async fn create(&self, receipt: ReadReceipt) -> Result<ReadReceipt, RepositoryError> {
            let mut state = self.state.write().await;
            if !state.messages.contains_key(&receipt.message_id) {
                return Err(RepositoryError::NotFound);
            }
            let key = (receipt.message_id, receipt.user_id);
            if state.receipts.contains_key(&key) {
                return Err(RepositoryError::Conflict);
            }
            state.receipts.insert(key, receipt.clone());
            Ok(receipt)
        }

        async fn create_many(
            &self,
            receipts: Vec<ReadReceipt>,
        ) -> Result<Vec<ReadReceipt>, RepositoryError> {
            let mut state = self.state.write().await;
            let mut created = Vec::with_capacity(receipts.len());
            for receipt in receipts {
                let key = (receipt.message_id, receipt.user_id);
                if !state.messages.contains_key(&receipt.message_id)
                    || state.receipts.contains_key(&key)
                {
                    continue;
                }
                state.receipts.insert(key, receipt.clone());
                created.push(receipt);
            }
            Ok(created)
        }
    }

    #[async_trait]
    impl ChatRoomRepository for InMemoryStore {
        async fn find_by_id(&self, id: RoomId) -> Result<Option<ChatRoom>, RepositoryError> {
            Ok(self.state.read().await.rooms.get(&id).cloned())
        }

        async fn is_owner(&self, room_id: RoomId, user_id: UserId) -> Result<bool, RepositoryError> {
            Ok(self
                .state
                .read()
                .await
                .rooms
                .get(&room_id)
                .is_some_and(|room| room.is_owned_by(user_id)))
        }
    }

}
