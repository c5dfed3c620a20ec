use serde::{Deserialize, Serialize};

use crate::value_objects::{MessageContent, MessageId, RoomId, Timestamp, UserId};

/// 尚未持久化的消息，id 由存储层分配。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub created_at: Timestamp,
}

impl NewMessage {
    pub fn new(room_id: RoomId, sender_id: UserId, content: MessageContent, at: Timestamp) -> Self {
        Self {
            room_id,
            sender_id,
            content,
            created_at: at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub created_at: Timestamp,
    pub is_edited: bool,
    pub edited_at: Option<Timestamp>,
}

impl Message {
    pub fn from_new(id: MessageId, new: NewMessage) -> Self {
        Self {
            id,
            room_id: new.room_id,
            sender_id: new.sender_id,
            content: new.content,
            created_at: new.created_at,
            is_edited: false,
            edited_at: None,
        }
    }

    pub fn is_sent_by(&self, user_id: UserId) -> bool {
        self.sender_id == user_id
    }

    pub fn edit(&mut self, new_content: MessageContent, at: Timestamp) {
        self.content = new_content;
        self.is_edited = true;
        self.edited_at = Some(at);
    }
}
