use serde::{Deserialize, Serialize};

use crate::value_objects::{Emoji, MessageId, Timestamp, UserId};

/// 表情回应。每个用户在同一条消息上至多一条，设置新表情会替换旧表情。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: Emoji,
    pub created_at: Timestamp,
}

impl Reaction {
    pub fn new(message_id: MessageId, user_id: UserId, emoji: Emoji, at: Timestamp) -> Self {
        Self {
            message_id,
            user_id,
            emoji,
            created_at: at,
        }
    }
}
