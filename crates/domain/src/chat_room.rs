use serde::{Deserialize, Serialize};

use crate::value_objects::{RoomId, Timestamp, UserId};

/// 聊天室。房间的创建与成员管理由 HTTP 层负责，这里只关心归属。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: RoomId,
    pub name: String,
    pub owner_id: UserId,
    pub created_at: Timestamp,
}

impl ChatRoom {
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner_id == user_id
    }
}
