use serde::{Deserialize, Serialize};

use crate::value_objects::{MessageId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Read,
}

/// 已读回执，`(message_id, user_id)` 唯一，一旦写入不再变化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub status: ReceiptStatus,
    pub read_at: Timestamp,
}

impl ReadReceipt {
    pub fn new(message_id: MessageId, user_id: UserId, at: Timestamp) -> Self {
        Self {
            message_id,
            user_id,
            status: ReceiptStatus::Read,
            read_at: at,
        }
    }
}
