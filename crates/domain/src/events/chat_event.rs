//! 实时通道上的入站与出站事件
//!
//! 事件集合是封闭的：无法解析为 [`ClientEvent`] 的帧一律视为校验错误。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Message;
use crate::read_receipt::{ReadReceipt, ReceiptStatus};
use crate::value_objects::{Emoji, MessageId, RoomId, Timestamp, UserId};

/// 协议编解码错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid event frame: {0}")]
    InvalidFrame(String),
    #[error("failed to encode event: {0}")]
    Encode(String),
}

/// 客户端发往服务端的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinRoom {
        room_id: RoomId,
    },
    LeaveRoom {
        room_id: RoomId,
    },
    SendMessage {
        room_id: RoomId,
        content: String,
        /// 客户端乐观渲染时生成的临时 id，原样回传
        #[serde(default)]
        temp_id: Option<String>,
    },
    MessageRead {
        #[serde(default)]
        room_id: Option<RoomId>,
        message_id: MessageId,
    },
    MarkRoomRead {
        room_id: RoomId,
    },
    Typing {
        room_id: RoomId,
        is_typing: bool,
    },
    AddReaction {
        #[serde(default)]
        room_id: Option<RoomId>,
        message_id: MessageId,
        emoji: String,
    },
    RemoveReaction {
        #[serde(default)]
        room_id: Option<RoomId>,
        message_id: MessageId,
        emoji: String,
    },
    EditMessage {
        #[serde(default)]
        room_id: Option<RoomId>,
        message_id: MessageId,
        content: String,
    },
    DeleteMessage {
        #[serde(default)]
        room_id: Option<RoomId>,
        message_id: MessageId,
    },
    ClearRoom {
        room_id: RoomId,
    },
    CheckUserStatus {
        user_id: UserId,
    },
    GetRoomUsers {
        room_id: RoomId,
    },
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidFrame(e.to_string()))
    }

    /// 事件名，用于日志
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::LeaveRoom { .. } => "leave-room",
            Self::SendMessage { .. } => "send-message",
            Self::MessageRead { .. } => "message-read",
            Self::MarkRoomRead { .. } => "mark-room-read",
            Self::Typing { .. } => "typing",
            Self::AddReaction { .. } => "add-reaction",
            Self::RemoveReaction { .. } => "remove-reaction",
            Self::EditMessage { .. } => "edit-message",
            Self::DeleteMessage { .. } => "delete-message",
            Self::ClearRoom { .. } => "clear-room",
            Self::CheckUserStatus { .. } => "check-user-status",
            Self::GetRoomUsers { .. } => "get-room-users",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// 投递状态，服务端确认后的消息总是 `sent`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
}

/// 房间在线成员快照中的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUser {
    pub user_id: UserId,
    pub email: String,
    pub status: PresenceStatus,
}

/// 消息在事件中的表示
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: MessageId,
    pub room_id: RoomId,
    /// 发送者
    pub user_id: UserId,
    pub email: String,
    pub content: String,
    pub timestamp: Timestamp,
    pub is_edited: bool,
    pub edited_at: Option<Timestamp>,
    pub status: DeliveryStatus,
}

impl MessagePayload {
    pub fn new(message: &Message, sender_email: impl Into<String>) -> Self {
        Self {
            id: message.id,
            room_id: message.room_id,
            user_id: message.sender_id,
            email: sender_email.into(),
            content: message.content.as_str().to_owned(),
            timestamp: message.created_at,
            is_edited: message.is_edited,
            edited_at: message.edited_at,
            status: DeliveryStatus::Sent,
        }
    }
}

/// 服务端推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// 连接完成身份绑定
    Connected {
        message: String,
        user_id: UserId,
    },
    UserStatus {
        user_id: UserId,
        status: PresenceStatus,
        /// 只有房间范围的通知才携带
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
        timestamp: Timestamp,
    },
    UserStatusResponse {
        user_id: UserId,
        status: PresenceStatus,
    },
    UserJoined {
        user_id: UserId,
        email: String,
        room_id: RoomId,
        timestamp: Timestamp,
    },
    UserLeft {
        user_id: UserId,
        email: String,
        room_id: RoomId,
        timestamp: Timestamp,
    },
    JoinedRoom {
        room_id: RoomId,
        message: String,
        unread_count: u64,
    },
    RoomUsers {
        room_id: RoomId,
        users: Vec<RoomUser>,
        count: usize,
    },
    UserTyping {
        user_id: UserId,
        email: String,
        room_id: RoomId,
        is_typing: bool,
    },
    NewMessage(MessagePayload),
    MessageSent {
        #[serde(flatten)]
        message: MessagePayload,
        temp_id: Option<String>,
    },
    MessageError {
        error: String,
        temp_id: Option<String>,
    },
    MessageUpdated(MessagePayload),
    MessageDeleted {
        message_id: MessageId,
        room_id: RoomId,
    },
    RoomCleared {
        room_id: RoomId,
        cleared_by: UserId,
        timestamp: Timestamp,
    },
    MessageStatus {
        message_id: MessageId,
        user_id: UserId,
        room_id: RoomId,
        status: ReceiptStatus,
        read_at: Timestamp,
    },
    ReactionAdded {
        message_id: MessageId,
        user_id: UserId,
        emoji: Emoji,
        timestamp: Timestamp,
    },
    ReactionRemoved {
        message_id: MessageId,
        user_id: UserId,
        emoji: Emoji,
        timestamp: Timestamp,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn message_status(receipt: &ReadReceipt, room_id: RoomId) -> Self {
        Self::MessageStatus {
            message_id: receipt.message_id,
            user_id: receipt.user_id,
            room_id,
            status: receipt.status,
            read_at: receipt.read_at,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::UserStatus { .. } => "user-status",
            Self::UserStatusResponse { .. } => "user-status-response",
            Self::UserJoined { .. } => "user-joined",
            Self::UserLeft { .. } => "user-left",
            Self::JoinedRoom { .. } => "joined-room",
            Self::RoomUsers { .. } => "room-users",
            Self::UserTyping { .. } => "user-typing",
            Self::NewMessage(_) => "new-message",
            Self::MessageSent { .. } => "message-sent",
            Self::MessageError { .. } => "message-error",
            Self::MessageUpdated(_) => "message-updated",
            Self::MessageDeleted { .. } => "message-deleted",
            Self::RoomCleared { .. } => "room-cleared",
            Self::MessageStatus { .. } => "message-status",
            Self::ReactionAdded { .. } => "reaction-added",
            Self::ReactionRemoved { .. } => "reaction-removed",
            Self::Error { .. } => "error",
        }
    }
}
