//! 实时聊天室核心领域模型
//!
//! 包含标识符、消息、表情回应、已读回执等实体，以及客户端与服务端之间的事件协议。

pub mod chat_room;
pub mod errors;
pub mod events;
pub mod message;
pub mod reaction;
pub mod read_receipt;
pub mod user;
pub mod value_objects;

pub use chat_room::ChatRoom;
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use events::*;
pub use message::{Message, NewMessage};
pub use reaction::Reaction;
pub use read_receipt::{ReadReceipt, ReceiptStatus};
pub use user::Identity;
pub use value_objects::*;
