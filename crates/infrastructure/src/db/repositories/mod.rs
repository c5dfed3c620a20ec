//! Repository实现模块

pub mod chatroom_repository_impl;
pub mod message_repository_impl;
pub mod reaction_repository_impl;
pub mod read_receipt_repository_impl;

pub use chatroom_repository_impl::PgChatRoomRepository;
pub use message_repository_impl::PgMessageRepository;
pub use reaction_repository_impl::PgReactionRepository;
pub use read_receipt_repository_impl::PgReadReceiptRepository;
