//! 应用层实现。
//!
//! 实时聊天核心：连接注册、房间扇出、在线状态、消息生命周期、
//! 已读回执与表情回应，以及把它们串起来的 [`RealtimeGateway`]。

pub mod auth;
pub mod clock;
pub mod connection_registry;
pub mod error;
pub mod fanout;
pub mod gateway;
#[cfg(test)]
mod gateway_tests;
pub mod presence;
pub mod repository;
pub mod services;

pub use auth::{CredentialSources, CredentialVerifier, DEFAULT_COOKIE_NAME};
pub use clock::{Clock, SystemClock};
pub use connection_registry::{
    Connection, ConnectionContext, ConnectionRegistry, IdentityAttached,
};
pub use error::ApplicationError;
pub use fanout::{EventSink, FanoutScope, FanoutStats, RoomFanoutRouter, SinkClosed};
pub use gateway::{RealtimeGateway, RealtimeGatewayDependencies};
pub use presence::{ConnectionState, PresenceDeparture, PresenceRecord, PresenceTracker};
pub use repository::{
    memory::InMemoryStore, ChatRoomRepository, MessageRepository, ReactionRepository,
    ReadReceiptRepository,
};
pub use services::{
    MessageLifecycleCoordinator, ReactionReconciler, ReactionRemoval, ReactionTransition,
    ReadOutcome, ReadReceiptAggregator,
};
