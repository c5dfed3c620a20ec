//! Web API 层。
//!
//! WebSocket 传输适配：握手时提取凭证，把文本帧交给应用层的 [`application::RealtimeGateway`]，
//! 再把出站事件写回套接字。

mod error;
mod routes;
mod state;
mod websocket;
mod ws_connection;

pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
