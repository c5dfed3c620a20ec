//! 客户端与服务端之间的实时事件协议
//!
//! 每一帧都是 `{"event": "<kebab-case>", "data": {...}}` 形式的 JSON 文本。

pub mod chat_event;

pub use chat_event::*;
