//! 房间扇出路由：按范围把一个事件投递给多个连接

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use domain::{ConnectionId, RoomId, ServerEvent};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("event sink closed")]
pub struct SinkClosed;

/// 单个连接的出站通道，同一连接上的投递保持先进先出
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: ServerEvent) -> Result<(), SinkClosed>;
}

impl EventSink for mpsc::UnboundedSender<ServerEvent> {
    fn deliver(&self, event: ServerEvent) -> Result<(), SinkClosed> {
        self.send(event).map_err(|_| SinkClosed)
    }
}

/// 投递范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutScope {
    /// 房间内除发送者以外的订阅者
    ExceptSender {
        sender: ConnectionId,
        room_id: RoomId,
    },
    /// 房间内全部订阅者
    Room(RoomId),
    /// 仅发送者
    Sender(ConnectionId),
    /// 所有已注册连接
    Broadcast,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutStats {
    pub delivered: u64,
    pub undeliverable: u64,
}

#[derive(Default)]
struct RouterState {
    sinks: HashMap<ConnectionId, Arc<dyn EventSink>>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
    stats: FanoutStats,
}

impl RouterState {
    fn targets(&self, scope: FanoutScope) -> Vec<ConnectionId> {
        match scope {
            FanoutScope::ExceptSender { sender, room_id } => self
                .rooms
                .get(&room_id)
                .map(|members| members.iter().copied().filter(|id| *id != sender).collect())
                .unwrap_or_default(),
            FanoutScope::Room(room_id) => self
                .rooms
                .get(&room_id)
                .map(|members| members.iter().copied().collect())
                .unwrap_or_default(),
            FanoutScope::Sender(connection_id) => vec![connection_id],
            FanoutScope::Broadcast => self.sinks.keys().copied().collect(),
        }
    }
}

#[derive(Default)]
pub struct RoomFanoutRouter {
    state: RwLock<RouterState>,
}

impl RoomFanoutRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册连接的出站通道
    pub async fn attach(&self, connection_id: ConnectionId, sink: Arc<dyn EventSink>) {
        self.state.write().await.sinks.insert(connection_id, sink);
    }

    /// 注销连接并退订其所在的全部房间，返回这些房间
    pub async fn detach(&self, connection_id: ConnectionId) -> Vec<RoomId> {
        let mut state = self.state.write().await;
        state.sinks.remove(&connection_id);
        let mut left = Vec::new();
        state.rooms.retain(|room_id, members| {
            if members.remove(&connection_id) {
                left.push(*room_id);
            }
            !members.is_empty()
        });
        left
    }

    /// 订阅房间，返回是否为新订阅
    pub async fn subscribe(&self, connection_id: ConnectionId, room_id: RoomId) -> bool {
        self.state
            .write()
            .await
            .rooms
            .entry(room_id)
            .or_default()
            .insert(connection_id)
    }

    pub async fn unsubscribe(&self, connection_id: ConnectionId, room_id: RoomId) -> bool {
        let mut state = self.state.write().await;
        let Some(members) = state.rooms.get_mut(&room_id) else {
            return false;
        };
        let removed = members.remove(&connection_id);
        if members.is_empty() {
            state.rooms.remove(&room_id);
        }
        removed
    }

    pub async fn subscribers(&self, room_id: RoomId) -> Vec<ConnectionId> {
        self.state.read().await.targets(FanoutScope::Room(room_id))
    }

    /// 投递事件，返回成功投递的连接数。空房间是无操作，已关闭的通道只记录告警。
    pub async fn publish(&self, scope: FanoutScope, event: ServerEvent) -> usize {
        let mut state = self.state.write().await;
        let targets = state.targets(scope);
        let mut delivered = 0;
        let mut undeliverable = 0;

        for connection_id in targets {
            let Some(sink) = state.sinks.get(&connection_id) else {
                undeliverable += 1;
                warn!(connection_id = %connection_id, event = event.name(), "连接没有出站通道");
                continue;
            };
            match sink.deliver(event.clone()) {
                Ok(()) => delivered += 1,
                Err(SinkClosed) => {
                    undeliverable += 1;
                    warn!(connection_id = %connection_id, event = event.name(), "出站通道已关闭");
                }
            }
        }

        state.stats.delivered += delivered as u64;
        state.stats.undeliverable += undeliverable;
        debug!(?scope, event = event.name(), delivered, "事件已扇出");
        delivered
    }

    /// 先投递给房间内其他人，再投递给发送者，发送者只会收到一次
    pub async fn publish_to_room_and_sender(
        &self,
        sender: ConnectionId,
        room_id: RoomId,
        event: ServerEvent,
    ) -> usize {
        self.publish(FanoutScope::ExceptSender { sender, room_id }, event.clone())
            .await
            + self.publish(FanoutScope::Sender(sender), event).await
    }

    pub async fn stats(&self) -> FanoutStats {
        self.state.read().await.stats
    }
}
