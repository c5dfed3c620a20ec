//! 在线状态跟踪
//!
//! 每条连接对应一条 [`PresenceRecord`]，用户是否在线、是否仍在某个房间，
//! 都由现存记录推导，不维护独立计数。

use std::collections::{BTreeSet, HashMap, HashSet};

use domain::{ConnectionId, RoomId, UserId};
use tokio::sync::RwLock;

use crate::connection_registry::IdentityAttached;
use crate::error::ApplicationError;

/// 连接生命周期状态。`Disconnected` 是终态，连接 id 不会复用。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    InRoom(usize),
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub active_rooms: HashSet<RoomId>,
}

/// 移除连接后的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceDeparture {
    pub user_id: UserId,
    /// 该连接离开时所在的全部房间
    pub freed_rooms: BTreeSet<RoomId>,
    /// 用户不再通过任何连接占据的房间
    pub vacated_rooms: BTreeSet<RoomId>,
    /// 用户是否还有其他存活连接
    pub user_online: bool,
}

#[derive(Default)]
struct PresenceState {
    pending: HashSet<ConnectionId>,
    records: HashMap<ConnectionId, PresenceRecord>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

impl PresenceState {
    fn user_in_room(&self, user_id: UserId, room_id: RoomId) -> bool {
        self.by_user
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.records.get(id))
            .any(|record| record.active_rooms.contains(&room_id))
    }
}

#[derive(Default)]
pub struct PresenceTracker {
    state: RwLock<PresenceState>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 握手开始，连接进入 `Connecting`
    pub async fn begin(&self, connection_id: ConnectionId) {
        self.state.write().await.pending.insert(connection_id);
    }

    /// 握手失败或被放弃
    pub async fn abandon(&self, connection_id: ConnectionId) {
        self.state.write().await.pending.remove(&connection_id);
    }

    /// 处理身份绑定信号，返回是否是该用户的第一条存活连接
    pub async fn add_connection(&self, signal: IdentityAttached) -> Result<bool, ApplicationError> {
        let mut state = self.state.write().await;
        if state.records.contains_key(&signal.connection_id) {
            return Err(ApplicationError::validation("connection already tracked"));
        }
        state.pending.remove(&signal.connection_id);
        state.records.insert(
            signal.connection_id,
            PresenceRecord {
                user_id: signal.user_id,
                connection_id: signal.connection_id,
                active_rooms: HashSet::new(),
            },
        );
        let connections = state.by_user.entry(signal.user_id).or_default();
        connections.insert(signal.connection_id);
        let first = connections.len() == 1;

        tracing::info!(
            connection_id = %signal.connection_id,
            user_id = %signal.user_id,
            first_connection = first,
            "用户连接上线"
        );
        Ok(first)
    }

    /// 移除连接；未知连接返回 `None`
    pub async fn remove_connection(&self, connection_id: ConnectionId) -> Option<PresenceDeparture> {
        let mut state = self.state.write().await;
        state.pending.remove(&connection_id);
        let record = state.records.remove(&connection_id)?;

        let user_online = match state.by_user.get_mut(&record.user_id) {
            Some(connections) => {
                connections.remove(&connection_id);
                if connections.is_empty() {
                    state.by_user.remove(&record.user_id);
                    false
                } else {
                    true
                }
            }
            None => false,
        };

        let freed_rooms: BTreeSet<RoomId> = record.active_rooms.iter().copied().collect();
        let vacated_rooms = freed_rooms
            .iter()
            .copied()
            .filter(|room_id| !state.user_in_room(record.user_id, *room_id))
            .collect();

        tracing::info!(
            connection_id = %connection_id,
            user_id = %record.user_id,
            user_online,
            "连接下线"
        );

        Some(PresenceDeparture {
            user_id: record.user_id,
            freed_rooms,
            vacated_rooms,
            user_online,
        })
    }

    pub async fn join_room(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
    ) -> Result<bool, ApplicationError> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(&connection_id)
            .ok_or_else(|| ApplicationError::unauthorized("connection is not authenticated"))?;
        Ok(record.active_rooms.insert(room_id))
    }

    pub async fn leave_room(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
    ) -> Result<bool, ApplicationError> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(&connection_id)
            .ok_or_else(|| ApplicationError::unauthorized("connection is not authenticated"))?;
        Ok(record.active_rooms.remove(&room_id))
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.state
            .read()
            .await
            .by_user
            .get(&user_id)
            .is_some_and(|connections| !connections.is_empty())
    }

    pub async fn is_in_room(&self, user_id: UserId, room_id: RoomId) -> bool {
        self.state.read().await.user_in_room(user_id, room_id)
    }

    pub async fn state(&self, connection_id: ConnectionId) -> ConnectionState {
        let state = self.state.read().await;
        match state.records.get(&connection_id) {
            Some(record) if record.active_rooms.is_empty() => ConnectionState::Authenticated,
            Some(record) => ConnectionState::InRoom(record.active_rooms.len()),
            None if state.pending.contains(&connection_id) => ConnectionState::Connecting,
            None => ConnectionState::Disconnected,
        }
    }
}
