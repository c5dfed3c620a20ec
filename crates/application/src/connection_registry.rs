//! 连接注册表：连接 id 到已认证身份的映射

use std::collections::HashMap;
use std::sync::Arc;

use domain::{ConnectionId, Identity, Timestamp, UserId};
use tokio::sync::RwLock;

use crate::auth::{CredentialSources, CredentialVerifier};
use crate::error::ApplicationError;

/// 一条已认证连接的快照。房间成员关系由在线状态跟踪器维护。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub identity: Identity,
    pub connected_at: Timestamp,
}

/// 身份绑定完成的信号，由网关转交给在线状态跟踪器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityAttached {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
}

/// 处理单个事件时使用的连接上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub connection_id: ConnectionId,
    pub identity: Identity,
}

impl ConnectionContext {
    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }
}

pub struct ConnectionRegistry {
    verifier: Arc<dyn CredentialVerifier>,
    connections: RwLock<HashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new(verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self {
            verifier,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// 按优先级取出令牌并校验，失败时返回 `Unauthorized`
    pub async fn authenticate(
        &self,
        connection_id: ConnectionId,
        sources: &CredentialSources,
    ) -> Result<Identity, ApplicationError> {
        let Some(token) = sources.token() else {
            tracing::warn!(connection_id = %connection_id, "握手未携带访问令牌");
            return Err(ApplicationError::unauthorized("missing access token"));
        };

        match self.verifier.verify(token).await {
            Ok(identity) => Ok(identity),
            Err(err) => {
                tracing::warn!(connection_id = %connection_id, error = %err, "访问令牌校验失败");
                Err(ApplicationError::unauthorized(err.to_string()))
            }
        }
    }

    /// 绑定身份，同一连接只能绑定一次
    pub async fn bind(
        &self,
        connection_id: ConnectionId,
        identity: Identity,
        at: Timestamp,
    ) -> Result<IdentityAttached, ApplicationError> {
        let mut connections = self.connections.write().await;
        if connections.contains_key(&connection_id) {
            return Err(ApplicationError::validation("connection already bound"));
        }
        let signal = IdentityAttached {
            connection_id,
            user_id: identity.user_id,
        };
        connections.insert(
            connection_id,
            Connection {
                id: connection_id,
                identity,
                connected_at: at,
            },
        );
        tracing::info!(connection_id = %connection_id, user_id = %signal.user_id, "连接完成身份绑定");
        Ok(signal)
    }

    pub async fn unbind(&self, connection_id: ConnectionId) -> Option<Connection> {
        self.connections.write().await.remove(&connection_id)
    }

    pub async fn context(&self, connection_id: ConnectionId) -> Option<ConnectionContext> {
        self.connections
            .read()
            .await
            .get(&connection_id)
            .map(|connection| ConnectionContext {
                connection_id,
                identity: connection.identity.clone(),
            })
    }

    /// 批量查询身份，未知的连接被跳过
    pub async fn identities(&self, ids: &[ConnectionId]) -> Vec<Identity> {
        let connections = self.connections.read().await;
        ids.iter()
            .filter_map(|id| connections.get(id))
            .map(|connection| connection.identity.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
