use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    InMemoryStore, MessageRepository, RealtimeGateway, RealtimeGatewayDependencies, SystemClock,
};
use async_trait::async_trait;
use chrono::Utc;
use domain::{ChatRoom, Message, MessageId, NewMessage, RepositoryError, RoomId, UserId};
use futures_util::{SinkExt, StreamExt};
use infrastructure::JwtCredentialVerifier;
use serde_json::Value;
use tokio::{
    net::TcpListener,
    net::TcpStream,
    sync::oneshot,
    time::{sleep, timeout},
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState};

pub const SECRET: &str = "integration-test-secret-at-least-32-chars";

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<InMemoryStore>,
    pub verifier: JwtCredentialVerifier,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// 启动服务器，房间 1 归用户 1 所有
    pub async fn start() -> Self {
        Self::start_with(|store| store as Arc<dyn MessageRepository>).await
    }

    /// 允许替换消息仓储，例如包一层延迟
    pub async fn start_with(
        messages: impl FnOnce(Arc<InMemoryStore>) -> Arc<dyn MessageRepository>,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_room(ChatRoom {
                id: RoomId(1),
                name: "general".into(),
                owner_id: UserId(1),
                created_at: Utc::now(),
            })
            .await;

        let verifier = JwtCredentialVerifier::new(SECRET);
        let gateway = RealtimeGateway::new(RealtimeGatewayDependencies {
            verifier: Arc::new(verifier.clone()),
            message_repository: messages(store.clone()),
            reaction_repository: store.clone(),
            receipt_repository: store.clone(),
            room_repository: store.clone(),
            clock: Arc::new(SystemClock),
        });
        let app = router(AppState::new(Arc::new(gateway)));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            store,
            verifier,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn token(&self, user_id: i64, email: &str) -> String {
        self.verifier
            .issue(UserId(user_id), email, chrono::Duration::minutes(10))
            .expect("issue token")
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={}", self.addr, token)
    }

    pub async fn connect(&self, user_id: i64, email: &str) -> Socket {
        let (socket, _) = connect_async(self.ws_url(&self.token(user_id, email)))
            .await
            .expect("websocket connect");
        socket
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub async fn send(socket: &mut Socket, event: &str, data: Value) {
    let frame = serde_json::json!({ "event": event, "data": data }).to_string();
    socket
        .send(TungsteniteMessage::Text(frame.into()))
        .await
        .expect("send frame");
}

/// 读取帧直到出现指定事件，跳过其他事件
pub async fn expect_event(socket: &mut Socket, event: &str) -> Value {
    let wait = async {
        loop {
            let message = socket
                .next()
                .await
                .expect("socket closed")
                .expect("socket error");
            if let TungsteniteMessage::Text(text) = message {
                let frame: Value = serde_json::from_str(text.as_str()).expect("json frame");
                if frame["event"] == event {
                    return frame["data"].clone();
                }
            }
        }
    };
    timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {event}"))
}

/// 写入消息前先等待一段时间的消息仓储
pub struct SlowMessages {
    pub store: Arc<InMemoryStore>,
    pub delay: Duration,
}

#[async_trait]
impl MessageRepository for SlowMessages {
    async fn create(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        sleep(self.delay).await;
        self.store.create(message).await
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        MessageRepository::find_by_id(self.store.as_ref(), id).await
    }

    async fn update(&self, message: Message) -> Result<Message, RepositoryError> {
        self.store.update(message).await
    }

    async fn delete(&self, id: MessageId) -> Result<(), RepositoryError> {
        self.store.delete(id).await
    }

    async fn delete_by_room(&self, room_id: RoomId) -> Result<u64, RepositoryError> {
        self.store.delete_by_room(room_id).await
    }

    async fn unread_for_reader(
        &self,
        room_id: RoomId,
        reader: UserId,
    ) -> Result<Vec<Message>, RepositoryError> {
        self.store.unread_for_reader(room_id, reader).await
    }

    async fn count_unread(&self, room_id: RoomId, reader: UserId) -> Result<u64, RepositoryError> {
        self.store.count_unread(room_id, reader).await
    }
}

/// 等待指定用户的 `user-status`，跳过其他用户的状态变化
pub async fn expect_status(socket: &mut Socket, user_id: i64, status: &str) -> Value {
    loop {
        let data = expect_event(socket, "user-status").await;
        if data["userId"] == user_id && data["status"] == status {
            return data;
        }
    }
}
