//! 主应用程序入口
//!
//! 加载配置，装配实时网关并启动 Axum WebSocket 服务。

use std::sync::Arc;

use application::{
    ChatRoomRepository, InMemoryStore, MessageRepository, ReactionRepository,
    ReadReceiptRepository, RealtimeGateway, RealtimeGatewayDependencies, SystemClock,
};
use config::AppConfig;
use infrastructure::{create_pg_pool, JwtCredentialVerifier, PgStorage, MIGRATOR};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

struct Repositories {
    messages: Arc<dyn MessageRepository>,
    reactions: Arc<dyn ReactionRepository>,
    receipts: Arc<dyn ReadReceiptRepository>,
    rooms: Arc<dyn ChatRoomRepository>,
}

async fn build_repositories(config: &AppConfig) -> anyhow::Result<Repositories> {
    let Some(database_url) = config.database.url.as_deref() else {
        tracing::warn!("未配置数据库，使用内存存储（重启后数据丢失）");
        let store = Arc::new(InMemoryStore::new());
        return Ok(Repositories {
            messages: store.clone(),
            reactions: store.clone(),
            receipts: store.clone(),
            rooms: store,
        });
    };

    let pool = create_pg_pool(database_url, config.database.max_connections).await?;
    MIGRATOR.run(&pool).await?;
    tracing::info!("数据库迁移完成");

    let storage = PgStorage::new(pool);
    Ok(Repositories {
        messages: storage.message_repository,
        reactions: storage.reaction_repository,
        receipts: storage.receipt_repository,
        rooms: storage.room_repository,
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听关闭信号");
        return;
    }
    tracing::info!("收到关闭信号，停止接受新连接");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load()?;
    tracing::info!(config = %config.sanitize(), "配置加载完成");

    let repositories = build_repositories(&config).await?;
    let gateway = RealtimeGateway::new(RealtimeGatewayDependencies {
        verifier: Arc::new(JwtCredentialVerifier::from_config(&config.jwt)),
        message_repository: repositories.messages,
        reaction_repository: repositories.reactions,
        receipt_repository: repositories.receipts,
        room_repository: repositories.rooms,
        clock: Arc::new(SystemClock),
    });

    let state = AppState::new(Arc::new(gateway)).with_cookie_name(config.jwt.cookie_name.as_str());
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;

    tracing::info!("聊天室服务器启动在 ws://{}/ws", config.bind_address());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
