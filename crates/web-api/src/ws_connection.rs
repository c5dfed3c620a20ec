use std::sync::Arc;

use application::RealtimeGateway;
use axum::{
    body::Bytes,
    extract::ws::{Message as WsMessage, WebSocket},
};
use domain::{ConnectionId, Identity, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};

/// 单条 WebSocket 连接
///
/// 出站事件经无界通道写入套接字；入站文本帧按到达顺序逐条交给网关处理。
pub struct WebSocketConnection {
    socket: WebSocket,
    gateway: Arc<RealtimeGateway>,
    connection_id: ConnectionId,
    identity: Identity,
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Bytes),
}

impl WebSocketConnection {
    pub fn new(
        socket: WebSocket,
        gateway: Arc<RealtimeGateway>,
        connection_id: ConnectionId,
        identity: Identity,
    ) -> Self {
        Self {
            socket,
            gateway,
            connection_id,
            identity,
        }
    }

    pub async fn run(self) {
        let Self {
            socket,
            gateway,
            connection_id,
            identity,
        } = self;
        let user_id = identity.user_id;
        let (mut sender, mut incoming) = socket.split();

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();
        if let Err(err) = gateway.attach(connection_id, identity, Arc::new(event_tx)).await {
            tracing::warn!(connection_id = %connection_id, error = %err, "连接注册失败");
            gateway.abandon(connection_id).await;
            let _ = sender.send(WsMessage::Close(None)).await;
            return;
        }
        tracing::info!(connection_id = %connection_id, user_id = %user_id, "WebSocket 连接已建立");

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        // 发送任务：统一处理所有对 WebSocket sender 的写操作
        let mut send_task = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    event = event_rx.recv() => match event {
                        Some(event) => match event.to_json() {
                            Ok(json) => WsMessage::Text(json.into()),
                            Err(err) => {
                                tracing::warn!(connection_id = %connection_id, error = %err, "事件序列化失败");
                                continue;
                            }
                        },
                        None => break,
                    },
                    Some(cmd) = cmd_rx.recv() => match cmd {
                        WsCommand::SendPong(data) => WsMessage::Pong(data),
                    },
                };
                if sender.send(frame).await.is_err() {
                    tracing::debug!(connection_id = %connection_id, "套接字写入失败");
                    break;
                }
            }
        });

        // 接收任务：同一连接上的事件串行处理，保持到达顺序。
        // 停止信号只打断等待下一帧，正在执行的处理器总会跑完。
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let recv_gateway = gateway.clone();
        let mut recv_task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = &mut stop_rx => break,
                    message = incoming.next() => match message {
                        Some(Ok(message)) => message,
                        _ => break,
                    },
                };
                match message {
                    WsMessage::Text(text) => {
                        recv_gateway.handle_frame(connection_id, text.as_str()).await;
                    }
                    WsMessage::Ping(data) => {
                        if cmd_tx.send(WsCommand::SendPong(data)).await.is_err() {
                            break;
                        }
                    }
                    WsMessage::Pong(_) => {}
                    WsMessage::Binary(_) => {
                        tracing::debug!(connection_id = %connection_id, "忽略二进制帧");
                    }
                    WsMessage::Close(_) => break,
                }
            }
        });

        // 任意一方结束即视为连接断开；清理前等待接收任务退出
        let send_finished = tokio::select! {
            _ = &mut send_task => true,
            _ = &mut recv_task => false,
        };
        if send_finished {
            let _ = stop_tx.send(());
            if let Err(err) = recv_task.await {
                tracing::warn!(connection_id = %connection_id, error = %err, "接收任务异常退出");
            }
        } else {
            send_task.abort();
        }

        gateway.disconnect(connection_id).await;
        tracing::info!(connection_id = %connection_id, user_id = %user_id, "WebSocket 连接已断开");
    }
}
