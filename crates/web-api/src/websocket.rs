//! WebSocket 握手
//!
//! 升级之前完成认证，凭证无效时直接返回 401，不建立连接。

use application::{auth::TOKEN_SUBPROTOCOL, CredentialSources};
use axum::{
    extract::{RawQuery, State, WebSocketUpgrade},
    http::{header, HeaderMap, HeaderName},
    response::Response,
};
use domain::ConnectionId;
use tracing::{info, warn};

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

pub(crate) fn credential_sources(
    headers: &HeaderMap,
    query: Option<&str>,
    cookie_name: &str,
) -> CredentialSources {
    CredentialSources::default()
        .with_cookie_header(header_str(headers, header::COOKIE), cookie_name)
        .with_handshake_protocol(header_str(headers, header::SEC_WEBSOCKET_PROTOCOL))
        .with_authorization_header(header_str(headers, header::AUTHORIZATION))
        .with_query(query)
}

pub(crate) async fn websocket_upgrade(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let sources = credential_sources(&headers, query.as_deref(), &state.cookie_name);
    let connection_id = ConnectionId::new();
    let identity = state.gateway.authenticate(connection_id, &sources).await?;
    info!(connection_id = %connection_id, user_id = %identity.user_id, "WebSocket 握手认证通过");

    // 令牌通过子协议传入时必须回显协议名，否则浏览器会拒绝连接
    let ws = if sources.handshake_token.is_some() {
        ws.protocols([TOKEN_SUBPROTOCOL])
    } else {
        ws
    };

    let gateway = state.gateway.clone();
    let abandoned = state.gateway.clone();
    Ok(ws
        .on_failed_upgrade(move |err| {
            warn!(connection_id = %connection_id, error = %err, "WebSocket 升级失败");
            tokio::spawn(async move { abandoned.abandon(connection_id).await });
        })
        .on_upgrade(move |socket| {
            WebSocketConnection::new(socket, gateway, connection_id, identity).run()
        }))
}
