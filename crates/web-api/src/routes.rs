use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::{state::AppState, websocket::websocket_upgrade};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthReport {
    status: &'static str,
    connections: usize,
    delivered_events: u64,
    undeliverable_events: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let stats = state.gateway.router().stats().await;
    Json(HealthReport {
        status: "ok",
        connections: state.gateway.registry().len().await,
        delivered_events: stats.delivered,
        undeliverable_events: stats.undeliverable,
    })
}
