// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the broker.

pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use crate::state::Broker;

/// Build the axum `Router` with all broker routes.
pub fn build_router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(broker)
}

async fn health(State(broker): State<Arc<Broker>>) -> Json<serde_json::Value> {
    let st = broker.state.lock().await;
    Json(serde_json::json!({
        "status": "ok",
        "links": st.links.len(),
        "streams": st.streams.len(),
    }))
}
