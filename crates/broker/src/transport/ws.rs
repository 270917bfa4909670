// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Link attachment over `GET /ws`.
//!
//! The connection task owns both socket halves: it drains the link's
//! outbox into the socket and feeds inbound text frames to the router
//! under the state lock. When either side ends, disconnect handling runs.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::AttachError;
use crate::proto::Payload;
use crate::state::{AttachRequest, Broker};
use crate::{grace, router};

/// Query parameters for link attachment.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Auth token; required when the broker was started with one.
    pub token: Option<String>,
    /// Link name. Responder names become mount points.
    pub name: String,
    /// Whether this link issues requests.
    #[serde(default)]
    pub requester: bool,
    /// Whether this link services a subtree.
    #[serde(default)]
    pub responder: bool,
    /// Optional JSON metadata, surfaced as `$linkData` in root lists.
    pub link_data: Option<String>,
}

/// `GET /ws`: WebSocket upgrade for link attachment.
pub async fn ws_handler(
    State(broker): State<Arc<Broker>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if let Some(expected) = broker.config.auth_token.as_deref() {
        if query.token.as_deref() != Some(expected) {
            return axum::http::Response::builder()
                .status(AttachError::Unauthorized.http_status())
                .body(axum::body::Body::from("unauthorized"))
                .unwrap_or_default()
                .into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_link(broker, query, socket)).into_response()
}

async fn handle_link(broker: Arc<Broker>, query: WsQuery, socket: WebSocket) {
    let link_data: Option<Payload> =
        query.link_data.as_deref().and_then(|raw| serde_json::from_str(raw).ok()).map(Arc::new);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let attach = {
        let mut st = broker.state.lock().await;
        st.attach(
            AttachRequest {
                name: query.name.clone(),
                requester: query.requester,
                responder: query.responder,
                link_data,
            },
            tx,
        )
    };

    let (mut ws_tx, mut ws_rx) = socket.split();
    let link = match attach {
        Ok(link) => link,
        Err(e) => {
            warn!(name = %query.name, code = %e, "attach rejected");
            let frame = CloseFrame { code: close_code::POLICY, reason: e.as_str().into() };
            let _ = ws_tx.send(Message::Close(Some(frame))).await;
            return;
        }
    };
    info!(
        %link,
        name = %query.name,
        requester = query.requester,
        responder = query.responder,
        "link attached"
    );

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let mut st = broker.state.lock().await;
                        router::handle_frame(&mut st, link, &text);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(%link, err = %e, "socket error");
                        break;
                    }
                    _ => {}
                }
            }
            _ = broker.shutdown.cancelled() => break,
        }
    }

    grace::link_lost_and_schedule(&broker, link).await;
    info!(%link, "connection closed");
}
