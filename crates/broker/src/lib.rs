// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Treelink: a WebSocket broker for a hierarchical value-publishing
//! protocol. Responder links mount subtrees under a configurable prefix;
//! requester links list, subscribe, and invoke across the unified tree;
//! the broker multiplexes every logical stream over one socket per link.

pub mod config;
pub mod error;
pub mod grace;
pub mod link;
pub mod node;
pub mod proto;
pub mod router;
pub mod state;
pub mod stream;
pub mod test_support;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::state::Broker;
use crate::transport::build_router;

/// Run the broker until shutdown.
pub async fn run(config: BrokerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();
    let broker = Arc::new(Broker::new(config, shutdown.clone()));

    tracing::info!("treelink listening on {addr}");
    let router = build_router(Arc::clone(&broker));
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
