// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end broker tests.
//!
//! Starts an in-process broker on a free port and drives it with real
//! tungstenite link clients over the wire.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use treelink::config::BrokerConfig;
use treelink::state::Broker;

/// Per-message receive timeout.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// An in-process broker, shut down on drop.
pub struct TestBroker {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
}

impl TestBroker {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with_token(None).await
    }

    pub async fn start_with_token(auth_token: Option<String>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let config = BrokerConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            auth_token,
            downstream_prefix: "/down".to_owned(),
            grace_ms: 30_000,
        };
        let broker = Arc::new(Broker::new(config, shutdown.clone()));
        let router = treelink::transport::build_router(broker);

        let serve_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(serve_shutdown.cancelled_owned())
                .await;
        });

        Ok(Self { addr, shutdown })
    }

    pub fn ws_url(&self, query: &str) -> String {
        format!("ws://{}/ws?{query}", self.addr)
    }

    /// Poll the health endpoint until the broker reports `links` attached
    /// links. Attachment happens after the WS handshake returns, so tests
    /// synchronize on this before issuing requests.
    pub async fn wait_for_links(&self, links: u64) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            if tokio::time::Instant::now() > deadline {
                bail!("broker never reached {links} links");
            }
            let body = http_get(self.addr, "/api/v1/health").await?;
            let health: serde_json::Value = serde_json::from_str(&body)?;
            if health["links"].as_u64() == Some(links) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Make a raw HTTP/1.1 GET request, returning the response body.
pub async fn http_get(addr: SocketAddr, path: &str) -> anyhow::Result<String> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = TcpStream::connect(addr).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8(buf)?;
    let body = response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("").to_owned();
    Ok(body)
}

/// One connected link client.
pub struct LinkClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl LinkClient {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        Ok(Self { ws })
    }

    pub async fn send(&mut self, env: serde_json::Value) -> anyhow::Result<()> {
        self.ws.send(Message::Text(env.to_string().into())).await?;
        Ok(())
    }

    pub async fn request(&mut self, req: serde_json::Value) -> anyhow::Result<()> {
        self.send(serde_json::json!({ "requests": [req] })).await
    }

    pub async fn respond(&mut self, resp: serde_json::Value) -> anyhow::Result<()> {
        self.send(serde_json::json!({ "responses": [resp] })).await
    }

    pub async fn close(mut self) -> anyhow::Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }

    /// Receive the next envelope, skipping non-text frames.
    pub async fn recv_envelope(&mut self) -> anyhow::Result<serde_json::Value> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or_else(|| anyhow!("timed out waiting for envelope"))?;
            let msg = tokio::time::timeout(remaining, self.ws.next())
                .await
                .map_err(|_| anyhow!("timed out waiting for envelope"))?
                .ok_or_else(|| anyhow!("connection closed"))??;
            if let Message::Text(text) = msg {
                return Ok(serde_json::from_str(&text)?);
            }
        }
    }

    /// Receive envelopes until one carries requests; return them.
    pub async fn recv_requests(&mut self) -> anyhow::Result<Vec<serde_json::Value>> {
        loop {
            let env = self.recv_envelope().await?;
            if let Some(reqs) = env["requests"].as_array() {
                if !reqs.is_empty() {
                    return Ok(reqs.clone());
                }
            }
        }
    }

    /// Receive envelopes until one carries responses matching `pred`.
    pub async fn recv_response_where(
        &mut self,
        pred: impl Fn(&serde_json::Value) -> bool,
    ) -> anyhow::Result<serde_json::Value> {
        loop {
            let env = self.recv_envelope().await?;
            if let Some(resps) = env["responses"].as_array() {
                if let Some(found) = resps.iter().find(|r| pred(r)) {
                    return Ok(found.clone());
                }
            }
        }
    }
}
