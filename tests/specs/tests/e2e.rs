// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end broker tests over real WebSocket connections.

use serde_json::json;

use treelink_specs::{http_get, LinkClient, TestBroker};

#[tokio::test]
async fn health_reports_link_and_stream_counts() -> anyhow::Result<()> {
    let broker = TestBroker::start().await?;

    let body = http_get(broker.addr, "/api/v1/health").await?;
    let health: serde_json::Value = serde_json::from_str(&body)?;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["links"], 0);

    let _link = LinkClient::connect(&broker.ws_url("name=r&requester=true")).await?;
    broker.wait_for_links(1).await?;
    Ok(())
}

#[tokio::test]
async fn shared_subscription_over_the_wire() -> anyhow::Result<()> {
    let broker = TestBroker::start().await?;

    let mut responder =
        LinkClient::connect(&broker.ws_url("name=widget&responder=true")).await?;
    let mut r1 = LinkClient::connect(&broker.ws_url("name=r1&requester=true")).await?;
    let mut r2 = LinkClient::connect(&broker.ws_url("name=r2&requester=true")).await?;
    broker.wait_for_links(3).await?;

    r1.request(json!({"rid": 1, "method": "subscribe",
        "paths": [{"path": "/down/widget/x", "sid": 1}]}))
        .await?;
    let upstream = responder.recv_requests().await?;
    assert_eq!(upstream[0]["method"], "subscribe");
    assert_eq!(upstream[0]["paths"][0]["path"], "/x");
    let k = upstream[0]["paths"][0]["sid"].clone();

    r2.request(json!({"rid": 2, "method": "subscribe",
        "paths": [{"path": "/down/widget/x", "sid": 7}]}))
        .await?;

    responder.respond(json!({"rid": 0, "updates": [[k, 42, "T"]]})).await?;

    let u1 = r1.recv_response_where(|r| !r["updates"].is_null()).await?;
    assert_eq!(u1["updates"], json!([[1, 42, "T"]]));
    let u2 = r2.recv_response_where(|r| !r["updates"].is_null()).await?;
    assert_eq!(u2["updates"], json!([[7, 42, "T"]]));
    Ok(())
}

#[tokio::test]
async fn list_late_joiner_over_the_wire() -> anyhow::Result<()> {
    let broker = TestBroker::start().await?;

    let mut responder =
        LinkClient::connect(&broker.ws_url("name=widget&responder=true")).await?;
    let mut r1 = LinkClient::connect(&broker.ws_url("name=r1&requester=true")).await?;
    let mut r2 = LinkClient::connect(&broker.ws_url("name=r2&requester=true")).await?;
    broker.wait_for_links(3).await?;

    r1.request(json!({"rid": 5, "method": "list", "path": "/down/widget/y"})).await?;
    let upstream = responder.recv_requests().await?;
    assert_eq!(upstream[0]["method"], "list");
    responder
        .respond(json!({"rid": upstream[0]["rid"], "stream": "open",
            "updates": [["$is", "node"], ["value", 10]]}))
        .await?;

    let expected = json!([["$base", "/down/widget"], ["$is", "node"], ["value", 10]]);
    let first = r1.recv_response_where(|r| r["rid"] == 5).await?;
    assert_eq!(first["updates"], expected);

    r2.request(json!({"rid": 8, "method": "list", "path": "/down/widget/y"})).await?;
    let second = r2.recv_response_where(|r| r["rid"] == 8).await?;
    assert_eq!(second["updates"], expected);
    Ok(())
}

#[tokio::test]
async fn responder_disconnect_broadcasts_marker() -> anyhow::Result<()> {
    let broker = TestBroker::start().await?;

    let mut responder =
        LinkClient::connect(&broker.ws_url("name=widget&responder=true")).await?;
    let mut r1 = LinkClient::connect(&broker.ws_url("name=r1&requester=true")).await?;
    broker.wait_for_links(2).await?;

    r1.request(json!({"rid": 5, "method": "list", "path": "/down/widget/y"})).await?;
    let upstream = responder.recv_requests().await?;
    responder
        .respond(json!({"rid": upstream[0]["rid"], "stream": "open",
            "updates": [["$is", "node"]]}))
        .await?;
    r1.recv_response_where(|r| r["rid"] == 5).await?;

    responder.close().await?;

    let marker = r1.recv_response_where(|r| r["rid"] == 5).await?;
    let updates = marker["updates"].as_array().cloned().unwrap_or_default();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0][0], "$disconnectedTs");
    Ok(())
}

#[tokio::test]
async fn auth_token_gates_attachment() -> anyhow::Result<()> {
    let broker = TestBroker::start_with_token(Some("sesame".to_owned())).await?;

    let denied =
        LinkClient::connect(&broker.ws_url("name=r&requester=true")).await;
    assert!(denied.is_err());

    let granted =
        LinkClient::connect(&broker.ws_url("name=r&requester=true&token=sesame")).await;
    assert!(granted.is_ok());
    Ok(())
}

#[tokio::test]
async fn duplicate_responder_name_is_rejected() -> anyhow::Result<()> {
    let broker = TestBroker::start().await?;

    let _first = LinkClient::connect(&broker.ws_url("name=widget&responder=true")).await?;
    broker.wait_for_links(1).await?;

    let mut second =
        LinkClient::connect(&broker.ws_url("name=widget&responder=true")).await?;
    // The upgrade succeeds; the broker then closes with a policy code.
    let err = second.recv_envelope().await;
    assert!(err.is_err());
    Ok(())
}
