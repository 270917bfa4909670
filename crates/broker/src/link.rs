// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-link session state and the outbound frame queue.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc;
use tracing::warn;

use crate::proto::{Envelope, Request, Response};
use crate::stream::StreamId;

/// Identity of an attached link, minted by the broker state table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link{}", self.0)
    }
}

/// Serializes envelopes onto the per-link channel drained by the socket
/// writer task. Stamps `msg` with a per-link sequence and `ack` with the
/// last sequence number the peer sent us.
#[derive(Debug)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<String>,
    msg_seq: u32,
    pub last_peer_msg: Option<u32>,
}

impl Outbox {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx, msg_seq: 0, last_peer_msg: None }
    }

    /// Enqueue one envelope. Returns false when the writer task is gone;
    /// the connection task will run disconnect handling on its own exit.
    pub fn send(&mut self, mut env: Envelope) -> bool {
        self.msg_seq += 1;
        env.msg = Some(self.msg_seq);
        env.ack = self.last_peer_msg;
        match serde_json::to_string(&env) {
            Ok(text) => self.tx.send(text).is_ok(),
            Err(e) => {
                warn!(err = %e, "failed to encode outbound envelope");
                false
            }
        }
    }

    pub fn send_responses(&mut self, responses: Vec<Response>) -> bool {
        self.send(Envelope::with_responses(responses))
    }

    pub fn send_requests(&mut self, requests: Vec<Request>) -> bool {
        self.send(Envelope::with_requests(requests))
    }
}

/// State for one attached link.
#[derive(Debug)]
pub struct LinkSession {
    pub id: LinkId,
    pub name: String,
    /// Whether this link may issue requests.
    pub requester: bool,
    /// The downstream node this link responds for, if responder-capable.
    pub responder: Option<String>,
    /// local sid -> remote value-subscription stream.
    pub sub_sids: HashMap<u32, StreamId>,
    /// local sid -> local node path carrying this link's value listener.
    pub local_subs: HashMap<u32, String>,
    /// local rid -> list or invocation stream this link opened.
    pub req_streams: HashMap<u32, StreamId>,
    pub outbox: Outbox,
}

impl LinkSession {
    pub fn new(id: LinkId, name: impl Into<String>, requester: bool, outbox: Outbox) -> Self {
        Self {
            id,
            name: name.into(),
            requester,
            responder: None,
            sub_sids: HashMap::new(),
            local_subs: HashMap::new(),
            req_streams: HashMap::new(),
            outbox,
        }
    }
}
