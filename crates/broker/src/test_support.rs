// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory test rig: a broker state plus the receive side of every
//! link's outbox, driven directly through the router with no sockets.

use std::collections::HashMap;

use anyhow::anyhow;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::link::LinkId;
use crate::router::handle_frame;
use crate::state::{AttachRequest, BrokerState};

pub struct Rig {
    pub st: BrokerState,
    pub rxs: HashMap<LinkId, mpsc::UnboundedReceiver<String>>,
}

impl Rig {
    pub fn new() -> Self {
        Self { st: BrokerState::new("/down"), rxs: HashMap::new() }
    }

    pub fn attach(
        &mut self,
        name: &str,
        requester: bool,
        responder: bool,
    ) -> anyhow::Result<LinkId> {
        self.attach_with_data(name, requester, responder, None)
    }

    pub fn attach_with_data(
        &mut self,
        name: &str,
        requester: bool,
        responder: bool,
        link_data: Option<Value>,
    ) -> anyhow::Result<LinkId> {
        let (tx, rx) = mpsc::unbounded_channel();
        let req = AttachRequest {
            name: name.to_owned(),
            requester,
            responder,
            link_data: link_data.map(std::sync::Arc::new),
        };
        let id = self.st.attach(req, tx).map_err(|e| anyhow!("attach {name}: {e}"))?;
        self.rxs.insert(id, rx);
        Ok(id)
    }

    pub fn send(&mut self, link: LinkId, env: Value) {
        handle_frame(&mut self.st, link, &env.to_string());
    }

    pub fn request(&mut self, link: LinkId, req: Value) {
        self.send(link, json!({ "requests": [req] }));
    }

    pub fn respond(&mut self, link: LinkId, resp: Value) {
        self.send(link, json!({ "responses": [resp] }));
    }

    /// Drain and parse every envelope queued for a link.
    pub fn drain(&mut self, link: LinkId) -> Vec<Value> {
        let Some(rx) = self.rxs.get_mut(&link) else { return Vec::new() };
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            if let Ok(v) = serde_json::from_str(&text) {
                out.push(v);
            }
        }
        out
    }

    /// All response objects queued for a link.
    pub fn responses(&mut self, link: LinkId) -> Vec<Value> {
        self.drain(link)
            .iter()
            .flat_map(|env| env["responses"].as_array().cloned().unwrap_or_default())
            .collect()
    }

    /// All request objects queued for a link.
    pub fn requests(&mut self, link: LinkId) -> Vec<Value> {
        self.drain(link)
            .iter()
            .flat_map(|env| env["requests"].as_array().cloned().unwrap_or_default())
            .collect()
    }
}

impl Default for Rig {
    fn default() -> Self {
        Self::new()
    }
}

/// Responses that are not bare closed acks (i.e. carry updates).
pub fn with_updates(responses: Vec<Value>) -> Vec<Value> {
    responses.into_iter().filter(|r| !r["updates"].is_null()).collect()
}
