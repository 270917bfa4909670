// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared broker state: the node tree, the stream registry, and the link
//! table, all mutated under one lock.
//!
//! Every handler runs start-to-finish while holding [`Broker::state`], so
//! the engine is a single serial execution context. Outbound frames are
//! enqueued on per-link channels and never block.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::BrokerConfig;
use crate::error::AttachError;
use crate::link::{LinkId, LinkSession, Outbox};
use crate::node::{DownstreamNode, NodeTree};
use crate::proto::{ListUpdate, Method, Payload, Request, Response, StreamState, SubUpdate, Updates};
use crate::stream::{StreamId, StreamRegistry};

/// The process-wide broker object shared with the transport layer.
pub struct Broker {
    pub state: Mutex<BrokerState>,
    pub config: BrokerConfig,
    pub shutdown: CancellationToken,
}

impl Broker {
    pub fn new(config: BrokerConfig, shutdown: CancellationToken) -> Self {
        let state = BrokerState::new(config.downstream_prefix.clone());
        Self { state: Mutex::new(state), config, shutdown }
    }
}

/// What a link declares when it attaches.
#[derive(Debug, Clone)]
pub struct AttachRequest {
    pub name: String,
    pub requester: bool,
    pub responder: bool,
    pub link_data: Option<Payload>,
}

/// All mutable broker state.
pub struct BrokerState {
    pub tree: NodeTree,
    pub streams: StreamRegistry,
    pub links: HashMap<LinkId, LinkSession>,
    /// local path (including the downstream prefix itself) -> list stream.
    pub local_lists: HashMap<String, StreamId>,
    next_link: u64,
}

impl BrokerState {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            tree: NodeTree::new(prefix),
            streams: StreamRegistry::default(),
            links: HashMap::new(),
            local_lists: HashMap::new(),
            next_link: 0,
        }
    }

    /// Attach a link. Responder names either mount a fresh downstream node
    /// or resume one still inside its grace window.
    pub fn attach(
        &mut self,
        req: AttachRequest,
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<LinkId, AttachError> {
        if !req.requester && !req.responder {
            return Err(AttachError::NoCapability);
        }
        if req.name.is_empty() || req.name.contains('/') {
            return Err(AttachError::BadName);
        }
        if req.responder {
            if let Some(ds) = self.tree.downstream.get(&req.name) {
                if ds.link.is_some() {
                    return Err(AttachError::NameTaken);
                }
            }
        }

        self.next_link += 1;
        let id = LinkId::from_raw(self.next_link);
        let mut session = LinkSession::new(id, req.name.clone(), req.requester, Outbox::new(tx));
        if req.responder {
            session.responder = Some(req.name.clone());
        }
        self.links.insert(id, session);

        if req.responder {
            if self.tree.downstream.contains_key(&req.name) {
                info!(link = %id, name = %req.name, "responder resumed within grace");
                crate::grace::resume_downstream(self, &req.name, id, req.link_data);
            } else {
                let path = format!("{}/{}", self.tree.prefix(), req.name);
                let mut ds = DownstreamNode::new(req.name.clone(), path, id);
                ds.link_data = req.link_data;
                self.tree.downstream.insert(req.name.clone(), ds);
                self.announce_downstream(&req.name, true);
                info!(link = %id, name = %req.name, "responder mounted");
            }
        }
        Ok(id)
    }

    // -- Outbound helpers ------------------------------------------------------

    pub fn send_responses(&mut self, link: LinkId, responses: Vec<Response>) {
        if let Some(session) = self.links.get_mut(&link) {
            if !session.outbox.send_responses(responses) {
                debug!(%link, "outbox gone, dropping responses");
            }
        }
    }

    pub fn send_requests(&mut self, link: LinkId, requests: Vec<Request>) {
        if let Some(session) = self.links.get_mut(&link) {
            if !session.outbox.send_requests(requests) {
                debug!(%link, "outbox gone, dropping requests");
            }
        }
    }

    /// The uniform answer for unresolved paths and unsupported methods.
    pub fn send_closed(&mut self, link: LinkId, rid: u32) {
        self.send_responses(link, vec![Response::closed(rid)]);
    }

    /// Send list updates to every client of a stream, each under its own
    /// rid. A responder error rides along verbatim on every copy.
    pub fn fanout_list(
        &mut self,
        id: StreamId,
        updates: &[ListUpdate],
        stream: Option<StreamState>,
        error: Option<Payload>,
    ) {
        let clients: Vec<(LinkId, u32)> = match self.streams.list(id) {
            Some(s) => s.clients.iter().map(|(l, r)| (*l, *r)).collect(),
            None => return,
        };
        for (link, rid) in clients {
            self.send_responses(
                link,
                vec![Response {
                    rid,
                    stream,
                    updates: Some(Updates::List(updates.to_vec())),
                    error: error.clone(),
                }],
            );
        }
    }

    /// Emit one value update to one subscriber. Update responses always use
    /// rid 0; the sid identifies the subscription.
    pub fn emit_sub_update(&mut self, link: LinkId, sid: u32, value: Payload, ts: String) {
        self.send_responses(
            link,
            vec![Response {
                rid: 0,
                stream: None,
                updates: Some(Updates::Sub(vec![SubUpdate::Row(sid, value, ts)])),
                error: None,
            }],
        );
    }

    // -- Stream teardown helpers ----------------------------------------------

    /// Remove one subscriber from a value-subscription stream. The last one
    /// out triggers the upstream unsubscribe and destroys the stream.
    pub fn drop_sub_client(&mut self, id: StreamId, link: LinkId, sid: u32) {
        let Some(s) = self.streams.sub_mut(id) else { return };
        if s.clients.get(&link) != Some(&sid) {
            return;
        }
        s.clients.remove(&link);
        if !s.clients.is_empty() {
            return;
        }
        let downstream = s.downstream.clone();
        let remote_path = s.remote_path.clone();
        let responder_sid = s.responder_sid;
        self.streams.remove(id);
        debug!(%id, path = %remote_path, "value subscription quiescent, destroying");

        let mut unsubscribe = None;
        if let Some(ds) = self.tree.downstream.get_mut(&downstream) {
            ds.sub_paths.remove(&remote_path);
            ds.sub_sids.remove(&responder_sid);
            if let Some(responder) = ds.link {
                let mut req = Request::new(ds.next_rid(), Method::Unsubscribe);
                req.sids = vec![responder_sid];
                unsubscribe = Some((responder, req));
            }
        }
        if let Some((responder, req)) = unsubscribe {
            self.send_requests(responder, vec![req]);
        }
    }

    /// Detach one `(link, sid)` value listener from a local node.
    pub fn detach_local_listener(&mut self, path: &str, link: LinkId, sid: u32) {
        if let Some(node) = self.tree.local_mut(path) {
            node.subs.retain(|entry| *entry != (link, sid));
        }
    }

    /// Release the stream a requester opened under `rid`, closing it when
    /// this was the last participant.
    pub fn release_rid_stream(&mut self, link: LinkId, rid: u32, id: StreamId) {
        if let Some(s) = self.streams.list_mut(id) {
            if s.clients.get(&link) != Some(&rid) {
                return;
            }
            s.clients.remove(&link);
            if !s.clients.is_empty() {
                return;
            }
            let path = s.path.clone();
            let remote = s.remote.clone();
            self.streams.remove(id);
            debug!(%id, %path, "list stream quiescent, destroying");

            match remote {
                Some(r) => {
                    let mut close = None;
                    if let Some(ds) = self.tree.downstream.get_mut(&r.downstream) {
                        ds.list_paths.remove(&r.remote_path);
                        ds.streams_by_rid.remove(&r.responder_rid);
                        if let Some(responder) = ds.link {
                            close = Some((responder, Request::new(r.responder_rid, Method::Close)));
                        }
                    }
                    if let Some((responder, req)) = close {
                        self.send_requests(responder, vec![req]);
                    }
                }
                None => {
                    self.local_lists.remove(&path);
                }
            }
            return;
        }

        let Some(inv) = self.streams.invoke(id) else { return };
        if inv.requester != link || inv.requester_rid != rid {
            return;
        }
        let downstream = inv.downstream.clone();
        let responder_rid = inv.responder_rid;
        self.streams.remove(id);

        let mut close = None;
        if let Some(ds) = self.tree.downstream.get_mut(&downstream) {
            ds.streams_by_rid.remove(&responder_rid);
            if let Some(responder) = ds.link {
                close = Some((responder, Request::new(responder_rid, Method::Close)));
            }
        }
        if let Some((responder, req)) = close {
            self.send_requests(responder, vec![req]);
        }
    }

    // -- Downstream prefix listing --------------------------------------------

    /// Announce a responder appearing or disappearing to any list stream
    /// watching the mount prefix.
    pub fn announce_downstream(&mut self, name: &str, added: bool) {
        let Some(&id) = self.local_lists.get(self.tree.prefix()) else { return };
        let value: Payload = if added {
            Arc::new(json!({ "$is": "node" }))
        } else {
            Arc::new(json!("remove"))
        };
        let update: ListUpdate = (name.to_owned(), value);
        if let Some(s) = self.streams.list_mut(id) {
            s.apply(std::slice::from_ref(&update));
        }
        self.fanout_list(id, std::slice::from_ref(&update), Some(StreamState::Open), None);
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod state_tests;
