// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ingestion of responses arriving from responder links.
//!
//! `rid:0` responses carry value updates tagged with responder sids; every
//! other rid is matched against the downstream's `streams_by_rid` table.

use std::sync::Arc;

use tracing::debug;

use crate::link::LinkId;
use crate::proto::{ListUpdate, Payload, Response, StreamState, SubUpdate, Updates};
use crate::state::BrokerState;
use crate::stream::{Stream, StreamId};

pub fn handle_response(st: &mut BrokerState, link: LinkId, resp: Response) {
    let Some(name) = st.links.get(&link).and_then(|l| l.responder.clone()) else {
        debug!(%link, "dropping response from non-responder link");
        return;
    };

    if resp.rid == 0 {
        ingest_sub_updates(st, &name, resp);
        return;
    }

    let matched = st
        .tree
        .downstream
        .get(&name)
        .and_then(|ds| ds.streams_by_rid.get(&resp.rid))
        .copied();
    let Some(id) = matched else {
        debug!(%link, rid = resp.rid, "dropping response for unknown rid");
        return;
    };

    match st.streams.get(id) {
        Some(Stream::List(_)) => ingest_list_response(st, &name, id, resp),
        Some(Stream::Invoke(_)) => forward_invoke_response(st, id, resp),
        _ => {}
    }
}

fn ingest_sub_updates(st: &mut BrokerState, name: &str, resp: Response) {
    let error = resp.error;
    let Some(updates) = resp.updates else {
        // An error frame without updates names no sid; surface it to every
        // subscriber of this responder.
        if let Some(error) = error {
            broadcast_sub_error(st, name, error);
        }
        return;
    };
    for update in updates.into_sub() {
        let responder_sid = update.sid();
        let matched = st
            .tree
            .downstream
            .get(name)
            .and_then(|ds| ds.sub_sids.get(&responder_sid))
            .copied();
        let Some(id) = matched else {
            debug!(downstream = %name, responder_sid, "dropping update for unknown sid");
            continue;
        };

        let value = Arc::clone(update.value());
        let ts = update.ts();
        let clients: Vec<(LinkId, u32)> = match st.streams.sub_mut(id) {
            Some(stream) => {
                stream.last_value = Some((Arc::clone(&value), ts.clone()));
                stream.clients.iter().map(|(l, s)| (*l, *s)).collect()
            }
            None => continue,
        };
        for (client, sid) in clients {
            st.send_responses(
                client,
                vec![Response {
                    rid: 0,
                    stream: None,
                    updates: Some(Updates::Sub(vec![SubUpdate::Row(
                        sid,
                        Arc::clone(&value),
                        ts.clone(),
                    )])),
                    error: error.clone(),
                }],
            );
        }
    }
}

/// Deliver a responder's bare `rid:0` error to every client of every value
/// subscription on that downstream, once per client link.
fn broadcast_sub_error(st: &mut BrokerState, name: &str, error: Payload) {
    let ids: Vec<StreamId> = match st.tree.downstream.get(name) {
        Some(ds) => ds.sub_paths.values().copied().collect(),
        None => return,
    };
    let mut targets: Vec<LinkId> = Vec::new();
    for id in ids {
        if let Some(stream) = st.streams.sub(id) {
            targets.extend(stream.clients.keys().copied());
        }
    }
    targets.sort();
    targets.dedup();
    for client in targets {
        st.send_responses(
            client,
            vec![Response {
                rid: 0,
                stream: None,
                updates: None,
                error: Some(Arc::clone(&error)),
            }],
        );
    }
}

fn ingest_list_response(st: &mut BrokerState, name: &str, id: StreamId, resp: Response) {
    let incoming: Vec<ListUpdate> = resp.updates.map(|u| u.into_list()).unwrap_or_default();
    let closed = matches!(resp.stream, Some(StreamState::Closed));

    let out = match st.streams.list_mut(id) {
        Some(stream) => {
            stream.apply(&incoming);
            if stream.primed {
                incoming
            } else {
                // First response since open or resume: emit the merged view
                // so clients see `$base` and the rest in replay order.
                stream.primed = true;
                stream.cache_updates()
            }
        }
        None => return,
    };

    let state = if closed { StreamState::Closed } else { StreamState::Open };
    st.fanout_list(id, &out, Some(state), resp.error);
    if closed {
        teardown_list(st, name, id);
    }
}

/// Remove a list stream the responder ended: strip client references, then
/// the downstream tables, then the registry entry.
fn teardown_list(st: &mut BrokerState, name: &str, id: StreamId) {
    let Some(Stream::List(stream)) = st.streams.remove(id) else { return };
    for (client, rid) in &stream.clients {
        if let Some(session) = st.links.get_mut(client) {
            session.req_streams.remove(rid);
        }
    }
    if let Some(remote) = &stream.remote {
        if let Some(ds) = st.tree.downstream.get_mut(name) {
            ds.list_paths.remove(&remote.remote_path);
            ds.streams_by_rid.remove(&remote.responder_rid);
        }
    }
}

fn forward_invoke_response(st: &mut BrokerState, id: StreamId, resp: Response) {
    let Some(inv) = st.streams.invoke(id) else { return };
    let requester = inv.requester;
    let requester_rid = inv.requester_rid;
    let downstream = inv.downstream.clone();
    let responder_rid = inv.responder_rid;
    let closed = matches!(resp.stream, Some(StreamState::Closed));

    st.send_responses(
        requester,
        vec![Response {
            rid: requester_rid,
            stream: resp.stream,
            updates: resp.updates,
            error: resp.error,
        }],
    );

    if closed {
        st.streams.remove(id);
        if let Some(session) = st.links.get_mut(&requester) {
            session.req_streams.remove(&requester_rid);
        }
        if let Some(ds) = st.tree.downstream.get_mut(&downstream) {
            ds.streams_by_rid.remove(&responder_rid);
        }
    }
}
