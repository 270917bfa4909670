// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `list` handler: sustained subscriptions to a node's children and
//! attributes, one shared stream per target, cache replay for late joiners.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::link::LinkId;
use crate::node::Target;
use crate::proto::{Method, Request, Response, Updates};
use crate::state::BrokerState;
use crate::stream::{ListStream, Stream, StreamId};

pub fn handle_list(st: &mut BrokerState, link: LinkId, rid: u32, path: Option<&str>) {
    let Some(target) = path.and_then(|p| st.tree.resolve(p)) else {
        st.send_closed(link, rid);
        return;
    };
    match target {
        Target::Remote { name, remote_path } => list_remote(st, link, rid, name, remote_path),
        Target::Prefix => list_prefix(st, link, rid),
        Target::Local(path) => list_local(st, link, rid, path),
    }
}

fn list_remote(st: &mut BrokerState, link: LinkId, rid: u32, name: String, remote_path: String) {
    let Some(ds) = st.tree.downstream.get_mut(&name) else {
        st.send_closed(link, rid);
        return;
    };

    if let Some(&id) = ds.list_paths.get(&remote_path) {
        join_and_replay(st, id, link, rid);
        return;
    }

    let responder_rid = ds.next_rid();
    let responder = ds.link;
    let base = ds.path.clone();
    let link_data = ds.link_data.clone();
    let path = if remote_path == "/" { base.clone() } else { format!("{base}{remote_path}") };

    let mut stream = ListStream::new_remote(path, &name, &remote_path, responder_rid);
    stream.reset_base(&base, link_data.as_ref());
    stream.clients.insert(link, rid);
    let id = st.streams.insert(Stream::List(stream));

    if let Some(ds) = st.tree.downstream.get_mut(&name) {
        ds.list_paths.insert(remote_path.clone(), id);
        ds.streams_by_rid.insert(responder_rid, id);
    }
    if let Some(session) = st.links.get_mut(&link) {
        session.req_streams.insert(rid, id);
    }
    debug!(%link, %id, downstream = %name, path = %remote_path, "list stream opened toward responder");

    // The initial response waits for the first upstream response; a
    // responder inside its grace window gets the request at resume.
    if let Some(responder) = responder {
        let req = Request::with_path(responder_rid, Method::List, remote_path);
        st.send_requests(responder, vec![req]);
    }
}

fn list_prefix(st: &mut BrokerState, link: LinkId, rid: u32) {
    let prefix = st.tree.prefix().to_owned();
    let id = match st.local_lists.get(&prefix) {
        Some(&id) => id,
        None => {
            let mut stream = ListStream::new_local(prefix.clone());
            stream.cache.insert("$is".to_owned(), Arc::new(json!("node")));
            for name in st.tree.downstream.keys() {
                stream.cache.insert(name.clone(), Arc::new(json!({ "$is": "node" })));
            }
            stream.primed = true;
            let id = st.streams.insert(Stream::List(stream));
            st.local_lists.insert(prefix, id);
            id
        }
    };
    join_and_replay(st, id, link, rid);
}

fn list_local(st: &mut BrokerState, link: LinkId, rid: u32, path: String) {
    let id = match st.local_lists.get(&path) {
        Some(&id) => id,
        None => {
            let Some(node) = st.tree.local(&path) else {
                st.send_closed(link, rid);
                return;
            };
            let mut stream = ListStream::new_local(path.clone());
            stream.cache.insert("$is".to_owned(), Arc::new(json!("node")));
            for (name, child) in &node.children {
                stream.cache.insert(name.clone(), Arc::new(child.summary()));
            }
            stream.primed = true;
            let id = st.streams.insert(Stream::List(stream));
            st.local_lists.insert(path, id);
            id
        }
    };
    join_and_replay(st, id, link, rid);
}

/// Register a client on an existing stream and, when the stream is primed,
/// replay the cache to it immediately.
fn join_and_replay(st: &mut BrokerState, id: StreamId, link: LinkId, rid: u32) {
    let replay = match st.streams.list_mut(id) {
        Some(stream) => {
            stream.clients.insert(link, rid);
            stream.primed.then(|| stream.cache_updates())
        }
        None => return,
    };
    if let Some(session) = st.links.get_mut(&link) {
        session.req_streams.insert(rid, id);
    }
    if let Some(updates) = replay {
        st.send_responses(link, vec![Response::open(rid, Updates::List(updates))]);
    }
}
