// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `set`/`remove` handlers. Both are fire-and-forget: acknowledged
//! closed immediately, applied locally or forwarded to the responder.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::link::LinkId;
use crate::node::Target;
use crate::proto::{now_ts, ListUpdate, Method, Payload, Request, StreamState};
use crate::state::BrokerState;

pub fn handle_set(
    st: &mut BrokerState,
    link: LinkId,
    rid: u32,
    path: Option<&str>,
    value: Option<Payload>,
) {
    st.send_closed(link, rid);
    let Some(value) = value else { return };
    let Some(target) = path.and_then(|p| st.tree.resolve(p)) else { return };

    match target {
        Target::Local(path) => {
            let node = st.tree.ensure_local(&path);
            node.value = Some(Arc::clone(&value));
            let subs = node.subs.clone();
            let ts = now_ts();
            for (client, sid) in subs {
                st.emit_sub_update(client, sid, Arc::clone(&value), ts.clone());
            }
        }
        Target::Remote { name, remote_path } => {
            forward(st, &name, Method::Set, remote_path, Some(value));
        }
        Target::Prefix => {}
    }
}

pub fn handle_remove(st: &mut BrokerState, link: LinkId, rid: u32, path: Option<&str>) {
    st.send_closed(link, rid);
    let Some(target) = path.and_then(|p| st.tree.resolve(p)) else { return };

    match target {
        Target::Local(path) => {
            let Some((parent, name)) = st.tree.remove_local(&path) else { return };
            // Announce the removal to any list stream watching the parent.
            let Some(&id) = st.local_lists.get(&parent) else { return };
            let update: ListUpdate = (name, Arc::new(json!("remove")));
            if let Some(stream) = st.streams.list_mut(id) {
                stream.apply(std::slice::from_ref(&update));
            }
            st.fanout_list(id, std::slice::from_ref(&update), Some(StreamState::Open), None);
        }
        Target::Remote { name, remote_path } => {
            forward(st, &name, Method::Remove, remote_path, None);
        }
        Target::Prefix => {}
    }
}

/// Forward a fire-and-forget request to a responder. The minted rid is not
/// registered anywhere, so any response to it is dropped by the response
/// matcher.
fn forward(
    st: &mut BrokerState,
    name: &str,
    method: Method,
    remote_path: String,
    value: Option<Payload>,
) {
    let Some(ds) = st.tree.downstream.get_mut(name) else {
        debug!(downstream = %name, "dropping forward to unknown downstream");
        return;
    };
    let Some(responder) = ds.link else { return };
    let rid = ds.next_rid();
    let mut req = Request::with_path(rid, method, remote_path);
    req.value = value;
    st.send_requests(responder, vec![req]);
}
