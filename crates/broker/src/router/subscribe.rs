// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `subscribe`/`unsubscribe` handlers.
//!
//! All requesters subscribing to the same remote path share one upstream
//! subscription; each chooses its own sid and the broker rewrites updates
//! per client. Local paths use node listeners instead of streams.

use tracing::debug;

use crate::link::LinkId;
use crate::node::Target;
use crate::proto::{now_ts, Method, Request, SubscribeTarget};
use crate::state::BrokerState;
use crate::stream::{Stream, SubStream};

pub fn handle_subscribe(
    st: &mut BrokerState,
    link: LinkId,
    rid: u32,
    targets: Vec<SubscribeTarget>,
) {
    // The request itself is acknowledged closed; updates flow under rid 0.
    st.send_closed(link, rid);
    for target in targets {
        subscribe_one(st, link, target);
    }
}

pub fn handle_unsubscribe(st: &mut BrokerState, link: LinkId, rid: u32, sids: &[u32]) {
    st.send_closed(link, rid);
    for &sid in sids {
        release_sid(st, link, sid);
    }
}

fn subscribe_one(st: &mut BrokerState, link: LinkId, target: SubscribeTarget) {
    let Some(resolved) = st.tree.resolve(&target.path) else {
        debug!(%link, path = %target.path, "subscribe to unresolvable path ignored");
        return;
    };
    // A sid being rebound drops its previous binding first.
    release_sid(st, link, target.sid);
    match resolved {
        Target::Local(path) => subscribe_local(st, link, target.sid, path),
        Target::Remote { name, remote_path } => {
            subscribe_remote(st, link, target.sid, name, remote_path);
        }
        Target::Prefix => {
            debug!(%link, "subscribe to downstream prefix ignored");
        }
    }
}

/// Drop whatever subscription this link currently holds under `sid`.
pub fn release_sid(st: &mut BrokerState, link: LinkId, sid: u32) {
    let binding = match st.links.get_mut(&link) {
        Some(session) => {
            (session.local_subs.remove(&sid), session.sub_sids.remove(&sid))
        }
        None => return,
    };
    match binding {
        (Some(path), _) => st.detach_local_listener(&path, link, sid),
        (None, Some(id)) => st.drop_sub_client(id, link, sid),
        (None, None) => {}
    }
}

fn subscribe_local(st: &mut BrokerState, link: LinkId, sid: u32, path: String) {
    let node = st.tree.ensure_local(&path);
    node.subs.retain(|entry| *entry != (link, sid));
    node.subs.push((link, sid));
    let value = node.value.clone();
    if let Some(session) = st.links.get_mut(&link) {
        session.local_subs.insert(sid, path);
    }
    if let Some(value) = value {
        st.emit_sub_update(link, sid, value, now_ts());
    }
}

fn subscribe_remote(
    st: &mut BrokerState,
    link: LinkId,
    sid: u32,
    name: String,
    remote_path: String,
) {
    let Some(ds) = st.tree.downstream.get_mut(&name) else {
        debug!(%link, downstream = %name, "subscribe to unknown downstream ignored");
        return;
    };

    if let Some(&id) = ds.sub_paths.get(&remote_path) {
        let last = match st.streams.sub_mut(id) {
            Some(stream) => {
                stream.clients.insert(link, sid);
                stream.last_value.clone()
            }
            None => return,
        };
        if let Some(session) = st.links.get_mut(&link) {
            session.sub_sids.insert(sid, id);
        }
        if let Some((value, ts)) = last {
            st.emit_sub_update(link, sid, value, ts);
        }
        return;
    }

    let responder_sid = ds.next_sid();
    let request_rid = ds.next_rid();
    let responder = ds.link;
    let base = ds.path.clone();
    let path = if remote_path == "/" { base.clone() } else { format!("{base}{remote_path}") };

    let mut stream = SubStream::new(path, &name, &remote_path, responder_sid);
    stream.clients.insert(link, sid);
    let id = st.streams.insert(Stream::Sub(stream));

    if let Some(ds) = st.tree.downstream.get_mut(&name) {
        ds.sub_paths.insert(remote_path.clone(), id);
        ds.sub_sids.insert(responder_sid, id);
    }
    if let Some(session) = st.links.get_mut(&link) {
        session.sub_sids.insert(sid, id);
    }
    debug!(
        %link,
        %id,
        downstream = %name,
        path = %remote_path,
        responder_sid,
        "value subscription opened toward responder"
    );

    if let Some(responder) = responder {
        let mut req = Request::new(request_rid, Method::Subscribe);
        req.paths = vec![SubscribeTarget { path: remote_path, sid: responder_sid, qos: None }];
        st.send_requests(responder, vec![req]);
    }
}
