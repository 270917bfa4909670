// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `invoke` handler. Invocations are single-requester streams: no
//! coalescing, no cache; responses are forwarded with the rid rewritten.

use tracing::debug;

use crate::link::LinkId;
use crate::node::Target;
use crate::proto::{Method, Payload, Request};
use crate::state::BrokerState;
use crate::stream::{InvokeStream, Stream};

pub fn handle_invoke(
    st: &mut BrokerState,
    link: LinkId,
    rid: u32,
    path: Option<&str>,
    params: Option<Payload>,
) {
    let target = path.and_then(|p| st.tree.resolve(p));
    let Some(Target::Remote { name, remote_path }) = target else {
        // The broker exposes no local actions.
        st.send_closed(link, rid);
        return;
    };

    let Some(ds) = st.tree.downstream.get_mut(&name) else {
        st.send_closed(link, rid);
        return;
    };
    // A responder inside its grace window cannot service an action now.
    let Some(responder) = ds.link else {
        st.send_closed(link, rid);
        return;
    };
    let responder_rid = ds.next_rid();

    let id = st.streams.insert(Stream::Invoke(InvokeStream {
        requester: link,
        requester_rid: rid,
        downstream: name.clone(),
        responder_rid,
    }));
    if let Some(ds) = st.tree.downstream.get_mut(&name) {
        ds.streams_by_rid.insert(responder_rid, id);
    }
    if let Some(session) = st.links.get_mut(&link) {
        session.req_streams.insert(rid, id);
    }
    debug!(%link, %id, name = %name, path = %remote_path, "invocation forwarded");

    let mut req = Request::with_path(responder_rid, Method::Invoke, remote_path);
    req.params = params;
    st.send_requests(responder, vec![req]);
}
