// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Envelope decoding and per-method dispatch.
//!
//! A handler runs atomically: it finishes every state mutation before the
//! frames it produced leave the per-link queues. Malformed envelopes are
//! dropped without affecting the link.

pub mod invoke;
pub mod list;
pub mod respond;
pub mod subscribe;
pub mod value;

use tracing::debug;

use crate::link::LinkId;
use crate::proto::{Envelope, Method, Request};
use crate::state::BrokerState;

/// Process one inbound text frame from a link.
pub fn handle_frame(st: &mut BrokerState, link: LinkId, text: &str) {
    let env: Envelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(e) => {
            debug!(%link, err = %e, "dropping malformed envelope");
            return;
        }
    };
    if let Some(msg) = env.msg {
        if let Some(session) = st.links.get_mut(&link) {
            session.outbox.last_peer_msg = Some(msg);
        }
    }
    for req in env.requests {
        handle_request(st, link, req);
    }
    for resp in env.responses {
        respond::handle_response(st, link, resp);
    }
}

fn handle_request(st: &mut BrokerState, link: LinkId, req: Request) {
    match st.links.get(&link) {
        Some(session) if session.requester => {}
        Some(_) => {
            debug!(%link, "dropping request from non-requester link");
            return;
        }
        None => return,
    }

    match req.method {
        Method::List => list::handle_list(st, link, req.rid, req.path.as_deref()),
        Method::Subscribe => subscribe::handle_subscribe(st, link, req.rid, req.paths),
        Method::Unsubscribe => subscribe::handle_unsubscribe(st, link, req.rid, &req.sids),
        Method::Invoke => invoke::handle_invoke(st, link, req.rid, req.path.as_deref(), req.params),
        Method::Set => value::handle_set(st, link, req.rid, req.path.as_deref(), req.value),
        Method::Remove => value::handle_remove(st, link, req.rid, req.path.as_deref()),
        Method::Close => handle_close(st, link, req.rid),
        Method::Unknown => st.send_closed(link, req.rid),
    }
}

/// `close` releases whatever stream the requester opened under this rid.
/// It takes effect immediately and is never acknowledged.
fn handle_close(st: &mut BrokerState, link: LinkId, rid: u32) {
    let Some(session) = st.links.get_mut(&link) else { return };
    let Some(id) = session.req_streams.remove(&rid) else { return };
    st.release_rid_stream(link, rid, id);
}
