// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Disconnect and reconnect coordination.
//!
//! Losing a requester walks its tables and releases every stream it
//! touched. Losing a responder keeps its streams alive for a grace window:
//! list caches collapse to `$disconnectedTs`, value subscriptions hold
//! their last value, invocations are closed immediately. A responder
//! returning within the window resumes everything with its counters and
//! client tables intact; the timer expiring tears it all down.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::link::LinkId;
use crate::proto::{now_ts, Method, Payload, Request, StreamState, SubscribeTarget};
use crate::state::{Broker, BrokerState};
use crate::stream::{Stream, StreamId};

/// Run disconnect handling for a link and, when it was a responder, start
/// its grace timer.
pub async fn link_lost_and_schedule(broker: &Arc<Broker>, link: LinkId) {
    let job = {
        let mut st = broker.state.lock().await;
        link_lost(&mut st, link)
    };
    if let Some((name, token)) = job {
        spawn_grace_timer(Arc::clone(broker), name, token);
    }
}

/// Remove a lost link from the state. Returns the downstream name and
/// grace token when a timer must be scheduled.
pub fn link_lost(st: &mut BrokerState, link: LinkId) -> Option<(String, CancellationToken)> {
    let mut session = st.links.remove(&link)?;
    debug!(%link, name = %session.name, "link lost");

    // Requester side: leave every stream this link participated in.
    for (sid, id) in session.sub_sids.drain() {
        st.drop_sub_client(id, link, sid);
    }
    let local_subs: Vec<(u32, String)> = session.local_subs.drain().collect();
    for (sid, path) in local_subs {
        st.detach_local_listener(&path, link, sid);
    }
    for (rid, id) in session.req_streams.drain() {
        st.release_rid_stream(link, rid, id);
    }

    // Responder side: enter the grace window.
    let name = session.responder?;
    let token = CancellationToken::new();
    let (list_ids, rid_entries) = {
        let ds = st.tree.downstream.get_mut(&name)?;
        ds.link = None;
        ds.grace = Some(token.clone());
        (
            ds.list_paths.values().copied().collect::<Vec<_>>(),
            ds.streams_by_rid.iter().map(|(r, i)| (*r, *i)).collect::<Vec<_>>(),
        )
    };

    // Invocations cannot outlive the responder: close them now.
    for (responder_rid, id) in rid_entries {
        let Some(inv) = st.streams.invoke(id) else { continue };
        let requester = inv.requester;
        let requester_rid = inv.requester_rid;
        st.streams.remove(id);
        if let Some(ds) = st.tree.downstream.get_mut(&name) {
            ds.streams_by_rid.remove(&responder_rid);
        }
        if let Some(s) = st.links.get_mut(&requester) {
            s.req_streams.remove(&requester_rid);
        }
        st.send_closed(requester, requester_rid);
    }

    // List caches collapse to the disconnect marker; the streams survive.
    let ts = now_ts();
    for id in list_ids {
        if let Some(stream) = st.streams.list_mut(id) {
            stream.reset_disconnected(&ts);
        }
        let update = ("$disconnectedTs".to_owned(), Arc::new(Value::String(ts.clone())));
        st.fanout_list(id, std::slice::from_ref(&update), Some(StreamState::Open), None);
    }

    info!(name = %name, "responder disconnected, grace window started");
    Some((name, token))
}

/// Arm the grace timer for a disconnected responder. Reconnect cancels the
/// token; cancellation is idempotent.
pub fn spawn_grace_timer(broker: Arc<Broker>, name: String, token: CancellationToken) {
    let grace = broker.config.grace();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(grace) => {
                let mut st = broker.state.lock().await;
                grace_expired(&mut st, &name);
            }
        }
    });
}

/// Tear down a downstream whose grace window elapsed without a reconnect.
pub fn grace_expired(st: &mut BrokerState, name: &str) {
    let still_gone = st.tree.downstream.get(name).is_some_and(|ds| ds.link.is_none());
    if !still_gone {
        return;
    }
    let Some(ds) = st.tree.downstream.shift_remove(name) else { return };
    info!(name = %name, "grace expired, tearing down downstream");

    let ts = now_ts();
    // Surviving subscribers see one synthetic null, then nothing.
    let mut sub_ids: Vec<StreamId> = ds.sub_paths.values().copied().collect();
    sub_ids.sort();
    sub_ids.dedup();
    for id in sub_ids {
        let Some(Stream::Sub(stream)) = st.streams.remove(id) else { continue };
        for (client, sid) in stream.clients {
            if let Some(session) = st.links.get_mut(&client) {
                session.sub_sids.remove(&sid);
            }
            st.emit_sub_update(client, sid, Arc::new(Value::Null), ts.clone());
        }
    }

    // Remaining rid streams (lists, by now) are destroyed silently; clients
    // already hold the `$disconnectedTs` view.
    let mut rid_ids: Vec<StreamId> = ds.list_paths.values().copied().collect();
    rid_ids.extend(ds.streams_by_rid.values().copied());
    rid_ids.sort();
    rid_ids.dedup();
    for id in rid_ids {
        match st.streams.remove(id) {
            Some(Stream::List(stream)) => {
                for (client, rid) in stream.clients {
                    if let Some(session) = st.links.get_mut(&client) {
                        session.req_streams.remove(&rid);
                    }
                }
            }
            Some(Stream::Invoke(stream)) => {
                if let Some(session) = st.links.get_mut(&stream.requester) {
                    session.req_streams.remove(&stream.requester_rid);
                }
                st.send_closed(stream.requester, stream.requester_rid);
            }
            _ => {}
        }
    }

    st.announce_downstream(name, false);
}

/// Re-arm a downstream whose link returned within grace: fresh `list`
/// requests for every list stream, one `subscribe` re-registering every
/// remembered responder sid.
pub fn resume_downstream(
    st: &mut BrokerState,
    name: &str,
    link: LinkId,
    link_data: Option<Payload>,
) {
    let (base, link_data, list_jobs, sub_ids) = {
        let Some(ds) = st.tree.downstream.get_mut(name) else { return };
        ds.link = Some(link);
        if let Some(token) = ds.grace.take() {
            token.cancel();
        }
        ds.link_data = link_data;
        let base = ds.path.clone();
        let data = ds.link_data.clone();

        // Invocations died at disconnect; lists get freshly minted rids.
        ds.streams_by_rid.clear();
        let paths: Vec<(String, StreamId)> =
            ds.list_paths.iter().map(|(p, i)| (p.clone(), *i)).collect();
        let mut jobs = Vec::with_capacity(paths.len());
        for (remote_path, id) in paths {
            let rid = ds.next_rid();
            ds.streams_by_rid.insert(rid, id);
            jobs.push((id, rid, remote_path));
        }
        let subs: Vec<StreamId> = ds.sub_paths.values().copied().collect();
        (base, data, jobs, subs)
    };

    let mut requests = Vec::new();
    for (id, rid, remote_path) in list_jobs {
        if let Some(stream) = st.streams.list_mut(id) {
            if let Some(remote) = stream.remote.as_mut() {
                remote.responder_rid = rid;
            }
            stream.reset_base(&base, link_data.as_ref());
        }
        requests.push(Request::with_path(rid, Method::List, remote_path));
    }

    let mut targets = Vec::new();
    for id in sub_ids {
        if let Some(stream) = st.streams.sub(id) {
            targets.push(SubscribeTarget {
                path: stream.remote_path.clone(),
                sid: stream.responder_sid,
                qos: None,
            });
        }
    }
    if !targets.is_empty() {
        let rid = match st.tree.downstream.get_mut(name) {
            Some(ds) => ds.next_rid(),
            None => return,
        };
        let mut req = Request::new(rid, Method::Subscribe);
        req.paths = targets;
        requests.push(req);
    }

    if !requests.is_empty() {
        st.send_requests(link, requests);
    }
}

#[cfg(test)]
#[path = "grace_tests.rs"]
mod grace_tests;
