// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol for link envelopes.
//!
//! Every WebSocket text frame is one JSON envelope carrying optional
//! `requests` and `responses` arrays plus `msg`/`ack` sequence numbers.
//! Payload documents are opaque to the broker and shared as
//! [`Payload`] (`Arc<serde_json::Value>`) so that caching and fan-out
//! never deep-copy them.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An opaque, reference-counted JSON document.
pub type Payload = Arc<Value>;

/// Sentinel value in list updates that deletes a cache entry.
pub const REMOVE_SENTINEL: &str = "remove";

/// Return the current time as an ISO-8601 string with millisecond precision.
pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Top-level frame exchanged with a link.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<Request>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<Response>,
}

impl Envelope {
    pub fn with_requests(requests: Vec<Request>) -> Self {
        Self { requests, ..Self::default() }
    }

    pub fn with_responses(responses: Vec<Response>) -> Self {
        Self { responses, ..Self::default() }
    }
}

/// Request methods understood by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    List,
    Subscribe,
    Unsubscribe,
    Invoke,
    Set,
    Remove,
    Close,
    /// Anything this broker does not understand; answered with a closed
    /// response rather than dropping the whole envelope.
    #[serde(other)]
    Unknown,
}

/// A single request within an envelope. `rid` is chosen by the sender and
/// stays unique on that link until the stream it opened is closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub rid: u32,
    pub method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<SubscribeTarget>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sids: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Payload>,
}

impl Request {
    pub fn new(rid: u32, method: Method) -> Self {
        Self {
            rid,
            method,
            path: None,
            paths: Vec::new(),
            sids: Vec::new(),
            params: None,
            value: None,
        }
    }

    pub fn with_path(rid: u32, method: Method, path: impl Into<String>) -> Self {
        Self { path: Some(path.into()), ..Self::new(rid, method) }
    }
}

/// One entry of a `subscribe` request's `paths` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeTarget {
    pub path: String,
    pub sid: u32,
    /// Accepted for wire compatibility; the broker applies no queueing
    /// semantics to it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qos: Option<u8>,
}

/// Stream state attached to a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Open,
    Closed,
}

/// A single response within an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub rid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updates: Option<Updates>,
    /// Responder errors are forwarded verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Payload>,
}

impl Response {
    /// The uniform "stream ended" answer for unresolved paths, unsupported
    /// methods, and broker-side failures.
    pub fn closed(rid: u32) -> Self {
        Self { rid, stream: Some(StreamState::Closed), updates: None, error: None }
    }

    pub fn open(rid: u32, updates: Updates) -> Self {
        Self { rid, stream: Some(StreamState::Open), updates: Some(updates), error: None }
    }
}

/// A list update entry: `[key, value]`. Keys starting with `$` name
/// attributes; all other keys name children.
pub type ListUpdate = (String, Payload);

/// The `updates` field of a response. List streams carry `[key, value]`
/// pairs; value subscriptions carry `[sid, value, ts]` rows (or the object
/// form some responders emit).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Updates {
    List(Vec<ListUpdate>),
    Sub(Vec<SubUpdate>),
}

impl Updates {
    pub fn into_list(self) -> Vec<ListUpdate> {
        match self {
            Self::List(ups) => ups,
            Self::Sub(_) => Vec::new(),
        }
    }

    pub fn into_sub(self) -> Vec<SubUpdate> {
        match self {
            Self::Sub(ups) => ups,
            Self::List(_) => Vec::new(),
        }
    }
}

/// A single value-subscription update in either wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubUpdate {
    Row(u32, Payload, String),
    Obj {
        sid: u32,
        value: Payload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<String>,
    },
}

impl SubUpdate {
    pub fn sid(&self) -> u32 {
        match self {
            Self::Row(sid, ..) => *sid,
            Self::Obj { sid, .. } => *sid,
        }
    }

    pub fn value(&self) -> &Payload {
        match self {
            Self::Row(_, value, _) => value,
            Self::Obj { value, .. } => value,
        }
    }

    /// Timestamp from the wire, or a fresh one when the responder omitted it.
    pub fn ts(&self) -> String {
        match self {
            Self::Row(_, _, ts) => ts.clone(),
            Self::Obj { ts, .. } => ts.clone().unwrap_or_else(now_ts),
        }
    }
}

/// Whether a list update value is the `remove` sentinel.
pub fn is_remove(value: &Value) -> bool {
    value.as_str() == Some(REMOVE_SENTINEL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trip() -> anyhow::Result<()> {
        let env = Envelope {
            msg: Some(3),
            ack: Some(2),
            requests: vec![Request::with_path(1, Method::List, "/downstream/widget")],
            responses: vec![Response::closed(4)],
        };
        let text = serde_json::to_string(&env)?;
        let back: Envelope = serde_json::from_str(&text)?;
        assert_eq!(back.msg, Some(3));
        assert_eq!(back.requests.len(), 1);
        assert_eq!(back.requests[0].method, Method::List);
        assert_eq!(back.responses[0].stream, Some(StreamState::Closed));
        Ok(())
    }

    #[test]
    fn empty_arrays_are_omitted() -> anyhow::Result<()> {
        let text = serde_json::to_string(&Envelope::default())?;
        assert_eq!(text, "{}");
        Ok(())
    }

    #[test]
    fn unknown_method_still_parses() -> anyhow::Result<()> {
        let env: Envelope =
            serde_json::from_str(r#"{"requests":[{"rid":9,"method":"frobnicate"}]}"#)?;
        assert_eq!(env.requests[0].method, Method::Unknown);
        Ok(())
    }

    #[test]
    fn sub_update_tuple_and_object_forms() -> anyhow::Result<()> {
        let ups: Vec<SubUpdate> = serde_json::from_str(
            r#"[[5, 42, "2026-01-01T00:00:00.000Z"], {"sid": 6, "value": "x"}]"#,
        )?;
        assert_eq!(ups[0].sid(), 5);
        assert_eq!(ups[0].value().as_i64(), Some(42));
        assert_eq!(ups[1].sid(), 6);
        assert!(!ups[1].ts().is_empty());
        Ok(())
    }

    #[test]
    fn updates_distinguish_list_from_sub() -> anyhow::Result<()> {
        let list: Updates = serde_json::from_str(r#"[["$is","node"],["value",10]]"#)?;
        assert_eq!(list.into_list().len(), 2);
        let sub: Updates = serde_json::from_str(r#"[[7, true, "t"]]"#)?;
        assert_eq!(sub.into_sub().len(), 1);
        Ok(())
    }

    #[test]
    fn subscribe_target_round_trip() -> anyhow::Result<()> {
        let t: SubscribeTarget = serde_json::from_str(r#"{"path":"/a","sid":2,"qos":1}"#)?;
        assert_eq!(t.qos, Some(1));
        let text = serde_json::to_string(&SubscribeTarget { path: "/b".into(), sid: 3, qos: None })?;
        assert_eq!(text, r#"{"path":"/b","sid":3}"#);
        Ok(())
    }

    #[test]
    fn remove_sentinel_detection() {
        assert!(is_remove(&json!("remove")));
        assert!(!is_remove(&json!("removed")));
        assert!(!is_remove(&json!(null)));
    }

    #[test]
    fn timestamps_have_millisecond_precision() {
        let ts = now_ts();
        // 2026-08-01T12:34:56.789Z
        assert_eq!(ts.len(), 24);
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.as_bytes()[19], b'.');
    }
}
