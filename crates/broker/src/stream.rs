// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The stream registry and the three stream kinds.
//!
//! The registry is the single owner of every stream object. Links and
//! downstream nodes refer to streams only through [`StreamId`] lookups, so
//! teardown is: strip every id reference, then remove the entry here.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::link::LinkId;
use crate::proto::{is_remove, ListUpdate, Payload};

/// Index of a stream in the registry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Remote half of a list stream.
#[derive(Debug, Clone)]
pub struct RemoteList {
    pub downstream: String,
    pub remote_path: String,
    /// The rid this stream most recently used toward the responder.
    pub responder_rid: u32,
}

/// A sustained `list` subscription against one node, shared by all
/// requesters listing that node.
#[derive(Debug)]
pub struct ListStream {
    /// Absolute path as requesters address it.
    pub path: String,
    /// requester link -> the rid that link receives updates under.
    pub clients: HashMap<LinkId, u32>,
    /// Last announced value per key; replayed to late joiners.
    pub cache: IndexMap<String, Payload>,
    pub remote: Option<RemoteList>,
    /// Whether an initial view has been emitted. A fresh remote stream is
    /// unprimed until the first upstream response lands.
    pub primed: bool,
}

impl ListStream {
    pub fn new_local(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            clients: HashMap::new(),
            cache: IndexMap::new(),
            remote: None,
            primed: false,
        }
    }

    pub fn new_remote(
        path: impl Into<String>,
        downstream: impl Into<String>,
        remote_path: impl Into<String>,
        responder_rid: u32,
    ) -> Self {
        Self {
            path: path.into(),
            clients: HashMap::new(),
            cache: IndexMap::new(),
            remote: Some(RemoteList {
                downstream: downstream.into(),
                remote_path: remote_path.into(),
                responder_rid,
            }),
            primed: false,
        }
    }

    /// Apply incoming updates to the cache: the `remove` sentinel deletes,
    /// anything else overwrites.
    pub fn apply(&mut self, updates: &[ListUpdate]) {
        for (key, value) in updates {
            if is_remove(value) {
                self.cache.shift_remove(key);
            } else {
                self.cache.insert(key.clone(), Arc::clone(value));
            }
        }
    }

    /// Reset the cache for an attached responder: `$base` is the mount
    /// path, plus `$linkData` when this stream tracks the responder root
    /// and the link declared metadata.
    pub fn reset_base(&mut self, base_path: &str, link_data: Option<&Payload>) {
        self.cache.clear();
        self.cache.insert("$base".to_owned(), Arc::new(Value::String(base_path.to_owned())));
        let at_root = self.remote.as_ref().is_some_and(|r| r.remote_path == "/");
        if at_root {
            if let Some(data) = link_data {
                self.cache.insert("$linkData".to_owned(), Arc::clone(data));
            }
        }
        self.primed = false;
    }

    /// Reset the cache for a disconnected responder: everything is dropped
    /// in favour of the single `$disconnectedTs` entry.
    pub fn reset_disconnected(&mut self, ts: &str) {
        self.cache.clear();
        self.cache.insert("$disconnectedTs".to_owned(), Arc::new(Value::String(ts.to_owned())));
    }

    /// Render the cache as an updates array: `$base` first, `$is` second,
    /// remaining entries in stable insertion order. Ends with a default
    /// `$is` when the cache has none (a disconnected cache stays bare).
    pub fn cache_updates(&self) -> Vec<ListUpdate> {
        let mut out = Vec::with_capacity(self.cache.len() + 1);
        for key in ["$base", "$is"] {
            if let Some(value) = self.cache.get(key) {
                out.push((key.to_owned(), Arc::clone(value)));
            }
        }
        for (key, value) in &self.cache {
            if key != "$base" && key != "$is" {
                out.push((key.clone(), Arc::clone(value)));
            }
        }
        if !self.cache.contains_key("$is") && !self.cache.contains_key("$disconnectedTs") {
            out.push(("$is".to_owned(), Arc::new(json!("node"))));
        }
        out
    }
}

/// A sustained value subscription against one remote path, shared by all
/// subscribers of that path.
#[derive(Debug)]
pub struct SubStream {
    pub path: String,
    /// requester link -> the sid that link chose.
    pub clients: HashMap<LinkId, u32>,
    pub last_value: Option<(Payload, String)>,
    pub downstream: String,
    pub remote_path: String,
    /// The broker-minted sid the responder tags updates with.
    pub responder_sid: u32,
}

impl SubStream {
    pub fn new(
        path: impl Into<String>,
        downstream: impl Into<String>,
        remote_path: impl Into<String>,
        responder_sid: u32,
    ) -> Self {
        Self {
            path: path.into(),
            clients: HashMap::new(),
            last_value: None,
            downstream: downstream.into(),
            remote_path: remote_path.into(),
            responder_sid,
        }
    }
}

/// An in-flight remote action. Never fanned out: one requester only.
#[derive(Debug)]
pub struct InvokeStream {
    pub requester: LinkId,
    pub requester_rid: u32,
    pub downstream: String,
    pub responder_rid: u32,
}

#[derive(Debug)]
pub enum Stream {
    List(ListStream),
    Sub(SubStream),
    Invoke(InvokeStream),
}

/// Owner of all stream objects, addressed by [`StreamId`].
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: HashMap<StreamId, Stream>,
    next: u32,
}

impl StreamRegistry {
    pub fn insert(&mut self, stream: Stream) -> StreamId {
        self.next += 1;
        let id = StreamId(self.next);
        self.streams.insert(id, stream);
        id
    }

    pub fn get(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub fn remove(&mut self, id: StreamId) -> Option<Stream> {
        self.streams.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn list(&self, id: StreamId) -> Option<&ListStream> {
        match self.streams.get(&id) {
            Some(Stream::List(s)) => Some(s),
            _ => None,
        }
    }

    pub fn list_mut(&mut self, id: StreamId) -> Option<&mut ListStream> {
        match self.streams.get_mut(&id) {
            Some(Stream::List(s)) => Some(s),
            _ => None,
        }
    }

    pub fn sub(&self, id: StreamId) -> Option<&SubStream> {
        match self.streams.get(&id) {
            Some(Stream::Sub(s)) => Some(s),
            _ => None,
        }
    }

    pub fn sub_mut(&mut self, id: StreamId) -> Option<&mut SubStream> {
        match self.streams.get_mut(&id) {
            Some(Stream::Sub(s)) => Some(s),
            _ => None,
        }
    }

    pub fn invoke(&self, id: StreamId) -> Option<&InvokeStream> {
        match self.streams.get(&id) {
            Some(Stream::Invoke(s)) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod stream_tests;
