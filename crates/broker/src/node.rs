// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The virtual node tree.
//!
//! Local nodes live in a regular tree under the root. Responder links are
//! not spliced into that tree; they hang off a dedicated downstream table
//! keyed by link name, mounted under a configurable path prefix. The
//! resolver splits any absolute path into one of three targets.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::link::LinkId;
use crate::proto::Payload;
use crate::stream::StreamId;

/// Where a path points after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A regular node (existing or not) under the local tree.
    Local(String),
    /// The downstream mount prefix itself.
    Prefix,
    /// A path behind a responder link. `remote_path` is the residual
    /// suffix in the responder's own namespace, `/` for its root.
    Remote { name: String, remote_path: String },
}

/// A regular local node: an opaque value, insertion-ordered children, and
/// the `(link, sid)` pairs listening for value changes.
#[derive(Debug, Default)]
pub struct RegularNode {
    pub value: Option<Payload>,
    pub children: IndexMap<String, RegularNode>,
    pub subs: Vec<(LinkId, u32)>,
}

impl RegularNode {
    /// The node-summary object emitted for this node in a parent's list.
    pub fn summary(&self) -> serde_json::Value {
        json!({ "$is": "node" })
    }
}

/// State for one attached (or recently detached) responder link.
#[derive(Debug)]
pub struct DownstreamNode {
    pub name: String,
    /// Mount path under the tree root, e.g. `/downstream/widget`.
    pub path: String,
    /// The currently attached link, `None` while in the grace window.
    pub link: Option<LinkId>,
    /// Metadata the link declared at handshake, surfaced as `$linkData`
    /// in root list caches.
    pub link_data: Option<Payload>,
    /// Grace timer for the current disconnection, if any.
    pub grace: Option<CancellationToken>,
    /// remote path -> value-subscription stream.
    pub sub_paths: HashMap<String, StreamId>,
    /// responder-side sid -> value-subscription stream.
    pub sub_sids: HashMap<u32, StreamId>,
    /// remote path -> list stream.
    pub list_paths: HashMap<String, StreamId>,
    /// broker-minted rid -> list or invocation stream, for response matching.
    pub streams_by_rid: HashMap<u32, StreamId>,
    next_rid: u32,
    next_sid: u32,
}

impl DownstreamNode {
    pub fn new(name: impl Into<String>, path: impl Into<String>, link: LinkId) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            link: Some(link),
            link_data: None,
            grace: None,
            sub_paths: HashMap::new(),
            sub_sids: HashMap::new(),
            list_paths: HashMap::new(),
            streams_by_rid: HashMap::new(),
            next_rid: 0,
            next_sid: 0,
        }
    }

    /// Mint the next rid toward this responder. Monotone for the lifetime
    /// of the downstream node, including across reconnects.
    pub fn next_rid(&mut self) -> u32 {
        self.next_rid += 1;
        self.next_rid
    }

    /// Mint the next sid toward this responder.
    pub fn next_sid(&mut self) -> u32 {
        self.next_sid += 1;
        self.next_sid
    }
}

/// The unified virtual tree: local nodes plus the downstream table.
#[derive(Debug)]
pub struct NodeTree {
    pub root: RegularNode,
    pub downstream: IndexMap<String, DownstreamNode>,
    prefix: String,
}

impl NodeTree {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { root: RegularNode::default(), downstream: IndexMap::new(), prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Resolve an absolute path. Returns `None` for paths that are not
    /// well-formed; existence of the target is the caller's concern.
    pub fn resolve(&self, raw: &str) -> Option<Target> {
        let path = normalize(raw)?;
        if path == self.prefix {
            return Some(Target::Prefix);
        }
        let under = format!("{}/", self.prefix);
        if let Some(rest) = path.strip_prefix(&under) {
            let (name, remote_path) = match rest.split_once('/') {
                Some((name, suffix)) => (name, format!("/{suffix}")),
                None => (rest, "/".to_owned()),
            };
            return Some(Target::Remote { name: name.to_owned(), remote_path });
        }
        Some(Target::Local(path))
    }

    /// Look up an existing local node.
    pub fn local(&self, path: &str) -> Option<&RegularNode> {
        let mut node = &self.root;
        for seg in segments(path) {
            node = node.children.get(seg)?;
        }
        Some(node)
    }

    pub fn local_mut(&mut self, path: &str) -> Option<&mut RegularNode> {
        let mut node = &mut self.root;
        for seg in segments(path) {
            node = node.children.get_mut(seg)?;
        }
        Some(node)
    }

    /// Get a local node, creating it (and any missing ancestors) value-less.
    pub fn ensure_local(&mut self, path: &str) -> &mut RegularNode {
        let mut node = &mut self.root;
        for seg in segments(path) {
            node = node.children.entry(seg.to_owned()).or_default();
        }
        node
    }

    /// Remove a local node. Returns the `(parent_path, child_name)` pair so
    /// callers can announce the removal to list streams watching the parent.
    pub fn remove_local(&mut self, path: &str) -> Option<(String, String)> {
        let segs: Vec<&str> = segments(path).collect();
        let (name, parents) = segs.split_last()?;
        let mut node = &mut self.root;
        for seg in parents {
            node = node.children.get_mut(*seg)?;
        }
        node.children.shift_remove(*name)?;
        let parent_path =
            if parents.is_empty() { "/".to_owned() } else { format!("/{}", parents.join("/")) };
        Some((parent_path, (*name).to_owned()))
    }
}

/// Normalize an absolute path: require a leading `/`, strip one trailing
/// `/`, reject empty segments.
pub fn normalize(raw: &str) -> Option<String> {
    if !raw.starts_with('/') {
        return None;
    }
    if raw == "/" {
        return Some("/".to_owned());
    }
    let trimmed = raw.strip_suffix('/').unwrap_or(raw);
    if trimmed.is_empty() || trimmed[1..].split('/').any(str::is_empty) {
        return None;
    }
    Some(trimmed.to_owned())
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod node_tests;
