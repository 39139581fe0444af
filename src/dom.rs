//! # Document Model Module
//!
//! ## Purpose
//! Lightweight in-memory document tree the engine scans and annotates. The
//! host application owns the tree and mutates it freely; the engine only ever
//! adds and removes its own annotation nodes and marker classes.
//!
//! ## Input/Output Specification
//! - **Input**: Structural mutations (insert, detach), text and class edits
//! - **Output**: Selector queries, aggregated inner text, mutation events
//! - **Events**: Every connected insertion is broadcast to subscribers
//!
//! ## Key Features
//! - Arena-backed tree with index handles, no reference cycles
//! - Minimal CSS-like selectors: `.class`, `#id`, bare tag
//! - Document-order queries over connected nodes only
//! - Broadcast mutation feed for change-driven rescans
//!
//! Thread-safety: the tree sits behind a `parking_lot::RwLock` and the
//! `Document` handle is cheaply cloneable. Scan cycles are serialized by the
//! engine, not by this lock; individual operations here are atomic.

use crate::errors::{EngineError, Result};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the mutation broadcast channel. Lagged receivers miss events,
/// which at worst delays a rescan until the next insertion.
const MUTATION_CHANNEL_CAPACITY: usize = 256;

/// Handle to a node in the document tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// A structural document mutation
#[derive(Debug, Clone, Copy)]
pub struct Mutation {
    /// The node that was inserted into the connected tree
    pub added: NodeId,
}

/// Minimal CSS-like selector: class, id, or tag name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// `.class-name`
    Class(String),
    /// `#element-id`
    Id(String),
    /// bare tag name
    Tag(String),
}

impl Selector {
    /// Parse a selector string. Combinators, attribute selectors and
    /// selector lists are not supported.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let invalid = |reason: &str| EngineError::InvalidSelector {
            selector: raw.to_string(),
            reason: reason.to_string(),
        };

        if trimmed.is_empty() {
            return Err(invalid("empty selector"));
        }
        if trimmed.chars().any(|c| c.is_whitespace()) || trimmed.contains('>') {
            return Err(invalid("combinators are not supported"));
        }

        if let Some(class) = trimmed.strip_prefix('.') {
            if class.is_empty() {
                return Err(invalid("missing class name"));
            }
            return Ok(Selector::Class(class.to_string()));
        }
        if let Some(id) = trimmed.strip_prefix('#') {
            if id.is_empty() {
                return Err(invalid("missing element id"));
            }
            return Ok(Selector::Id(id.to_string()));
        }
        Ok(Selector::Tag(trimmed.to_string()))
    }
}

struct Node {
    tag: String,
    id: Option<String>,
    classes: BTreeSet<String>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    connected: bool,
}

struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
    // Slots released by detach, reused by the next create_element
    free: Vec<usize>,
}

/// Shared handle to a document tree
#[derive(Clone)]
pub struct Document {
    tree: Arc<RwLock<Tree>>,
    mutations: broadcast::Sender<Mutation>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create a document with a connected `body` root
    pub fn new() -> Self {
        let root_node = Node {
            tag: "body".to_string(),
            id: None,
            classes: BTreeSet::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
            connected: true,
        };
        let tree = Tree {
            nodes: vec![root_node],
            root: NodeId(0),
            free: Vec::new(),
        };
        let (mutations, _) = broadcast::channel(MUTATION_CHANNEL_CAPACITY);
        Self {
            tree: Arc::new(RwLock::new(tree)),
            mutations,
        }
    }

    /// Root element of the document
    pub fn root(&self) -> NodeId {
        self.tree.read().root
    }

    /// Subscribe to structural insertions
    pub fn subscribe(&self) -> broadcast::Receiver<Mutation> {
        self.mutations.subscribe()
    }

    /// Create a detached element, reusing a released arena slot when one
    /// is available
    pub fn create_element(&self, tag: &str) -> NodeId {
        let mut tree = self.tree.write();
        let node = Node {
            tag: tag.to_string(),
            id: None,
            classes: BTreeSet::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
            connected: false,
        };
        match tree.free.pop() {
            Some(slot) => {
                tree.nodes[slot] = node;
                NodeId(slot)
            }
            None => {
                tree.nodes.push(node);
                NodeId(tree.nodes.len() - 1)
            }
        }
    }

    /// Set the element id attribute
    pub fn set_id(&self, node: NodeId, value: &str) {
        self.tree.write().nodes[node.0].id = Some(value.to_string());
    }

    /// Set the element's own text content
    pub fn set_text(&self, node: NodeId, text: &str) {
        self.tree.write().nodes[node.0].text = text.to_string();
    }

    /// Add a class to the element
    pub fn add_class(&self, node: NodeId, class: &str) {
        self.tree.write().nodes[node.0].classes.insert(class.to_string());
    }

    /// Remove a class from the element
    pub fn remove_class(&self, node: NodeId, class: &str) {
        self.tree.write().nodes[node.0].classes.remove(class);
    }

    /// Whether the element carries the given class
    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.tree.read().nodes[node.0].classes.contains(class)
    }

    /// Whether the node is attached to the document root
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.tree.read().nodes[node.0].connected
    }

    /// Child node ids in order
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.tree.read().nodes[node.0].children.clone()
    }

    /// Parent node id, if attached
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.tree.read().nodes[node.0].parent
    }

    /// Append `child` as the last child of `parent`
    pub fn append_child(&self, parent: NodeId, child: NodeId) {
        let connected = {
            let mut tree = self.tree.write();
            tree.unlink(child);
            tree.nodes[parent.0].children.push(child);
            tree.nodes[child.0].parent = Some(parent);
            let connected = tree.nodes[parent.0].connected;
            tree.set_connected(child, connected);
            connected
        };
        if connected {
            let _ = self.mutations.send(Mutation { added: child });
        }
    }

    /// Insert `child` as the first child of `parent`
    pub fn prepend_child(&self, parent: NodeId, child: NodeId) {
        let connected = {
            let mut tree = self.tree.write();
            tree.unlink(child);
            tree.nodes[parent.0].children.insert(0, child);
            tree.nodes[child.0].parent = Some(parent);
            let connected = tree.nodes[parent.0].connected;
            tree.set_connected(child, connected);
            connected
        };
        if connected {
            let _ = self.mutations.send(Mutation { added: child });
        }
    }

    /// Insert `node` as the next sibling of `reference`. No-op when the
    /// reference is detached from any parent.
    pub fn insert_after(&self, reference: NodeId, node: NodeId) {
        let connected = {
            let mut tree = self.tree.write();
            let Some(parent) = tree.nodes[reference.0].parent else {
                return;
            };
            tree.unlink(node);
            let pos = tree.nodes[parent.0]
                .children
                .iter()
                .position(|&c| c == reference)
                .map(|p| p + 1)
                .unwrap_or(tree.nodes[parent.0].children.len());
            tree.nodes[parent.0].children.insert(pos, node);
            tree.nodes[node.0].parent = Some(parent);
            let connected = tree.nodes[parent.0].connected;
            tree.set_connected(node, connected);
            connected
        };
        if connected {
            let _ = self.mutations.send(Mutation { added: node });
        }
    }

    /// Detach a node (and its subtree) from the document and release its
    /// arena slots for reuse. Handles into the detached subtree become
    /// invalid. Emits no mutation event; the feed observes insertions only.
    pub fn detach(&self, node: NodeId) {
        let mut tree = self.tree.write();
        if node == tree.root {
            return;
        }
        tree.unlink(node);
        tree.release(node);
    }

    /// Size of the node arena, free slots included. Stays flat under
    /// annotation churn because released slots are reused.
    pub fn arena_len(&self) -> usize {
        self.tree.read().nodes.len()
    }

    /// Aggregated text of the node and its descendants, document order
    pub fn inner_text(&self, node: NodeId) -> String {
        let tree = self.tree.read();
        let mut parts = Vec::new();
        tree.collect_text(node, &mut parts);
        parts.join(" ")
    }

    /// Whether the node itself matches the selector
    pub fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        self.tree.read().matches(node, selector)
    }

    /// Whether the node or any ancestor matches the selector
    pub fn closest_matches(&self, node: NodeId, selector: &Selector) -> bool {
        let tree = self.tree.read();
        let mut current = Some(node);
        while let Some(id) = current {
            if tree.matches(id, selector) {
                return true;
            }
            current = tree.nodes[id.0].parent;
        }
        false
    }

    /// Whether the node's subtree (itself included) contains a match
    pub fn contains_match(&self, node: NodeId, selector: &Selector) -> bool {
        let tree = self.tree.read();
        tree.any_in_subtree(node, selector)
    }

    /// All connected nodes matching the selector, in document order
    pub fn query_all(&self, selector: &Selector) -> Vec<NodeId> {
        let tree = self.tree.read();
        let mut out = Vec::new();
        tree.collect_matches(tree.root, selector, &mut out);
        out
    }

    /// Connected nodes matching any of the selectors, de-duplicated,
    /// in document order
    pub fn query_all_any(&self, selectors: &[Selector]) -> Vec<NodeId> {
        let tree = self.tree.read();
        let mut out = Vec::new();
        tree.collect_any(tree.root, selectors, &mut out);
        out
    }

    /// First descendant of `node` matching the selector
    pub fn query_first_within(&self, node: NodeId, selector: &Selector) -> Option<NodeId> {
        let tree = self.tree.read();
        tree.first_descendant(node, selector)
    }
}

impl Tree {
    fn unlink(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.0].parent.take() {
            self.nodes[parent.0].children.retain(|&c| c != node);
        }
    }

    fn set_connected(&mut self, node: NodeId, connected: bool) {
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            self.nodes[id.0].connected = connected;
            stack.extend(self.nodes[id.0].children.iter().copied());
        }
    }

    // Clear every node in the subtree and put its slot on the free list.
    // Cleared slots read as disconnected until reused.
    fn release(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let n = &mut self.nodes[id.0];
            n.connected = false;
            n.parent = None;
            n.id = None;
            n.classes.clear();
            n.text.clear();
            stack.extend(std::mem::take(&mut n.children));
            self.free.push(id.0);
        }
    }

    fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        let n = &self.nodes[node.0];
        match selector {
            Selector::Class(c) => n.classes.contains(c),
            Selector::Id(i) => n.id.as_deref() == Some(i.as_str()),
            Selector::Tag(t) => n.tag == *t,
        }
    }

    fn collect_text(&self, node: NodeId, parts: &mut Vec<String>) {
        let n = &self.nodes[node.0];
        if !n.text.is_empty() {
            parts.push(n.text.clone());
        }
        for &child in &n.children {
            self.collect_text(child, parts);
        }
    }

    fn collect_matches(&self, node: NodeId, selector: &Selector, out: &mut Vec<NodeId>) {
        if self.matches(node, selector) {
            out.push(node);
        }
        for &child in &self.nodes[node.0].children {
            self.collect_matches(child, selector, out);
        }
    }

    fn collect_any(&self, node: NodeId, selectors: &[Selector], out: &mut Vec<NodeId>) {
        if selectors.iter().any(|s| self.matches(node, s)) {
            out.push(node);
        }
        for &child in &self.nodes[node.0].children {
            self.collect_any(child, selectors, out);
        }
    }

    fn any_in_subtree(&self, node: NodeId, selector: &Selector) -> bool {
        if self.matches(node, selector) {
            return true;
        }
        self.nodes[node.0]
            .children
            .iter()
            .any(|&child| self.any_in_subtree(child, selector))
    }

    fn first_descendant(&self, node: NodeId, selector: &Selector) -> Option<NodeId> {
        for &child in &self.nodes[node.0].children {
            if self.matches(child, selector) {
                return Some(child);
            }
            if let Some(found) = self.first_descendant(child, selector) {
                return Some(found);
            }
        }
        None
    }
}
