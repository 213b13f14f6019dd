//! In-memory element tree the scanner and change observer run against
//!
//! The tree only models what media auditing needs: tag names, attributes, and
//! the live playback fields a media element exposes. Structural changes made
//! through [`Document::append_child`] and [`Document::remove_child`] are
//! queued as [`MutationRecord`]s and handed to subscribers as one batch per
//! [`Document::flush_mutations`].
//!
//! The arena is append-only: removed nodes keep their slot so outstanding
//! [`NodeId`]s stay valid, and a document lives only as long as one audit run.

pub mod html;
mod mutation;

pub use mutation::{MutationBatch, MutationRecord, Subscription};

use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

use mutation::ObserverSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("cannot insert {child} under its own descendant {parent}")]
    HierarchyRequest { parent: NodeId, child: NodeId },

    #[error("node {child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },
}

/// Live playback fields of a media element. These change while media loads
/// and plays, independently of the tree structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaState {
    /// Length in seconds; `None` before metadata is available
    pub duration: Option<f64>,
    pub ready_state: u16,
    pub network_state: u16,
    pub video_width: u32,
    pub video_height: u32,
    /// Resolved URL the element is currently playing, if any
    pub current_src: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    tag: String,
    attributes: Vec<(String, String)>,
    pub media: MediaState,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attributes: Vec::new(),
            media: MediaState::default(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn set_attribute(&mut self, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.attributes.push((name, value.to_string())),
        }
    }
}

struct Node {
    element: Element,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Read access plus insertion observation, the only capabilities the scanner
/// and change observer depend on.
pub trait DocumentQuery {
    /// Every attached element with `tag`, in document order
    fn query_all(&self, tag: &str) -> Vec<NodeId>;

    /// Descendants of `scope` (excluding `scope`) with `tag`, in document order
    fn query_within(&self, scope: NodeId, tag: &str) -> Vec<NodeId>;

    fn element(&self, node: NodeId) -> Option<&Element>;

    /// Base URL relative `src` attributes resolve against
    fn base_url(&self) -> Option<&Url>;

    /// Subscribe to child insertions anywhere under `subtree`
    fn observe_insertions(&mut self, subtree: NodeId) -> Subscription;
}

pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    body: NodeId,
    base_url: Option<Url>,
    observers: Vec<ObserverSlot>,
    fragment_holder: Option<NodeId>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty `<html><body></body></html>` document
    pub fn new() -> Self {
        let mut doc = Self::with_root("html");
        let body = doc.create_element("body");
        doc.attach(doc.root, body);
        doc.body = body;
        doc
    }

    /// Document with a bare root and no body. `body()` returns the root until
    /// [`Document::set_body`] is called.
    pub(crate) fn with_root(tag: &str) -> Self {
        let root = NodeId(0);
        Self {
            nodes: vec![Node {
                element: Element::new(tag),
                parent: None,
                children: Vec::new(),
            }],
            root,
            body: root,
            base_url: None,
            observers: Vec::new(),
            fragment_holder: None,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub(crate) fn set_body(&mut self, body: NodeId) {
        self.body = body;
    }

    pub fn set_base_url(&mut self, base_url: Option<Url>) {
        self.base_url = base_url;
    }

    /// Create a detached element
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            element: Element::new(tag),
            parent: None,
            children: Vec::new(),
        });
        id
    }

    /// Detached scratch element fragments are built under. Created once per
    /// document and emptied on every call.
    pub(crate) fn fragment_holder(&mut self) -> NodeId {
        if let Some(holder) = self.fragment_holder {
            for child in std::mem::take(&mut self.nodes[holder.0].children) {
                self.nodes[child.0].parent = None;
            }
            return holder;
        }
        let holder = self.create_element("template");
        self.fragment_holder = Some(holder);
        holder
    }

    pub fn element_mut(&mut self, node: NodeId) -> Option<&mut Element> {
        self.nodes.get_mut(node.0).map(|n| &mut n.element)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0).and_then(|n| n.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes.get(node.0).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// True when `node` is `ancestor` or lies beneath it
    pub fn is_inclusive_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// True when `node` is reachable from the root
    pub fn is_attached(&self, node: NodeId) -> bool {
        self.is_inclusive_descendant(node, self.root)
    }

    fn check(&self, node: NodeId) -> Result<(), DocumentError> {
        if node.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(DocumentError::UnknownNode(node))
        }
    }

    fn attach(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    fn detach(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.0].children.retain(|c| *c != child);
        self.nodes[child.0].parent = None;
    }

    /// Queue `record` for every subscriber watching its target as the tree
    /// stands now, so a later detach does not hide it
    fn record(&mut self, record: MutationRecord) {
        let mut observers = std::mem::take(&mut self.observers);
        for slot in &mut observers {
            if self.is_inclusive_descendant(record.target, slot.subtree) {
                slot.queued.push(record.clone());
            }
        }
        self.observers = observers;
    }

    /// Append `child` as the last child of `parent`, moving it out of its
    /// current parent first
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DocumentError> {
        self.check(parent)?;
        self.check(child)?;
        if self.is_inclusive_descendant(parent, child) {
            return Err(DocumentError::HierarchyRequest { parent, child });
        }

        if let Some(old_parent) = self.parent(child) {
            self.detach(old_parent, child);
            self.record(MutationRecord {
                target: old_parent,
                added: Vec::new(),
                removed: vec![child],
            });
        }

        self.attach(parent, child);
        self.record(MutationRecord {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
        });
        trace!(parent = %parent, child = %child, "appended child");
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DocumentError> {
        self.check(parent)?;
        self.check(child)?;
        if self.parent(child) != Some(parent) {
            return Err(DocumentError::NotAChild { parent, child });
        }

        self.detach(parent, child);
        self.record(MutationRecord {
            target: parent,
            added: Vec::new(),
            removed: vec![child],
        });
        trace!(parent = %parent, child = %child, "removed child");
        Ok(())
    }

    /// Deliver each subscriber's queued records as one batch. Returns the
    /// number of batches delivered.
    pub fn flush_mutations(&mut self) -> usize {
        let mut delivered = 0;
        let observers = std::mem::take(&mut self.observers);
        let mut live = Vec::with_capacity(observers.len());
        for mut slot in observers {
            let batch = std::mem::take(&mut slot.queued);
            if batch.is_empty() {
                live.push(slot);
                continue;
            }

            if slot.sender.send(batch).is_ok() {
                delivered += 1;
                live.push(slot);
            } else {
                debug!(subtree = %slot.subtree, "Dropping cancelled subscription");
            }
        }
        self.observers = live;
        delivered
    }

    fn collect_tag(&self, from: NodeId, tag: &str, out: &mut Vec<NodeId>) {
        for &child in self.children(from) {
            if self.nodes[child.0].element.is(tag) {
                out.push(child);
            }
            self.collect_tag(child, tag, out);
        }
    }
}

impl DocumentQuery for Document {
    fn query_all(&self, tag: &str) -> Vec<NodeId> {
        let mut out = Vec::new();
        if self.nodes[self.root.0].element.is(tag) {
            out.push(self.root);
        }
        self.collect_tag(self.root, tag, &mut out);
        out
    }

    fn query_within(&self, scope: NodeId, tag: &str) -> Vec<NodeId> {
        let mut out = Vec::new();
        if self.check(scope).is_ok() {
            self.collect_tag(scope, tag, &mut out);
        }
        out
    }

    fn element(&self, node: NodeId) -> Option<&Element> {
        self.nodes.get(node.0).map(|n| &n.element)
    }

    fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    fn observe_insertions(&mut self, subtree: NodeId) -> Subscription {
        let (slot, subscription) = Subscription::channel(subtree);
        self.observers.push(slot);
        debug!(subtree = %subtree, "Observing insertions");
        subscription
    }
}
