//! A minimal in-memory page model.
//!
//! The sanitizer cooperates with a host page: it discovers file inputs,
//! reacts to their change events, replaces their file lists and draws a
//! progress overlay next to them. [`Document`] models exactly the parts of a
//! page those steps touch: an element tree with attributes, classes, inline
//! style, laid-out box size, text and (for file inputs) the selected files.
//! Structural changes are recorded as [`Mutation`]s and dispatched events as
//! [`DomEvent`]s so the binder can observe them the way a mutation observer
//! and an event listener would.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Removed nodes
//! stay in the arena, detached.

use crate::file::UploadFile;
use crate::sync::mutex_lock;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Handle to an element of one [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// A structural change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    /// `node` (and its subtree) was inserted into the connected tree.
    Added(NodeId),
    /// `node` was detached from the tree.
    Removed(NodeId),
}

/// An event waiting for listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomEvent {
    /// The file list of an input changed.
    Change { target: NodeId },
    /// The host framework finished morphing the subtree under `root`.
    MorphUpdated { root: NodeId },
}

#[derive(Debug, Clone, Default)]
pub struct Element {
    tag: String,
    attributes: BTreeMap<String, String>,
    classes: Vec<String>,
    style: BTreeMap<String, String>,
    width: f32,
    height: f32,
    text: String,
    files: Vec<UploadFile>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Element {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn remove_attr(&mut self, name: &str) {
        self.attributes.remove(name);
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn add_class(&mut self, class: impl Into<String>) {
        let class = class.into();
        if !self.has_class(&class) {
            self.classes.push(class);
        }
    }

    pub fn remove_class(&mut self, class: &str) {
        self.classes.retain(|c| c != class);
    }

    pub fn style(&self, property: &str) -> Option<&str> {
        self.style.get(property).map(String::as_str)
    }

    pub fn set_style(&mut self, property: impl Into<String>, value: impl Into<String>) {
        self.style.insert(property.into(), value.into());
    }

    pub fn remove_style(&mut self, property: &str) {
        self.style.remove(property);
    }

    /// Laid-out box size in CSS pixels. Zero means not rendered.
    pub fn size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    pub fn set_size(&mut self, width: f32, height: f32) {
        self.width = width;
        self.height = height;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn files(&self) -> &[UploadFile] {
        &self.files
    }

    /// `<input type="file">`
    pub fn is_file_input(&self) -> bool {
        self.tag == "input"
            && self
                .attr("type")
                .is_some_and(|t| t.eq_ignore_ascii_case("file"))
    }

    pub fn name(&self) -> Option<&str> {
        self.attr("name")
    }
}

/// An element tree plus pending mutations and events.
///
/// Nodes live in an arena that only grows: [`Document::remove`] detaches a
/// subtree but its slots stay allocated, so a [`NodeId`] is never reused.
/// Code that builds and drops elements repeatedly should keep detached
/// nodes and reattach them (the progress overlay does).
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Element>,
    root: NodeId,
    head: NodeId,
    body: NodeId,
    mutations: Vec<Mutation>,
    events: VecDeque<DomEvent>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty `<html><head/><body/></html>` page.
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: vec![Element::new("html")],
            root: NodeId(0),
            head: NodeId(0),
            body: NodeId(0),
            mutations: Vec::new(),
            events: VecDeque::new(),
        };
        doc.head = doc.create_element("head");
        doc.body = doc.create_element("body");
        doc.attach(doc.root, doc.head, None);
        doc.attach(doc.root, doc.body, None);
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn head(&self) -> NodeId {
        self.head
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    /// A new detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.nodes.push(Element::new(tag));
        NodeId(self.nodes.len() - 1)
    }

    /// Create `tag` and append it to `parent`.
    pub fn append_new(&mut self, parent: NodeId, tag: &str) -> NodeId {
        let node = self.create_element(tag);
        self.append_child(parent, node);
        node
    }

    pub fn element(&self, node: NodeId) -> &Element {
        &self.nodes[node.0]
    }

    pub fn element_mut(&mut self, node: NodeId) -> &mut Element {
        &mut self.nodes[node.0]
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.insert_before(parent, child, None);
    }

    /// Insert `child` under `parent` before `reference` (or last). A child
    /// that is already attached somewhere is moved.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        if child == parent || self.contains(child, parent) {
            return;
        }
        if self.parent(child).is_some() {
            self.detach(child);
        }
        self.attach(parent, child, reference);
        if self.is_connected(child) {
            self.mutations.push(Mutation::Added(child));
        }
    }

    /// Detach `node` from its parent. The node and its subtree stay valid
    /// and can be attached again.
    pub fn remove(&mut self, node: NodeId) {
        let was_connected = self.is_connected(node);
        if self.detach(node) && was_connected {
            self.mutations.push(Mutation::Removed(node));
        }
    }

    fn attach(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        let siblings = &mut self.nodes[parent.0].children;
        let at = reference
            .and_then(|r| siblings.iter().position(|&c| c == r))
            .unwrap_or(siblings.len());
        siblings.insert(at, child);
        self.nodes[child.0].parent = Some(parent);
    }

    fn detach(&mut self, node: NodeId) -> bool {
        match self.nodes[node.0].parent.take() {
            Some(parent) => {
                self.nodes[parent.0].children.retain(|&c| c != node);
                true
            }
            None => false,
        }
    }

    /// `true` if `node` is `ancestor` or lies beneath it.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.parent(n);
        }
        false
    }

    /// Attached to the document root.
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.contains(self.root, node)
    }

    /// `root` and everything beneath it, in document order.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        out
    }

    pub fn find(&self, root: NodeId, pred: impl Fn(&Element) -> bool) -> Option<NodeId> {
        self.descendants(root)
            .into_iter()
            .find(|&n| pred(self.element(n)))
    }

    pub fn find_all(&self, root: NodeId, pred: impl Fn(&Element) -> bool) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|&n| pred(self.element(n)))
            .collect()
    }

    /// First connected element with the given `id` attribute.
    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.find(self.root, |e| e.id() == Some(id))
    }

    /// Copy `node` and its subtree into new detached elements.
    pub fn deep_clone(&mut self, node: NodeId) -> NodeId {
        let mut copy = self.nodes[node.0].clone();
        copy.parent = None;
        copy.children = Vec::new();
        self.nodes.push(copy);
        let clone = NodeId(self.nodes.len() - 1);
        for child in self.children(node).to_vec() {
            let child_clone = self.deep_clone(child);
            self.attach(clone, child_clone, None);
        }
        clone
    }

    /// Replace the file list of an input. Fires nothing; see
    /// [`Document::dispatch_change`].
    pub fn set_files(&mut self, input: NodeId, files: Vec<UploadFile>) {
        self.nodes[input.0].files = files;
    }

    pub fn dispatch_change(&mut self, target: NodeId) {
        self.events.push_back(DomEvent::Change { target });
    }

    pub fn dispatch_morph_updated(&mut self, root: NodeId) {
        self.events.push_back(DomEvent::MorphUpdated { root });
    }

    pub fn take_events(&mut self) -> Vec<DomEvent> {
        self.events.drain(..).collect()
    }

    pub fn take_mutations(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.mutations)
    }
}

/// A shared handle to the live page.
#[derive(Debug, Clone, Default)]
pub struct Page {
    doc: Arc<Mutex<Document>>,
}

impl Page {
    pub fn new(doc: Document) -> Self {
        Self {
            doc: Arc::new(Mutex::new(doc)),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        f(&mutex_lock(&self.doc, "page.read"))
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        f(&mut mutex_lock(&self.doc, "page.write"))
    }

    /// What a user picking files does: set the list, then fire `change`.
    pub fn select_files(&self, input: NodeId, files: Vec<UploadFile>) {
        self.write(|doc| {
            doc.set_files(input, files);
            doc.dispatch_change(input);
        });
    }

    /// Files currently held by `input`.
    pub fn files(&self, input: NodeId) -> Vec<UploadFile> {
        self.read(|doc| doc.element(input).files().to_vec())
    }
}
