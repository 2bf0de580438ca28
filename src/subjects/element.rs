//! Nodes of the subject tree.

use std::collections::HashMap;
use std::fmt;

/// Index of a node in the subject tree arena.
///
/// Ids are never reused: a pruned node keeps its id and is simply detached.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// One subject element (a single segment of a dotted subject name).
#[derive(Clone, Debug)]
pub struct SubjectElement {
    pub(super) id: NodeId,
    pub(super) name: String,
    pub(super) path: Vec<String>,
    pub(super) parent: Option<NodeId>,
    pub(super) children: Vec<NodeId>,
    pub(super) child_index: HashMap<String, NodeId>,
    pub(super) records_here: u64,
    pub(super) records_under: u64,
    pub(super) selected: bool,
    pub(super) error_here: bool,
    pub(super) error_under: bool,
    pub(super) attached: bool,
}

impl SubjectElement {
    pub(super) fn root() -> Self {
        Self::new(NodeId(0), String::new(), Vec::new(), None)
    }

    pub(super) fn child_of(parent: &SubjectElement, id: NodeId, name: &str) -> Self {
        let mut path = parent.path.clone();
        path.push(name.to_string());
        Self::new(id, name.to_string(), path, Some(parent.id))
    }

    fn new(id: NodeId, name: String, path: Vec<String>, parent: Option<NodeId>) -> Self {
        Self {
            id,
            name,
            path,
            parent,
            children: Vec::new(),
            child_index: HashMap::new(),
            records_here: 0,
            records_under: 0,
            selected: true,
            error_here: false,
            error_under: false,
            attached: true,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// This element's segment of the subject.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Segments from the root down to and including this element. Fixed at
    /// creation.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in insertion order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<NodeId> {
        self.child_index.get(name).copied()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Records whose send subject ends exactly here.
    pub fn records_here(&self) -> u64 {
        self.records_here
    }

    /// Records filed anywhere in this subtree, including here.
    pub fn records_under(&self) -> u64 {
        self.records_under
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn error_here(&self) -> bool {
        self.error_here
    }

    pub fn error_under(&self) -> bool {
        self.error_under
    }

    /// False once the element has been pruned from the tree.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub(super) fn reset_counts(&mut self) {
        self.records_here = 0;
        self.records_under = 0;
        self.error_here = false;
        self.error_under = false;
    }
}

impl fmt::Display for SubjectElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
