//! Live tree of every subject seen.

use super::element::{NodeId, SubjectElement};
use super::pattern::SEPARATOR;
use crate::events::{EventHandle, Listeners};
use crate::types::{Record, NO_SUBJECT};
use std::collections::HashMap;
use tracing::debug;

/// Structural and counter changes in the subject tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HierarchyEvent {
    /// New children were created under `parent`.
    NodesInserted {
        parent: NodeId,
        parent_path: Vec<String>,
        children: Vec<NodeId>,
    },

    /// Counters, flags or selection of a node changed.
    NodesChanged { node: NodeId, path: Vec<String> },

    /// Children were pruned from under `parent`.
    NodesRemoved {
        parent: NodeId,
        parent_path: Vec<String>,
        children: Vec<NodeId>,
    },

    /// All counters and error flags were cleared.
    Reset,
}

/// Subject tree with per-node record counters.
///
/// Not internally synchronized: the tree is owned by the thread that renders
/// it, and every mutation goes through `&mut self`.
pub struct SubjectHierarchy {
    nodes: Vec<SubjectElement>,
    resolved: HashMap<String, NodeId>,
    listeners: Listeners<HierarchyEvent>,
}

impl SubjectHierarchy {
    /// Id of the root element.
    pub const ROOT: NodeId = NodeId(0);

    pub fn new() -> Self {
        Self::with_listeners(Listeners::new())
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self::with_listeners(Listeners::with_buffer_size(buffer_size))
    }

    fn with_listeners(listeners: Listeners<HierarchyEvent>) -> Self {
        Self {
            nodes: vec![SubjectElement::root()],
            resolved: HashMap::new(),
            listeners,
        }
    }

    pub fn subscribe(&self) -> EventHandle<HierarchyEvent> {
        self.listeners.subscribe()
    }

    pub fn root(&self) -> &SubjectElement {
        &self.nodes[Self::ROOT.0]
    }

    /// Look up any element ever created, attached or not.
    pub fn get(&self, id: NodeId) -> Option<&SubjectElement> {
        self.nodes.get(id.0)
    }

    /// Number of attached elements, excluding the root.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.attached).count() - 1
    }

    /// Dotted subject for an element.
    pub fn subject_of(&self, id: NodeId) -> Option<String> {
        self.get(id).map(|n| n.path.join("."))
    }

    pub fn path(&self, id: NodeId) -> Option<&[String]> {
        self.get(id).map(|n| n.path())
    }

    /// Attached children, in creation order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(|n| n.children()).unwrap_or(&[])
    }

    /// Dotted subjects of every selected element that has records of its
    /// own, depth first.
    pub fn selected_subjects(&self) -> Vec<String> {
        let mut subjects = Vec::new();
        let mut stack = vec![Self::ROOT];
        while let Some(id) = stack.pop() {
            let element = &self.nodes[id.0];
            if id != Self::ROOT && element.selected && element.records_here > 0 {
                subjects.push(element.path.join("."));
            }
            stack.extend(element.children.iter().rev().copied());
        }
        subjects
    }

    /// Element for `subject`, creating it and any missing ancestors.
    ///
    /// An empty subject resolves to the [`NO_SUBJECT`] element.
    pub fn resolve(&mut self, subject: &str) -> NodeId {
        let key = if subject.is_empty() { NO_SUBJECT } else { subject };

        if let Some(&id) = self.resolved.get(key) {
            if self.nodes[id.0].attached {
                return id;
            }
        }

        let segments: Vec<&str> = if key == NO_SUBJECT {
            vec![NO_SUBJECT]
        } else {
            key.split(SEPARATOR).collect()
        };

        let mut current = Self::ROOT;
        for segment in segments {
            current = match self.nodes[current.0].child(segment) {
                Some(child) => child,
                None => self.create_child(current, segment),
            };
        }

        self.resolved.insert(key.to_string(), current);
        current
    }

    /// Element for `subject` if it already exists.
    pub fn find(&self, subject: &str) -> Option<NodeId> {
        let key = if subject.is_empty() { NO_SUBJECT } else { subject };
        if key == NO_SUBJECT {
            return self.root().child(NO_SUBJECT);
        }

        key.split(SEPARATOR)
            .try_fold(Self::ROOT, |node, segment| self.nodes[node.0].child(segment))
    }

    fn create_child(&mut self, parent: NodeId, name: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        let child = SubjectElement::child_of(&self.nodes[parent.0], id, name);
        self.nodes.push(child);

        let parent_node = &mut self.nodes[parent.0];
        parent_node.children.push(id);
        parent_node.child_index.insert(name.to_string(), id);

        self.listeners.broadcast(HierarchyEvent::NodesInserted {
            parent,
            parent_path: parent_node.path.clone(),
            children: vec![id],
        });

        id
    }

    /// File a record: count it at its subject and in every ancestor.
    pub fn record_arrived(&mut self, record: &Record) -> NodeId {
        let node = self.resolve(record.raw_send_subject());
        self.nodes[node.0].records_here += 1;

        let mut current = Some(node);
        while let Some(id) = current {
            let element = &mut self.nodes[id.0];
            element.records_under += 1;
            current = element.parent;
        }

        record.set_subject_node(node);
        self.listeners.broadcast(HierarchyEvent::NodesChanged {
            node,
            path: self.nodes[node.0].path.clone(),
        });

        node
    }

    /// Flag an error at `node` and below every ancestor.
    pub fn set_error_here(&mut self, node: NodeId) {
        let Some(element) = self.nodes.get_mut(node.0) else {
            return;
        };
        element.error_here = true;

        let mut current = element.parent;
        while let Some(id) = current {
            let ancestor = &mut self.nodes[id.0];
            ancestor.error_under = true;
            current = ancestor.parent;
        }

        self.listeners.broadcast(HierarchyEvent::NodesChanged {
            node,
            path: self.nodes[node.0].path.clone(),
        });
    }

    pub fn set_selected(&mut self, node: NodeId, selected: bool, recursive: bool) {
        if node.0 >= self.nodes.len() {
            return;
        }

        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let element = &mut self.nodes[id.0];
            element.selected = selected;
            if recursive {
                stack.extend(element.children.iter().copied());
            }
        }

        self.listeners.broadcast(HierarchyEvent::NodesChanged {
            node,
            path: self.nodes[node.0].path.clone(),
        });
    }

    /// Whether the element filed for `subject` is selected. Unknown
    /// subjects count as selected.
    pub fn is_subject_selected(&self, subject: &str) -> bool {
        self.find(subject)
            .map(|id| self.nodes[id.0].selected)
            .unwrap_or(true)
    }

    /// Remove every current leaf that has no records of its own.
    ///
    /// Single pass: leaves are chosen before anything is removed, so a parent
    /// that becomes an empty leaf is left for the next call.
    pub fn prune_empty(&mut self) -> usize {
        let mut leaves = Vec::new();
        let mut stack = vec![Self::ROOT];
        while let Some(id) = stack.pop() {
            let element = &self.nodes[id.0];
            if id != Self::ROOT && element.is_leaf() && element.records_here == 0 {
                leaves.push(id);
            }
            stack.extend(element.children.iter().rev().copied());
        }

        let mut removed: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for &id in &leaves {
            let element = &mut self.nodes[id.0];
            element.attached = false;
            let name = element.name.clone();
            let Some(parent) = element.parent else {
                continue;
            };

            let parent_node = &mut self.nodes[parent.0];
            parent_node.children.retain(|c| *c != id);
            parent_node.child_index.remove(&name);
            removed.entry(parent).or_default().push(id);
        }

        if !leaves.is_empty() {
            let nodes = &self.nodes;
            self.resolved.retain(|_, id| nodes[id.0].attached);
        }

        for (parent, children) in removed {
            self.listeners.broadcast(HierarchyEvent::NodesRemoved {
                parent,
                parent_path: self.nodes[parent.0].path.clone(),
                children,
            });
        }

        debug!(pruned = leaves.len(), "pruned empty subjects");
        leaves.len()
    }

    /// Prune until no empty leaf remains.
    pub fn prune_empty_recursive(&mut self) -> usize {
        let mut total = 0;
        loop {
            let pruned = self.prune_empty();
            if pruned == 0 {
                return total;
            }
            total += pruned;
        }
    }

    /// Zero every counter and error flag, keeping the structure.
    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.reset_counts();
        }
        self.listeners.broadcast(HierarchyEvent::Reset);
    }
}

impl Default for SubjectHierarchy {
    fn default() -> Self {
        Self::new()
    }
}
