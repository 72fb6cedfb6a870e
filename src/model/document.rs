pub mod change;
pub mod node;

use std::fmt;
use std::sync;

use tracing::{event, Level};

use crate::model::schema;
use crate::model::schema::registry;
use crate::model::validation;
use crate::model::versioned;

pub use node::NodeId;
pub use node::Node;

/// A tree of typed nodes plus any detached nodes that have been created but
/// not yet attached. Nodes live in a persistent map, so cloning a document is
/// cheap and leaves both copies independent.
#[derive(Clone)]
pub struct Document {
    registry: sync::Arc<registry::Registry>,
    nodes: imbl::HashMap<NodeId, Node>,
    root: NodeId,
    next_id: u64,
    version: versioned::Version<Document>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureError {
    UnknownType(String),
    UnknownChildType { parent: String, child: String },
    ChildNotFound { parent: NodeId, child: NodeId },
    SlotOccupied { parent: NodeId, tag: String },
    AlreadyAttached(NodeId),
    WouldCycle { parent: NodeId, child: NodeId },
    NoSuchNode(NodeId),
    UnknownAttribute { tag: String, name: String },
    TextNotAllowed { tag: String },
    RootNotRemovable,
    NotDetached(NodeId),
}

/// One entry of the "add child" menu for a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub tag: String,
    pub display_name: String,
    pub cardinality: schema::Cardinality,
    pub count: usize,
    pub full: bool,
}

/// Pre-order walk over a subtree.
pub struct Descendants<'a> {
    document: &'a Document,
    stack: Vec<NodeId>,
}

impl Document {
    /// Creates a document holding only a root node of the given type.
    pub fn new(registry: sync::Arc<registry::Registry>, root_tag: &str) -> Result<Document, StructureError> {
        let root_node = registry.create(root_tag)?;
        let root = NodeId(0);

        let mut nodes = imbl::HashMap::new();
        nodes.insert(root, root_node);

        Ok(Document {
            registry,
            nodes,
            root,
            next_id: 1,
            version: Default::default(),
        })
    }

    pub fn registry(&self) -> &sync::Arc<registry::Registry> {
        &self.registry
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes in the arena, detached ones included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, StructureError> {
        self.nodes.get(&id).ok_or(StructureError::NoSuchNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, StructureError> {
        self.nodes.get_mut(&id).ok_or(StructureError::NoSuchNode(id))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(Node::parent)
    }

    /// Whether the node is reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut cursor = id;
        loop {
            if cursor == self.root {
                return true;
            }

            match self.parent(cursor) {
                Some(parent) => cursor = parent,
                None => return false,
            }
        }
    }

    /// Allocates a detached node with the default shape for `tag`.
    pub fn create(&mut self, tag: &str) -> Result<NodeId, StructureError> {
        let node = self.registry.create(tag)?;
        let id = NodeId(self.next_id);
        self.next_id+= 1;

        event!(Level::TRACE, "created {} as {}", node.tag(), id);

        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Attaches a detached node to the slot of `parent` that matches its tag.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), StructureError> {
        let parent_node = self.node(parent)?;
        let child_node = self.node(child)?;

        if child == self.root || child_node.parent().is_some() {
            return Err(StructureError::AlreadyAttached(child));
        }

        let index = parent_node.schema().slot_index(child_node.tag()).ok_or_else(|| StructureError::UnknownChildType {
            parent: parent_node.tag().to_string(),
            child: child_node.tag().to_string(),
        })?;

        let occupied = parent_node.slots().nth(index).is_some_and(|(_, slot)| slot.is_full());

        /* the child may not be the parent or one of its ancestors */
        let mut cursor = Some(parent);
        while let Some(ancestor) = cursor {
            if ancestor == child {
                return Err(StructureError::WouldCycle { parent, child });
            }
            cursor = self.parent(ancestor);
        }

        if occupied {
            return Err(StructureError::SlotOccupied {
                parent,
                tag: self.node(child)?.tag().to_string(),
            });
        }

        let parent_node = self.node_mut(parent)?;
        match parent_node.slot_mut(index) {
            node::Slot::One(slot) => *slot = Some(child),
            node::Slot::Many(ids) => ids.push(child),
        }
        parent_node.mark_dirty();

        self.node_mut(child)?.set_parent(Some(parent));

        event!(Level::TRACE, "attached {} to {}", child, parent);

        Ok(())
    }

    /// Detaches `child` from `parent`. The child stays in the arena until it
    /// is discarded or attached somewhere else.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), StructureError> {
        let parent_node = self.node_mut(parent)?;

        let index = parent_node.slots()
            .position(|(_, slot)| slot.contains(child))
            .ok_or(StructureError::ChildNotFound { parent, child })?;

        match parent_node.slot_mut(index) {
            node::Slot::One(slot) => *slot = None,
            node::Slot::Many(ids) => ids.retain(|id| *id != child),
        }
        parent_node.mark_dirty();

        self.node_mut(child)?.set_parent(None);

        event!(Level::TRACE, "detached {} from {}", child, parent);

        Ok(())
    }

    /// Drops a detached node and everything below it from the arena.
    pub fn discard(&mut self, id: NodeId) -> Result<usize, StructureError> {
        if id == self.root || self.node(id)?.parent().is_some() {
            return Err(StructureError::NotDetached(id));
        }

        let doomed: Vec<NodeId> = self.descendants(id).map(|(id, _)| id).collect();
        for id in &doomed {
            self.nodes.remove(id);
        }

        event!(Level::TRACE, "discarded {} nodes under {}", doomed.len(), id);

        Ok(doomed.len())
    }

    /// Walks the subtree rooted at `id` in pre-order, `id` first. Yields
    /// nothing if there is no such node.
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            document: self,
            stack: if self.contains(id) { vec![id] } else { Vec::new() },
        }
    }

    /// Children of `id` in the slot accepting `tag`, in insertion order.
    pub fn children_tagged(&self, id: NodeId, tag: &str) -> &[NodeId] {
        let tag = self.registry.normalize(tag);
        self.get(id)
            .and_then(|node| node.slot(&tag))
            .map(node::Slot::ids)
            .unwrap_or(&[])
    }

    pub fn first_child_tagged(&self, id: NodeId, tag: &str) -> Option<NodeId> {
        self.children_tagged(id, tag).first().copied()
    }

    /// Whether the slot of `parent` that accepts `tag` can take no more children.
    pub fn slot_full(&self, parent: NodeId, tag: &str) -> Result<bool, StructureError> {
        let parent_node = self.node(parent)?;
        let tag = self.registry.normalize(tag);

        parent_node.slot(&tag).map(node::Slot::is_full).ok_or_else(|| StructureError::UnknownChildType {
            parent: parent_node.tag().to_string(),
            child: tag.into_owned(),
        })
    }

    /// Every child type `parent` accepts, in slot order, with occupancy.
    pub fn child_menu(&self, parent: NodeId) -> Result<Vec<MenuEntry>, StructureError> {
        let parent_node = self.node(parent)?;

        Ok(parent_node.slots().map(|(spec, slot)| MenuEntry {
            tag: spec.tag.clone(),
            display_name: self.registry.schema_for(&spec.tag)
                .map(|schema| schema.display_name.clone())
                .unwrap_or_else(|_| spec.tag.clone()),
            cardinality: spec.cardinality,
            count: slot.len(),
            full: slot.is_full(),
        }).collect())
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: String) -> Result<(), StructureError> {
        let node = self.node_mut(id)?;

        if node.set_attribute(name, value) {
            Ok(())
        } else {
            Err(StructureError::UnknownAttribute {
                tag: node.tag().to_string(),
                name: name.to_string(),
            })
        }
    }

    pub fn set_text(&mut self, id: NodeId, text: Option<String>) -> Result<(), StructureError> {
        let node = self.node_mut(id)?;

        if node.set_text(text) {
            Ok(())
        } else {
            Err(StructureError::TextNotAllowed { tag: node.tag().to_string() })
        }
    }

    pub(crate) fn add_passthrough(&mut self, id: NodeId, markup: String) -> Result<(), StructureError> {
        self.node_mut(id)?.push_passthrough(markup);
        Ok(())
    }

    /// Runs the validators without recording anything.
    pub fn check(&self, id: NodeId) -> Result<validation::Report, StructureError> {
        Ok(validation::check(self.node(id)?))
    }

    /// Runs the validators and stores the result on the node.
    pub fn validate(&mut self, id: NodeId) -> Result<validation::Report, StructureError> {
        let report = self.check(id)?;
        self.node_mut(id)?.record_validation(report.clone());
        Ok(report)
    }

    /// Validates every node under `id`, in pre-order.
    pub fn validate_tree(&mut self, id: NodeId) -> Result<Vec<(NodeId, validation::Report)>, StructureError> {
        self.node(id)?;

        let ids: Vec<NodeId> = self.descendants(id).map(|(id, _)| id).collect();
        ids.into_iter()
            .map(|id| self.validate(id).map(|report| (id, report)))
            .collect()
    }
}

impl<'a> Iterator for Descendants<'a> {
    type Item = (NodeId, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = self.document.get(id)?;

        let first = self.stack.len();
        self.stack.extend(node.children());
        self.stack[first..].reverse();

        Some((id, node))
    }
}

impl versioned::Versioned for Document {
    type Change = change::Change;

    fn version(&self) -> &versioned::Version<Self> {
        &self.version
    }

    fn version_mut(&mut self) -> &mut versioned::Version<Self> {
        &mut self.version
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("version", &self.version)
            .field("root", &self.root)
            .field("nodes", &self.nodes.len())
            .finish_non_exhaustive()
    }
}

impl From<registry::UnknownType> for StructureError {
    fn from(e: registry::UnknownType) -> StructureError {
        StructureError::UnknownType(e.0)
    }
}

impl fmt::Display for StructureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureError::UnknownType(tag) => write!(f, "unknown node type '{}'", tag),
            StructureError::UnknownChildType { parent, child } => write!(f, "'{}' does not accept '{}' children", parent, child),
            StructureError::ChildNotFound { parent, child } => write!(f, "{} is not a child of {}", child, parent),
            StructureError::SlotOccupied { parent, tag } => write!(f, "{} already has a '{}' child", parent, tag),
            StructureError::AlreadyAttached(id) => write!(f, "{} is already attached", id),
            StructureError::WouldCycle { parent, child } => write!(f, "attaching {} under {} would create a cycle", child, parent),
            StructureError::NoSuchNode(id) => write!(f, "no node {}", id),
            StructureError::UnknownAttribute { tag, name } => write!(f, "'{}' has no attribute '{}'", tag, name),
            StructureError::TextNotAllowed { tag } => write!(f, "'{}' does not hold text", tag),
            StructureError::RootNotRemovable => write!(f, "the root node cannot be removed"),
            StructureError::NotDetached(id) => write!(f, "{} is still part of the tree", id),
        }
    }
}

impl std::error::Error for StructureError {}
