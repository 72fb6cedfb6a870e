use std::fmt;
use std::sync;

use crate::model::schema;
use crate::model::validation;

/// Handle for a node inside a [crate::model::document::Document]. Identity
/// of nodes is identity of handles; two nodes with equal content are still
/// different nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

/// Holds the children of one schema slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    One(Option<NodeId>),
    Many(Vec<NodeId>),
}

/// Advisory editing state, used to drive validation display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Validated with no errors, and unchanged since.
    Clean,
    /// Changed (or new) since the last validation.
    Dirty,
    /// Validated and found errors.
    Invalid,
}

#[derive(Debug, Clone)]
pub struct Node {
    schema: sync::Arc<schema::NodeSchema>,
    /* one entry per schema attribute, same order */
    attributes: Vec<String>,
    text: Option<String>,
    passthrough: Vec<String>,
    /* one entry per schema slot, same order */
    slots: Vec<Slot>,
    parent: Option<NodeId>,
    status: Status,
    errors: validation::Report,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Slot {
    fn for_spec(spec: &schema::ChildSlotSpec) -> Slot {
        match spec.cardinality {
            schema::Cardinality::One => Slot::One(None),
            schema::Cardinality::Many => Slot::Many(Vec::new()),
        }
    }

    pub fn ids(&self) -> &[NodeId] {
        match self {
            Slot::One(Some(id)) => std::slice::from_ref(id),
            Slot::One(None) => &[],
            Slot::Many(ids) => ids,
        }
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.ids().contains(&id)
    }

    /// Whether another child can be added to this slot.
    pub fn is_full(&self) -> bool {
        matches!(self, Slot::One(Some(_)))
    }
}

impl Node {
    pub(crate) fn new(schema: sync::Arc<schema::NodeSchema>) -> Node {
        Node {
            attributes: schema.attributes.iter().map(|attr| attr.default_value.clone()).collect(),
            text: None,
            passthrough: Vec::new(),
            slots: schema.child_slots.iter().map(Slot::for_spec).collect(),
            parent: None,
            status: Status::Dirty,
            errors: validation::Report::default(),
            schema,
        }
    }

    pub fn tag(&self) -> &str {
        &self.schema.tag
    }

    pub fn schema(&self) -> &sync::Arc<schema::NodeSchema> {
        &self.schema
    }

    /// Current value of the named attribute, or `None` if the schema does
    /// not have such an attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.schema.attribute_index(name).map(|i| self.attributes[i].as_str())
    }

    /// Current attribute values alongside their specs, in schema order.
    pub fn attributes(&self) -> impl Iterator<Item = (&schema::AttributeSpec, &str)> + '_ {
        self.schema.attributes.iter().zip(self.attributes.iter().map(String::as_str))
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Raw markup for child elements that aren't modelled structurally.
    pub fn passthrough(&self) -> &[String] {
        &self.passthrough
    }

    pub fn slots(&self) -> impl Iterator<Item = (&schema::ChildSlotSpec, &Slot)> + '_ {
        self.schema.child_slots.iter().zip(self.slots.iter())
    }

    pub fn slot(&self, tag: &str) -> Option<&Slot> {
        self.schema.slot_index(tag).map(|i| &self.slots[i])
    }

    /// All children in slot order, then insertion order within each slot.
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots.iter().flat_map(|slot| slot.ids().iter().copied())
    }

    pub fn has_children(&self) -> bool {
        self.slots.iter().any(|slot| !slot.is_empty())
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Errors found by the most recent validation.
    pub fn errors(&self) -> &validation::Report {
        &self.errors
    }

    pub(crate) fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut Slot {
        &mut self.slots[index]
    }

    /// Returns false if the schema has no such attribute.
    pub(crate) fn set_attribute(&mut self, name: &str, value: String) -> bool {
        match self.schema.attribute_index(name) {
            Some(i) => {
                self.attributes[i] = value;
                self.status = Status::Dirty;
                true
            },
            None => false,
        }
    }

    /// Returns false if the schema doesn't allow text.
    pub(crate) fn set_text(&mut self, text: Option<String>) -> bool {
        if self.schema.has_text() {
            self.text = text;
            self.status = Status::Dirty;
            true
        } else {
            false
        }
    }

    pub(crate) fn push_passthrough(&mut self, markup: String) {
        self.passthrough.push(markup);
        self.status = Status::Dirty;
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.status = Status::Dirty;
    }

    pub(crate) fn record_validation(&mut self, report: validation::Report) {
        self.status = if report.is_valid() { Status::Clean } else { Status::Invalid };
        self.errors = report;
    }
}
