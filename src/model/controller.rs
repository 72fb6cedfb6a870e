//! UI-facing editing session over one document.
//!
//! The controller owns the document and a selected node. Every mutation goes
//! through a [change::Change], so it either happens completely or not at all,
//! and afterwards the affected nodes are re-validated and subscribers are told
//! about it, synchronously and in the order things happened.

use std::fmt;
use std::sync;

use tracing::{event, instrument, Level};

use crate::config;
use crate::model::document;
use crate::model::document::change;
use crate::model::document::NodeId;
use crate::model::document::StructureError;
use crate::model::schema::registry;
use crate::model::validation;
use crate::model::versioned::Versioned;
use crate::serialization;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A new document replaced the old one. Sent for the root.
    Loaded,
    Selected,
    /// Sent for the parent.
    ChildAdded { child: NodeId },
    /// Sent for a freshly added node, after [Event::ChildAdded] for its parent.
    Created,
    /// Sent for the parent. The child no longer exists.
    ChildRemoved { child: NodeId },
    AttributeChanged { name: String },
    TextChanged,
    /// The most recent change was undone. Sent for the node it had affected.
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Document generation after the change.
    pub generation: u64,
    pub node: NodeId,
    pub event: Event,
    /// Validation errors of `node` after the change.
    pub errors: validation::Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

#[derive(Debug)]
pub enum Error {
    Structure(StructureError),
    Stale { expected: u64, actual: u64 },
    Parse(serialization::ParseError),
    Serialize(serialization::SerializeError),
    NothingToUndo,
}

type Subscriber = Box<dyn FnMut(&Notification)>;

pub struct Controller {
    document: document::Document,
    selected: NodeId,
    serializer: serialization::Serializer,
    subscribers: Vec<(Subscription, Subscriber)>,
    next_subscription: u64,
    history_limit: usize,
}

impl Controller {
    pub fn new(document: document::Document) -> Controller {
        Controller {
            selected: document.root(),
            document,
            serializer: serialization::Serializer::default(),
            subscribers: Vec::new(),
            next_subscription: 0,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Starts a session on an empty document with a root of type `root_tag`.
    pub fn with_root(registry: sync::Arc<registry::Registry>, root_tag: &str) -> Result<Controller, Error> {
        let mut document = document::Document::new(registry, root_tag)?;
        let root = document.root();
        document.validate(root)?;
        Ok(Controller::new(document))
    }

    /// Applies the output and history settings from `config`.
    pub fn configure(&mut self, config: &config::Config) {
        self.set_serializer(serialization::Serializer::from_config(config));
        self.set_history_limit(config.history_limit);
    }

    pub fn set_serializer(&mut self, serializer: serialization::Serializer) {
        self.serializer = serializer;
    }

    /// How many changes [Controller::undo] can step back through.
    pub fn set_history_limit(&mut self, limit: usize) {
        self.history_limit = limit;
        self.document.truncate_history(limit);
    }

    pub fn document(&self) -> &document::Document {
        &self.document
    }

    pub fn selected(&self) -> NodeId {
        self.selected
    }

    /// The selection is only ever moved to attached nodes, so this is `None`
    /// only if the document itself is broken.
    pub fn selected_node(&self) -> Option<&document::Node> {
        self.document.get(self.selected)
    }

    pub fn can_undo(&self) -> bool {
        self.document.previous().is_some()
    }

    pub fn subscribe<F: FnMut(&Notification) + 'static>(&mut self, subscriber: F) -> Subscription {
        let subscription = Subscription(self.next_subscription);
        self.next_subscription+= 1;
        self.subscribers.push((subscription, Box::new(subscriber)));
        subscription
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(s, _)| *s != subscription);
        self.subscribers.len() != before
    }

    pub fn select_node(&mut self, id: NodeId) -> Result<(), Error> {
        if !self.document.is_attached(id) {
            return Err(StructureError::NoSuchNode(id).into());
        }

        self.selected = id;
        self.notify(id, Event::Selected);
        Ok(())
    }

    /// Creates a node of type `tag` and attaches it to the selected node. The
    /// selection doesn't move.
    #[instrument(skip(self))]
    pub fn add_child_to_selected(&mut self, tag: &str) -> Result<NodeId, Error> {
        let parent = self.selected;
        let tag = self.document.registry().normalize(tag).into_owned();

        let record = self.apply(change::ChangeType::AddChild { parent, tag })?;
        let child = record.created.ok_or(StructureError::NoSuchNode(parent))?;

        self.document.validate(parent)?;
        self.document.validate(child)?;

        self.notify(parent, Event::ChildAdded { child });
        self.notify(child, Event::Created);

        Ok(child)
    }

    /// Removes the selected node and its subtree. The parent becomes selected.
    #[instrument(skip(self))]
    pub fn remove_selected(&mut self) -> Result<NodeId, Error> {
        let child = self.selected;
        let parent = self.document.parent(child).ok_or(StructureError::RootNotRemovable)?;

        self.apply(change::ChangeType::RemoveChild { parent, child })?;
        self.selected = parent;

        self.document.validate(parent)?;

        self.notify(parent, Event::ChildRemoved { child });
        self.notify(parent, Event::Selected);

        Ok(parent)
    }

    #[instrument(skip(self))]
    pub fn set_attribute(&mut self, name: &str, value: &str) -> Result<(), Error> {
        let node = self.selected;

        self.apply(change::ChangeType::SetAttribute {
            node,
            name: name.to_string(),
            value: value.to_string(),
        })?;

        self.document.validate(node)?;
        self.notify(node, Event::AttributeChanged { name: name.to_string() });

        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_text(&mut self, value: &str) -> Result<(), Error> {
        let node = self.selected;

        self.apply(change::ChangeType::SetText {
            node,
            text: Some(value.to_string()),
        })?;

        self.document.validate(node)?;
        self.notify(node, Event::TextChanged);

        Ok(())
    }

    /// Replaces the document with one parsed from `source`. On failure the
    /// current document is untouched. Undo history doesn't survive a load.
    #[instrument(skip_all)]
    pub fn load(&mut self, source: &str) -> Result<(), Error> {
        let mut document = serialization::from_text(self.document.registry(), source)?;
        let root = document.root();
        document.validate_tree(root)?;

        self.document = document;
        self.selected = root;

        event!(Level::DEBUG, "loaded document with {} nodes", self.document.len());

        self.notify(root, Event::Loaded);
        Ok(())
    }

    pub fn to_text(&self) -> Result<String, Error> {
        Ok(self.serializer.to_text(&self.document, self.document.root())?)
    }

    /// Steps back over the most recent change.
    pub fn undo(&mut self) -> Result<(), Error> {
        let record = self.document.revert().ok_or(Error::NothingToUndo)?;

        if !self.document.is_attached(self.selected) {
            self.selected = if self.document.is_attached(record.affected) {
                record.affected
            } else {
                self.document.root()
            };
        }

        let node = if self.document.contains(record.affected) { record.affected } else { self.document.root() };
        self.document.validate(node)?;

        event!(Level::DEBUG, "reverted {:?}", record.change.ty);

        self.notify(node, Event::Reverted);
        Ok(())
    }

    fn apply(&mut self, ty: change::ChangeType) -> Result<change::Record, Error> {
        let change = change::Change::new(&self.document, ty);
        let record = self.document.change(change)?;
        self.document.truncate_history(self.history_limit);
        Ok(record)
    }

    fn notify(&mut self, node: NodeId, event: Event) {
        let notification = Notification {
            generation: self.document.generation(),
            node,
            event,
            errors: self.document.get(node).map(|n| n.errors().clone()).unwrap_or_default(),
        };

        for (_, subscriber) in &mut self.subscribers {
            subscriber(&notification);
        }
    }
}

impl From<StructureError> for Error {
    fn from(e: StructureError) -> Error {
        Error::Structure(e)
    }
}

impl From<change::ApplyError> for Error {
    fn from(e: change::ApplyError) -> Error {
        match e {
            change::ApplyError::Structure(e) => Error::Structure(e),
            change::ApplyError::Stale { expected, actual } => Error::Stale { expected, actual },
        }
    }
}

impl From<serialization::ParseError> for Error {
    fn from(e: serialization::ParseError) -> Error {
        Error::Parse(e)
    }
}

impl From<serialization::SerializeError> for Error {
    fn from(e: serialization::SerializeError) -> Error {
        Error::Serialize(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Structure(e) => write!(f, "{}", e),
            Error::Stale { expected, actual } => write!(f, "edit was made against generation {}, but the document is at generation {}", expected, actual),
            Error::Parse(e) => write!(f, "{}", e),
            Error::Serialize(e) => write!(f, "{}", e),
            Error::NothingToUndo => write!(f, "nothing to undo"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Structure(e) => Some(e),
            Error::Parse(e) => Some(e),
            Error::Serialize(e) => Some(e),
            Error::Stale { .. } | Error::NothingToUndo => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell;
    use std::rc;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use crate::model::document::node::Status;
    use crate::model::schema::Registry;

    fn controller() -> Controller {
        Controller::with_root(Registry::builtin(), "EntityDescriptor").unwrap()
    }

    fn record(controller: &mut Controller) -> rc::Rc<cell::RefCell<Vec<Notification>>> {
        let log = rc::Rc::new(cell::RefCell::new(Vec::new()));
        let sink = log.clone();
        controller.subscribe(move |n| sink.borrow_mut().push(n.clone()));
        log
    }

    #[test]
    fn test_add_child_to_selected() {
        let mut c = controller();
        let log = record(&mut c);
        let root = c.selected();

        let contact = c.add_child_to_selected("ContactPerson").unwrap();

        assert_eq!(c.selected(), root);
        assert_eq!(c.document().parent(contact), Some(root));
        assert_eq!(c.document().node(contact).unwrap().status(), Status::Invalid);

        let log = log.borrow();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].node, root);
        assert_eq!(log[0].event, Event::ChildAdded { child: contact });
        assert_eq!(log[1].node, contact);
        assert_eq!(log[1].event, Event::Created);
        assert_eq!(log[1].errors.attribute("contactType"), Some("This field is required"));
        assert_eq!(log[0].generation, c.document().generation());
    }

    #[test]
    fn test_rejected_add_changes_nothing() {
        let mut c = controller();
        let log = record(&mut c);
        let generation = c.document().generation();

        assert_matches!(c.add_child_to_selected("OrganizationName"), Err(Error::Structure(StructureError::UnknownChildType { .. })));
        assert_matches!(c.add_child_to_selected("Bogus"), Err(Error::Structure(StructureError::UnknownType(_))));

        c.add_child_to_selected("Organization").unwrap();
        let generation_after_add = c.document().generation();
        assert!(generation_after_add > generation);
        assert_matches!(c.add_child_to_selected("Organization"), Err(Error::Structure(StructureError::SlotOccupied { .. })));

        assert_eq!(c.document().generation(), generation_after_add);
        assert_eq!(c.document().len(), 2);
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn test_remove_selected() {
        let mut c = controller();
        let root = c.selected();
        let org = c.add_child_to_selected("Organization").unwrap();
        c.select_node(org).unwrap();
        c.add_child_to_selected("OrganizationName").unwrap();

        let log = record(&mut c);
        assert_eq!(c.remove_selected().unwrap(), root);

        assert_eq!(c.selected(), root);
        assert!(!c.document().contains(org));
        assert_eq!(c.document().len(), 1);

        let log = log.borrow();
        assert_eq!(log.iter().map(|n| n.event.clone()).collect::<Vec<_>>(), vec![
            Event::ChildRemoved { child: org },
            Event::Selected,
        ]);
    }

    #[test]
    fn test_root_is_not_removable() {
        let mut c = controller();
        assert_matches!(c.remove_selected(), Err(Error::Structure(StructureError::RootNotRemovable)));
        assert_eq!(c.document().len(), 1);
    }

    #[test]
    fn test_set_attribute_revalidates() {
        let mut c = controller();
        let log = record(&mut c);
        let root = c.selected();

        assert_eq!(c.selected_node().unwrap().errors().attribute("entityID"), Some("This field is required"));

        c.set_attribute("entityID", "https://example.org/sp").unwrap();
        assert_eq!(c.selected_node().unwrap().attribute("entityID"), Some("https://example.org/sp"));
        assert_eq!(c.selected_node().unwrap().status(), Status::Clean);

        assert_matches!(c.set_attribute("bogus", "x"), Err(Error::Structure(StructureError::UnknownAttribute { .. })));

        let log = log.borrow();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].node, root);
        assert_eq!(log[0].event, Event::AttributeChanged { name: "entityID".to_string() });
        assert!(log[0].errors.is_valid());
    }

    #[test]
    fn test_set_text() {
        let mut c = controller();
        assert_matches!(c.set_text("hello"), Err(Error::Structure(StructureError::TextNotAllowed { .. })));

        let org = c.add_child_to_selected("Organization").unwrap();
        c.select_node(org).unwrap();
        let url = c.add_child_to_selected("OrganizationURL").unwrap();
        c.select_node(url).unwrap();

        c.set_text("https://example.org").unwrap();
        assert_eq!(c.selected_node().unwrap().text(), Some("https://example.org"));
    }

    #[test]
    fn test_select_requires_attached_node() {
        let mut c = controller();
        assert_matches!(c.select_node(NodeId(42)), Err(Error::Structure(StructureError::NoSuchNode(_))));
        assert_eq!(c.selected(), c.document().root());
    }

    #[test]
    fn test_undo() {
        let mut c = controller();
        let root = c.selected();
        let org = c.add_child_to_selected("Organization").unwrap();
        c.select_node(org).unwrap();

        let log = record(&mut c);
        c.undo().unwrap();

        assert!(!c.document().contains(org));
        assert_eq!(c.selected(), root);
        assert_eq!(log.borrow()[0].event, Event::Reverted);
        assert_eq!(log.borrow()[0].node, root);

        assert_matches!(c.undo(), Err(Error::NothingToUndo));
    }

    #[test]
    fn test_history_limit() {
        let mut c = controller();
        c.set_history_limit(2);

        for id in ["a", "b", "c", "d"] {
            c.set_attribute("ID", id).unwrap();
        }

        c.undo().unwrap();
        c.undo().unwrap();
        assert_eq!(c.selected_node().unwrap().attribute("ID"), Some("b"));
        assert!(!c.can_undo());
    }

    #[test]
    fn test_unsubscribe() {
        let mut c = controller();
        let count = rc::Rc::new(cell::Cell::new(0));
        let counter = count.clone();
        let subscription = c.subscribe(move |_| counter.set(counter.get() + 1));

        c.set_attribute("ID", "x").unwrap();
        assert!(c.unsubscribe(subscription));
        assert!(!c.unsubscribe(subscription));
        c.set_attribute("ID", "y").unwrap();

        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_load_replaces_document() {
        let mut c = controller();
        c.set_attribute("ID", "x").unwrap();
        let log = record(&mut c);

        c.load(r#"<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata" entityID="https://example.org/idp"><Organization/></EntityDescriptor>"#).unwrap();

        let root = c.document().root();
        assert_eq!(c.selected(), root);
        assert_eq!(c.selected_node().unwrap().attribute("entityID"), Some("https://example.org/idp"));
        assert!(!c.can_undo());

        let org = c.document().first_child_tagged(root, "Organization").unwrap();
        assert_eq!(c.document().node(org).unwrap().status(), Status::Invalid);

        assert_eq!(log.borrow().len(), 1);
        assert_eq!(log.borrow()[0].event, Event::Loaded);
    }

    #[test]
    fn test_failed_load_keeps_document() {
        let mut c = controller();
        c.set_attribute("entityID", "https://example.org/sp").unwrap();

        assert_matches!(c.load("<EntityDescriptor"), Err(Error::Parse(serialization::ParseError::Malformed(_))));
        assert_eq!(c.selected_node().unwrap().attribute("entityID"), Some("https://example.org/sp"));
        assert!(c.can_undo());
    }

    #[test]
    fn test_to_text() {
        let mut c = controller();
        c.set_attribute("entityID", "https://example.org/sp").unwrap();

        assert_eq!(c.to_text().unwrap(), "<md:EntityDescriptor xmlns:md=\"urn:oasis:names:tc:SAML:2.0:metadata\" entityID=\"https://example.org/sp\"/>\n");
    }

    #[test]
    fn test_configure() {
        let mut c = controller();
        c.configure(&config::Config {
            indent: 0,
            history_limit: 1,
            ..config::Config::default()
        });

        c.set_attribute("entityID", "https://example.org/a").unwrap();
        c.set_attribute("entityID", "https://example.org/sp").unwrap();
        c.undo().unwrap();
        assert!(!c.can_undo());

        assert_eq!(c.to_text().unwrap(), "<md:EntityDescriptor xmlns:md=\"urn:oasis:names:tc:SAML:2.0:metadata\" entityID=\"https://example.org/a\"/>");
    }
}
