use std::fmt;

use crate::model::document;
use crate::model::document::NodeId;
use crate::model::document::StructureError;
use crate::model::versioned;
use crate::model::versioned::Versioned;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeType {
    /// Creates a node of the given type and attaches it to `parent`.
    AddChild { parent: NodeId, tag: String },

    /// Detaches `child` from `parent` and drops its whole subtree.
    RemoveChild { parent: NodeId, child: NodeId },

    SetAttribute { node: NodeId, name: String, value: String },

    SetText { node: NodeId, text: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub ty: ChangeType,
    pub generation: u64,
}

/// What applying a change did to the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub change: Change,
    /// The node whose content or children changed.
    pub affected: NodeId,
    /// The node that was created, for [ChangeType::AddChild].
    pub created: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// The change was made against a different version of the document.
    Stale { expected: u64, actual: u64 },
    Structure(StructureError),
}

impl Change {
    pub fn new(document: &document::Document, ty: ChangeType) -> Change {
        Change {
            ty,
            generation: document.generation(),
        }
    }

    pub fn affected(&self) -> NodeId {
        match &self.ty {
            ChangeType::AddChild { parent, .. } => *parent,
            ChangeType::RemoveChild { parent, .. } => *parent,
            ChangeType::SetAttribute { node, .. } => *node,
            ChangeType::SetText { node, .. } => *node,
        }
    }
}

impl versioned::Change<document::Document> for Change {
    type ApplyError = ApplyError;
    type ApplyRecord = Record;

    fn apply(self, document: &mut document::Document) -> Result<(Change, Record), ApplyError> {
        if self.generation != document.generation() {
            return Err(ApplyError::Stale {
                expected: self.generation,
                actual: document.generation(),
            });
        }

        let mut created = None;

        match &self.ty {
            ChangeType::AddChild { parent, tag } => {
                let child = document.create(tag)?;
                document.add_child(*parent, child)?;
                created = Some(child);
            },
            ChangeType::RemoveChild { parent, child } => {
                if *child == document.root() {
                    return Err(StructureError::RootNotRemovable.into());
                }

                document.remove_child(*parent, *child)?;
                document.discard(*child)?;
            },
            ChangeType::SetAttribute { node, name, value } => document.set_attribute(*node, name, value.clone())?,
            ChangeType::SetText { node, text } => document.set_text(*node, text.clone())?,
        }

        let record = Record {
            affected: self.affected(),
            created,
            change: self.clone(),
        };

        Ok((self, record))
    }
}

impl From<StructureError> for ApplyError {
    fn from(e: StructureError) -> ApplyError {
        ApplyError::Structure(e)
    }
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyError::Stale { expected, actual } => write!(f, "change was made against generation {}, but the document is at generation {}", expected, actual),
            ApplyError::Structure(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ApplyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApplyError::Structure(e) => Some(e),
            ApplyError::Stale { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    use crate::model::document::node::Slot;
    use crate::model::schema::Registry;

    fn create_test_document() -> document::Document {
        let mut doc = document::Document::new(Registry::builtin(), "EntityDescriptor").unwrap();
        let root = doc.root();

        let org = doc.create("Organization").unwrap();
        let name = doc.create("OrganizationName").unwrap();
        doc.set_attribute(name, "xml:lang", "en".to_string()).unwrap();
        doc.set_text(name, Some("Example".to_string())).unwrap();
        doc.add_child(org, name).unwrap();
        doc.add_child(root, org).unwrap();

        doc
    }

    #[test]
    fn test_change_add_child() {
        let mut doc = create_test_document();
        let root = doc.root();

        let record = doc.change(Change::new(&doc, ChangeType::AddChild {
            parent: root,
            tag: "ContactPerson".to_string(),
        })).unwrap();

        let contact = record.created.unwrap();
        assert_eq!(record.affected, root);
        assert_eq!(doc.node(contact).unwrap().tag(), "md:ContactPerson");
        assert_eq!(doc.parent(contact), Some(root));
        assert!(doc.previous().is_some());
    }

    #[test]
    fn test_change_add_child_is_atomic() {
        let mut doc = create_test_document();
        let root = doc.root();
        let len = doc.len();
        let generation = doc.generation();

        /* the node gets created before attaching fails; none of that should stick */
        assert_matches!(doc.change(Change::new(&doc, ChangeType::AddChild {
            parent: root,
            tag: "Organization".to_string(),
        })), Err(ApplyError::Structure(StructureError::SlotOccupied { .. })));

        assert_eq!(doc.len(), len);
        assert_eq!(doc.generation(), generation);
        assert!(doc.previous().is_none());
    }

    #[test]
    fn test_change_remove_child() {
        let mut doc = create_test_document();
        let root = doc.root();
        let org = doc.first_child_tagged(root, "Organization").unwrap();

        let record = doc.change(Change::new(&doc, ChangeType::RemoveChild { parent: root, child: org })).unwrap();

        assert_eq!(record.affected, root);
        assert_eq!(record.created, None);
        assert_eq!(doc.node(root).unwrap().slot("md:Organization"), Some(&Slot::One(None)));
        assert_eq!(doc.len(), 1);

        /* the previous version still has the subtree */
        let (previous, _) = doc.previous().unwrap();
        assert_eq!(previous.len(), 3);
        assert_eq!(previous.parent(org), Some(root));

        assert_matches!(doc.clone().change(Change::new(&doc, ChangeType::RemoveChild { parent: root, child: root })),
                        Err(ApplyError::Structure(StructureError::RootNotRemovable)));
    }

    #[test]
    fn test_change_set_attribute() {
        let mut doc = create_test_document();
        let root = doc.root();

        doc.change(Change::new(&doc, ChangeType::SetAttribute {
            node: root,
            name: "entityID".to_string(),
            value: "https://example.org/idp".to_string(),
        })).unwrap();

        assert_eq!(doc.node(root).unwrap().attribute("entityID"), Some("https://example.org/idp"));

        assert_matches!(doc.change(Change::new(&doc, ChangeType::SetAttribute {
            node: root,
            name: "nope".to_string(),
            value: String::new(),
        })), Err(ApplyError::Structure(StructureError::UnknownAttribute { .. })));
    }

    #[test]
    fn test_change_set_text() {
        let mut doc = create_test_document();
        let root = doc.root();
        let org = doc.first_child_tagged(root, "Organization").unwrap();
        let name = doc.first_child_tagged(org, "OrganizationName").unwrap();

        doc.change(Change::new(&doc, ChangeType::SetText { node: name, text: Some("Renamed".to_string()) })).unwrap();
        assert_eq!(doc.node(name).unwrap().text(), Some("Renamed"));

        assert_matches!(doc.change(Change::new(&doc, ChangeType::SetText { node: org, text: None })),
                        Err(ApplyError::Structure(StructureError::TextNotAllowed { .. })));
    }

    #[test]
    fn test_stale_change_is_rejected() {
        let mut doc = create_test_document();
        let root = doc.root();

        let stale = Change::new(&doc, ChangeType::SetAttribute {
            node: root,
            name: "ID".to_string(),
            value: "a".to_string(),
        });

        doc.change(Change::new(&doc, ChangeType::SetAttribute {
            node: root,
            name: "ID".to_string(),
            value: "b".to_string(),
        })).unwrap();

        assert_matches!(doc.change(stale), Err(ApplyError::Stale { .. }));
        assert_eq!(doc.node(root).unwrap().attribute("ID"), Some("b"));
    }

    /* This exists to produce errors if another ChangeType gets added without corresponding tests. */
    fn change_exhaustiveness(ty: ChangeType) {
        match ty {
            ChangeType::AddChild { .. } => test_change_add_child(),
            ChangeType::RemoveChild { .. } => test_change_remove_child(),
            ChangeType::SetAttribute { .. } => test_change_set_attribute(),
            ChangeType::SetText { .. } => test_change_set_text(),
            /* Make tests for your new ChangeType! */
        }
    }
}
