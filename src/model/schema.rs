//! Static description of the node types the editor understands.
//!
//! A [NodeSchema] says which attributes a node carries, which child types may
//! be attached to it (and how many of each), and whether it holds text. One
//! generic [crate::model::document::node::Node] is parameterized by these
//! schemas instead of having a hand-written type per tag.

pub mod registry;

use std::fmt;

use serde_derive::Deserialize;

pub use registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    Many,
}

/// Value formats that the validators know how to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Absolute URL or URN.
    Url,
    /// ISO 8601 duration, e.g. `PT6H`.
    Duration,
    /// UTC dateTime, e.g. `2030-01-01T00:00:00Z`.
    #[serde(rename = "datetime")]
    DateTime,
    Integer,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Choice {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSlotSpec {
    pub tag: String,
    pub cardinality: Cardinality,
    pub min_occurs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: String,
    pub display_name: String,
    pub allowed_values: Option<Vec<Choice>>,
    pub required: bool,
    pub default_value: String,
    pub format: Option<Format>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct TextSpec {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub format: Option<Format>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSchema {
    pub tag: String,
    pub display_name: String,
    pub child_slots: Vec<ChildSlotSpec>,
    pub attributes: Vec<AttributeSpec>,
    pub text: Option<TextSpec>,
}

impl NodeSchema {
    pub fn has_text(&self) -> bool {
        self.text.is_some()
    }

    /// Index of the slot that accepts children tagged `tag`.
    pub fn slot_index(&self, tag: &str) -> Option<usize> {
        self.child_slots.iter().position(|slot| slot.tag == tag)
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|attr| attr.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|attr| attr.name == name)
    }
}

impl Cardinality {
    pub fn max(&self) -> Option<usize> {
        match self {
            Cardinality::One => Some(1),
            Cardinality::Many => None,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::One => write!(f, "one"),
            Cardinality::Many => write!(f, "many"),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Url => write!(f, "URL"),
            Format::Duration => write!(f, "duration"),
            Format::DateTime => write!(f, "UTC date and time"),
            Format::Integer => write!(f, "integer"),
        }
    }
}

/// Splits `prefix:local` into its parts. Names without a prefix yield `None`.
pub fn split_prefix(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_prefix() {
        assert_eq!(split_prefix("md:EntityDescriptor"), (Some("md"), "EntityDescriptor"));
        assert_eq!(split_prefix("EntityDescriptor"), (None, "EntityDescriptor"));
        assert_eq!(split_prefix("xml:lang"), (Some("xml"), "lang"));
    }

    #[test]
    fn test_slot_and_attribute_lookup() {
        let registry = Registry::builtin();
        let schema = registry.schema_for("md:ContactPerson").unwrap();

        assert_eq!(schema.slot_index("md:Company"), Some(0));
        assert_eq!(schema.slot_index("md:EmailAddress"), Some(3));
        assert_eq!(schema.slot_index("md:Organization"), None);
        assert_eq!(schema.attribute_index("contactType"), Some(0));
        assert!(schema.attribute("contactType").unwrap().required);
        assert!(!schema.has_text());
    }
}
