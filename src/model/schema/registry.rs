use std::borrow;
use std::collections;
use std::fmt;
use std::sync;

use once_cell::sync::Lazy;
use serde_derive::Deserialize;
use tracing::{event, Level};

use crate::model::document::node;
use crate::model::schema;

const BUILTIN_TABLE: &str = include_str!("saml-metadata.toml");

static BUILTIN: Lazy<sync::Arc<Registry>> = Lazy::new(|| {
    sync::Arc::new(Registry::from_toml(BUILTIN_TABLE).expect("built-in schema table should be well-formed"))
});

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Namespace {
    pub prefix: String,
    pub uri: String,
}

/// Maps tags to the schemas describing them. Read-only once built.
#[derive(Debug)]
pub struct Registry {
    default_prefix: String,
    namespaces: Vec<Namespace>,
    schemas: collections::HashMap<String, sync::Arc<schema::NodeSchema>>,
    order: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownType(pub String);

#[derive(Debug)]
pub enum SchemaError {
    Toml(toml::de::Error),
    DuplicateType(String),
    DuplicateNamespace(String),
    UnknownPrefix { tag: String },
    UnknownDefaultPrefix(String),
    UnknownChoices { tag: String, attribute: String, choices: String },
    UnknownChildType { tag: String, child: String },
    DuplicateSlot { tag: String, child: String },
    MinOccursTooLarge { tag: String, child: String },
}

/* The shapes below mirror the TOML table; they get resolved into the public
 * schema types once every choice list and child tag has been checked. */

#[derive(Deserialize)]
struct RawTable {
    default_prefix: String,
    #[serde(default)]
    namespaces: Vec<Namespace>,
    #[serde(default)]
    choices: collections::HashMap<String, Vec<schema::Choice>>,
    #[serde(default)]
    types: Vec<RawType>,
}

#[derive(Deserialize)]
struct RawType {
    tag: String,
    display_name: Option<String>,
    #[serde(default)]
    attributes: Vec<RawAttribute>,
    #[serde(default)]
    children: Vec<RawSlot>,
    text: Option<schema::TextSpec>,
}

#[derive(Deserialize)]
struct RawAttribute {
    name: String,
    display_name: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    default: String,
    format: Option<schema::Format>,
    choices: Option<String>,
}

#[derive(Deserialize)]
struct RawSlot {
    tag: String,
    #[serde(default = "default_cardinality")]
    cardinality: schema::Cardinality,
    #[serde(default)]
    min_occurs: u32,
}

fn default_cardinality() -> schema::Cardinality {
    schema::Cardinality::Many
}

impl Registry {
    /// The process-wide registry of SAML metadata types.
    pub fn builtin() -> sync::Arc<Registry> {
        BUILTIN.clone()
    }

    pub fn from_toml(table: &str) -> Result<Registry, SchemaError> {
        let raw: RawTable = toml::from_str(table)?;

        let mut namespaces: Vec<Namespace> = Vec::new();
        for ns in raw.namespaces {
            if namespaces.iter().any(|existing| existing.prefix == ns.prefix || existing.uri == ns.uri) {
                return Err(SchemaError::DuplicateNamespace(ns.prefix));
            }
            namespaces.push(ns);
        }

        if !namespaces.iter().any(|ns| ns.prefix == raw.default_prefix) {
            return Err(SchemaError::UnknownDefaultPrefix(raw.default_prefix));
        }

        let mut schemas = collections::HashMap::new();
        let mut order = Vec::new();

        for ty in raw.types {
            match schema::split_prefix(&ty.tag).0 {
                Some(prefix) if namespaces.iter().any(|ns| ns.prefix == prefix) => {},
                _ => return Err(SchemaError::UnknownPrefix { tag: ty.tag }),
            }

            let mut attributes = Vec::with_capacity(ty.attributes.len());
            for attr in ty.attributes {
                let allowed_values = match &attr.choices {
                    Some(name) => match raw.choices.get(name) {
                        Some(list) => Some(list.clone()),
                        None => return Err(SchemaError::UnknownChoices {
                            tag: ty.tag,
                            attribute: attr.name,
                            choices: name.clone(),
                        }),
                    },
                    None => None,
                };

                attributes.push(schema::AttributeSpec {
                    display_name: attr.display_name.unwrap_or_else(|| attr.name.clone()),
                    name: attr.name,
                    allowed_values,
                    required: attr.required,
                    default_value: attr.default,
                    format: attr.format,
                });
            }

            let mut child_slots: Vec<schema::ChildSlotSpec> = Vec::with_capacity(ty.children.len());
            for slot in ty.children {
                if child_slots.iter().any(|existing| existing.tag == slot.tag) {
                    return Err(SchemaError::DuplicateSlot { tag: ty.tag, child: slot.tag });
                }

                if slot.cardinality.max().is_some_and(|max| slot.min_occurs as usize > max) {
                    return Err(SchemaError::MinOccursTooLarge { tag: ty.tag, child: slot.tag });
                }

                child_slots.push(schema::ChildSlotSpec {
                    tag: slot.tag,
                    cardinality: slot.cardinality,
                    min_occurs: slot.min_occurs,
                });
            }

            let node_schema = schema::NodeSchema {
                display_name: ty.display_name.unwrap_or_else(|| schema::split_prefix(&ty.tag).1.to_string()),
                tag: ty.tag.clone(),
                child_slots,
                attributes,
                text: ty.text,
            };

            if schemas.insert(ty.tag.clone(), sync::Arc::new(node_schema)).is_some() {
                return Err(SchemaError::DuplicateType(ty.tag));
            }

            order.push(ty.tag);
        }

        /* Every slot has to name a type we can actually construct. */
        for tag in &order {
            for slot in &schemas[tag].child_slots {
                if !schemas.contains_key(&slot.tag) {
                    return Err(SchemaError::UnknownChildType { tag: tag.clone(), child: slot.tag.clone() });
                }
            }
        }

        event!(Level::DEBUG, "built schema registry with {} types", order.len());

        Ok(Registry {
            default_prefix: raw.default_prefix,
            namespaces,
            schemas,
            order,
        })
    }

    pub fn default_prefix(&self) -> &str {
        &self.default_prefix
    }

    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    pub fn prefix_for_uri(&self, uri: &str) -> Option<&str> {
        self.namespaces.iter().find(|ns| ns.uri == uri).map(|ns| ns.prefix.as_str())
    }

    pub fn uri_for_prefix(&self, prefix: &str) -> Option<&str> {
        self.namespaces.iter().find(|ns| ns.prefix == prefix).map(|ns| ns.uri.as_str())
    }

    /// Qualifies a bare local name with the default prefix. Names that
    /// already carry a prefix are returned unchanged.
    pub fn normalize<'a>(&self, tag: &'a str) -> borrow::Cow<'a, str> {
        if tag.contains(':') {
            borrow::Cow::Borrowed(tag)
        } else {
            borrow::Cow::Owned(format!("{}:{}", self.default_prefix, tag))
        }
    }

    pub fn schema_for(&self, tag: &str) -> Result<&sync::Arc<schema::NodeSchema>, UnknownType> {
        let tag = self.normalize(tag);
        self.schemas.get(tag.as_ref()).ok_or_else(|| UnknownType(tag.into_owned()))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.schemas.contains_key(self.normalize(tag).as_ref())
    }

    /// Builds a node with the default shape for `tag`.
    pub fn create(&self, tag: &str) -> Result<node::Node, UnknownType> {
        self.schema_for(tag).map(|schema| node::Node::new(schema.clone()))
    }

    /// Schemas in the order they were declared.
    pub fn schemas(&self) -> impl Iterator<Item = &sync::Arc<schema::NodeSchema>> + '_ {
        self.order.iter().map(|tag| &self.schemas[tag])
    }
}

impl fmt::Display for UnknownType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown node type '{}'", self.0)
    }
}

impl std::error::Error for UnknownType {}

impl From<toml::de::Error> for SchemaError {
    fn from(e: toml::de::Error) -> SchemaError {
        SchemaError::Toml(e)
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::Toml(e) => write!(f, "malformed schema table: {}", e),
            SchemaError::DuplicateType(tag) => write!(f, "type '{}' is declared twice", tag),
            SchemaError::DuplicateNamespace(prefix) => write!(f, "namespace '{}' is declared twice", prefix),
            SchemaError::UnknownPrefix { tag } => write!(f, "type '{}' does not use a declared namespace prefix", tag),
            SchemaError::UnknownDefaultPrefix(prefix) => write!(f, "default prefix '{}' is not a declared namespace", prefix),
            SchemaError::UnknownChoices { tag, attribute, choices } => write!(f, "attribute '{}' of '{}' refers to undeclared choice list '{}'", attribute, tag, choices),
            SchemaError::UnknownChildType { tag, child } => write!(f, "type '{}' allows child '{}', which is not declared", tag, child),
            SchemaError::DuplicateSlot { tag, child } => write!(f, "type '{}' declares child '{}' twice", tag, child),
            SchemaError::MinOccursTooLarge { tag, child } => write!(f, "singleton child '{}' of '{}' cannot require more than one occurrence", child, tag),
        }
    }
}

impl std::error::Error for SchemaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SchemaError::Toml(e) => Some(e),
            _ => None,
        }
    }
}
