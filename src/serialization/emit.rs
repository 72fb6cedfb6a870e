use std::borrow;
use std::collections;
use std::fmt;

use itertools::Itertools;
use tracing::{event, instrument, Level};

use crate::config;
use crate::model::document;
use crate::model::document::NodeId;
use crate::model::schema;
use crate::model::schema::registry;
use crate::model::validation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Serializer {
    /// Spaces per nesting level. Zero puts the whole document on one line.
    pub indent: usize,
    /// Refuse to emit trees that fail validation.
    pub strict: bool,
    /// Declare every registry namespace on the outermost element, not just the
    /// ones in use.
    pub declare_all_namespaces: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializeError {
    NoSuchNode(NodeId),
    Invalid { node: NodeId, tag: String, report: validation::Report },
}

impl Default for Serializer {
    fn default() -> Serializer {
        Serializer::new(2)
    }
}

impl Serializer {
    pub fn new(indent: usize) -> Serializer {
        Serializer {
            indent,
            strict: false,
            declare_all_namespaces: false,
        }
    }

    pub fn from_config(config: &config::Config) -> Serializer {
        Serializer {
            indent: config.indent,
            strict: config.strict_output,
            declare_all_namespaces: config.declare_all_namespaces,
        }
    }

    #[instrument(skip(self, document))]
    pub fn to_text(&self, document: &document::Document, node: NodeId) -> Result<String, SerializeError> {
        if !document.contains(node) {
            return Err(SerializeError::NoSuchNode(node));
        }

        for (id, n) in document.descendants(node) {
            let report = validation::check(n);
            if report.is_valid() {
                continue;
            }

            if self.strict {
                return Err(SerializeError::Invalid {
                    node: id,
                    tag: n.tag().to_string(),
                    report,
                });
            }

            event!(Level::WARN, "emitting invalid {} {}: {}", n.tag(), id, describe(&report));
        }

        let declarations = self.declarations(document, node);

        let mut out = String::new();
        self.emit(document, node, 0, false, &declarations, &mut out);
        Ok(out)
    }

    fn declarations<'a>(&self, document: &'a document::Document, node: NodeId) -> Vec<&'a registry::Namespace> {
        let registry = document.registry();

        if self.declare_all_namespaces {
            return registry.namespaces().iter().collect();
        }

        let mut used = collections::HashSet::new();
        for (_, n) in document.descendants(node) {
            used.extend(schema::split_prefix(n.tag()).0);

            for (spec, value) in n.attributes() {
                if !value.is_empty() {
                    used.extend(schema::split_prefix(&spec.name).0);
                }
            }

            for blob in n.passthrough() {
                for ns in registry.namespaces() {
                    if blob.contains(&format!("{}:", ns.prefix)) {
                        used.insert(ns.prefix.as_str());
                    }
                }
            }
        }

        registry.namespaces().iter().filter(|ns| used.contains(ns.prefix.as_str())).collect()
    }

    fn emit(&self, document: &document::Document, id: NodeId, depth: usize, inline: bool, declarations: &[&registry::Namespace], out: &mut String) {
        let Some(node) = document.get(id) else {
            return;
        };

        let pretty = !inline && self.indent > 0;
        if pretty {
            out.extend(std::iter::repeat(' ').take(depth * self.indent));
        }

        out.push('<');
        out.push_str(node.tag());

        for ns in declarations {
            out.push_str(&format!(" xmlns:{}=\"{}\"", ns.prefix, escape_attribute(&ns.uri)));
        }

        for (spec, value) in node.attributes() {
            if !value.is_empty() {
                out.push_str(&format!(" {}=\"{}\"", spec.name, escape_attribute(value)));
            }
        }

        let text = node.text().filter(|text| !text.is_empty());

        if text.is_none() && !node.has_children() && node.passthrough().is_empty() {
            out.push_str("/>");
        } else {
            out.push('>');

            /* whitespace inside text-bearing elements would change their text */
            let inner_inline = !pretty || node.schema().has_text();

            if let Some(text) = text {
                out.push_str(&escape_text(text));
            }

            if !inner_inline {
                out.push('\n');
            }

            for child in node.children() {
                self.emit(document, child, depth + 1, inner_inline, &[], out);
            }

            for blob in node.passthrough() {
                if !inner_inline {
                    out.extend(std::iter::repeat(' ').take((depth + 1) * self.indent));
                }
                out.push_str(blob);
                if !inner_inline {
                    out.push('\n');
                }
            }

            if !inner_inline {
                out.extend(std::iter::repeat(' ').take(depth * self.indent));
            }

            out.push_str("</");
            out.push_str(node.tag());
            out.push('>');
        }

        if pretty {
            out.push('\n');
        }
    }
}

fn describe(report: &validation::Report) -> String {
    report.iter().map(|(field, message)| format!("{}: {}", field, message)).join("; ")
}

pub fn escape_text(text: &str) -> borrow::Cow<'_, str> {
    if !text.contains(['&', '<', '>', '\r']) {
        return borrow::Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            /* parsers fold raw carriage returns into line feeds */
            '\r' => escaped.push_str("&#13;"),
            c => escaped.push(c),
        }
    }
    borrow::Cow::Owned(escaped)
}

pub fn escape_attribute(value: &str) -> borrow::Cow<'_, str> {
    if !value.contains(['&', '<', '>', '"', '\n', '\t', '\r']) {
        return borrow::Cow::Borrowed(value);
    }

    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\n' => escaped.push_str("&#10;"),
            '\t' => escaped.push_str("&#9;"),
            '\r' => escaped.push_str("&#13;"),
            c => escaped.push(c),
        }
    }
    borrow::Cow::Owned(escaped)
}

impl fmt::Display for SerializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializeError::NoSuchNode(id) => write!(f, "no node {}", id),
            SerializeError::Invalid { node, tag, report } => write!(f, "{} {} is invalid: {}", tag, node, describe(report)),
        }
    }
}

impl std::error::Error for SerializeError {}
