//! Declarative validation of node content.
//!
//! Rules come entirely from the node's schema: required attributes and text,
//! value formats, enumerated choices and minimum child counts. Validation
//! never fails; it produces a [Report] that callers display or ignore.

use std::collections;
use std::fmt;

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::document::node;
use crate::model::schema;

static DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)?$").unwrap()
});

static DATETIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?Z$").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Attribute(String),
    Text,
    /// Minimum occurrence of the child slot with this tag.
    Slot(String),
}

/// Field-to-message mapping for one node. Empty when the node is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    errors: collections::BTreeMap<Field, String>,
}

impl Report {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn get(&self, field: &Field) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.get(&Field::Attribute(name.to_string()))
    }

    pub fn text(&self) -> Option<&str> {
        self.get(&Field::Text)
    }

    pub fn slot(&self, tag: &str) -> Option<&str> {
        self.get(&Field::Slot(tag.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Field, &str)> + '_ {
        self.errors.iter().map(|(field, message)| (field, message.as_str()))
    }

    fn insert(&mut self, field: Field, message: String) {
        self.errors.insert(field, message);
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Attribute(name) => write!(f, "@{}", name),
            Field::Text => write!(f, "text()"),
            Field::Slot(tag) => write!(f, "{}", tag),
        }
    }
}

/// Runs every rule the node's schema declares.
pub fn check(node: &node::Node) -> Report {
    let mut report = Report::default();

    for (spec, value) in node.attributes() {
        if let Err(message) = check_value(value, spec.required, spec.format, spec.allowed_values.as_deref()) {
            report.insert(Field::Attribute(spec.name.clone()), message);
        }
    }

    if let Some(text_spec) = &node.schema().text {
        if let Err(message) = check_value(node.text().unwrap_or(""), text_spec.required, text_spec.format, None) {
            report.insert(Field::Text, message);
        }
    }

    for (spec, slot) in node.slots() {
        if (slot.len() as u64) < spec.min_occurs as u64 {
            let message = match spec.min_occurs {
                1 => format!("At least one {} is required", spec.tag),
                n => format!("At least {} {} are required", n, spec.tag),
            };
            report.insert(Field::Slot(spec.tag.clone()), message);
        }
    }

    report
}

fn check_value(value: &str, required: bool, format: Option<schema::Format>, choices: Option<&[schema::Choice]>) -> Result<(), String> {
    if value.trim().is_empty() {
        return if required {
            Err("This field is required".to_string())
        } else {
            Ok(())
        };
    }

    if let Some(choices) = choices {
        if !choices.iter().any(|choice| choice.value == value) {
            return Err(format!("Value must be one of: {}", choices.iter().map(|choice| &choice.value).join(", ")));
        }
    }

    match format {
        Some(format) => check_format(format, value),
        None => Ok(()),
    }
}

/// Checks a non-empty value against one of the built-in formats.
pub fn check_format(format: schema::Format, value: &str) -> Result<(), String> {
    let ok = match format {
        schema::Format::Url => is_url(value),
        schema::Format::Duration => is_duration(value),
        schema::Format::DateTime => is_utc_datetime(value),
        schema::Format::Integer => value.parse::<i64>().is_ok(),
    };

    if ok {
        Ok(())
    } else {
        Err(match format {
            schema::Format::Url => "Not a valid URL".to_string(),
            schema::Format::Duration => "Not a valid duration (expected ISO 8601, e.g. PT6H)".to_string(),
            schema::Format::DateTime => "Not a valid UTC date and time (expected YYYY-MM-DDThh:mm:ssZ)".to_string(),
            schema::Format::Integer => "Not a valid integer".to_string(),
        })
    }
}

fn is_url(value: &str) -> bool {
    match url::Url::parse(value) {
        /* http(s) URLs have to name a host */
        Ok(url) => !url.scheme().starts_with("http") || url.host().is_some(),
        Err(_) => false,
    }
}

fn is_duration(value: &str) -> bool {
    match DURATION.captures(value) {
        /* at least one component, and no dangling time designator */
        Some(captures) => captures.iter().skip(1).any(|c| c.is_some()) && !value.ends_with('T'),
        None => false,
    }
}

fn is_utc_datetime(value: &str) -> bool {
    DATETIME.is_match(value) && chrono::DateTime::parse_from_rfc3339(value).is_ok()
}
