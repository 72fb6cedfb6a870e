//! Conversion between documents and namespaced XML text.

pub mod emit;
pub mod parse;

use crate::model::document;

pub use emit::SerializeError;
pub use emit::Serializer;
pub use parse::from_text;
pub use parse::ParseError;

pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Emits the subtree at `node` with `indent` spaces per level. Invalid content
/// is still emitted; only a missing node is an error.
pub fn to_text(document: &document::Document, node: document::NodeId, indent: usize) -> Result<String, SerializeError> {
    Serializer::new(indent).to_text(document, node)
}
