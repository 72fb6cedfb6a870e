use std::fmt;
use std::sync;

use tracing::{event, instrument, Level};

use crate::model::document;
use crate::model::document::NodeId;
use crate::model::document::StructureError;
use crate::model::schema::registry;
use crate::serialization::XML_NAMESPACE;

#[derive(Debug)]
pub enum ParseError {
    Malformed(roxmltree::Error),
    /// The root element isn't a registered type.
    UnknownType(String),
    Structure(StructureError),
}

/// Builds a new document from XML text. Elements the parent's schema
/// doesn't accept are kept verbatim as passthrough markup.
#[instrument(skip_all)]
pub fn from_text(registry: &sync::Arc<registry::Registry>, source: &str) -> Result<document::Document, ParseError> {
    let xml = roxmltree::Document::parse(source)?;
    let root_element = xml.root_element();

    let tag = resolve_tag(registry, root_element).ok_or_else(|| ParseError::UnknownType(expanded_name(root_element)))?;

    let mut document = document::Document::new(registry.clone(), &tag)?;
    let root = document.root();
    fill(&mut document, root, root_element, source)?;

    event!(Level::DEBUG, "parsed {} nodes", document.len());

    Ok(document)
}

/// Registry tag for an element, or `None` if its namespace isn't one the
/// registry knows. Unqualified elements get the default prefix.
fn resolve_tag(registry: &registry::Registry, xml: roxmltree::Node) -> Option<String> {
    let name = xml.tag_name();
    match name.namespace() {
        Some(uri) => registry.prefix_for_uri(uri).map(|prefix| format!("{}:{}", prefix, name.name())),
        None => Some(registry.normalize(name.name()).into_owned()),
    }
}

fn resolve_attribute(registry: &registry::Registry, attr: &roxmltree::Attribute) -> Option<String> {
    match attr.namespace() {
        Some(XML_NAMESPACE) => Some(format!("xml:{}", attr.name())),
        Some(uri) => registry.prefix_for_uri(uri).map(|prefix| format!("{}:{}", prefix, attr.name())),
        None => Some(attr.name().to_string()),
    }
}

fn expanded_name(xml: roxmltree::Node) -> String {
    let name = xml.tag_name();
    match name.namespace() {
        Some(uri) => format!("{{{}}}{}", uri, name.name()),
        None => name.name().to_string(),
    }
}

/// Copies attributes, text and children from `xml` into the node `id`.
fn fill(document: &mut document::Document, id: NodeId, xml: roxmltree::Node, source: &str) -> Result<(), ParseError> {
    let schema = document.node(id)?.schema().clone();

    /* the markup is authoritative; attributes it leaves out are empty, not defaulted */
    for spec in &schema.attributes {
        document.set_attribute(id, &spec.name, String::new())?;
    }

    for attr in xml.attributes() {
        match resolve_attribute(document.registry(), &attr) {
            Some(name) if schema.attribute_index(&name).is_some() => document.set_attribute(id, &name, attr.value().to_string())?,
            _ => event!(Level::DEBUG, "ignoring attribute {} on {}", attr.name(), schema.tag),
        }
    }

    if schema.has_text() {
        let text = xml.children().find(|c| c.is_text()).and_then(|c| c.text());
        document.set_text(id, text.map(str::to_string))?;
    }

    for child in xml.children() {
        if child.is_element() {
            let tag = resolve_tag(document.registry(), child)
                .filter(|tag| schema.slot_index(tag).is_some());

            match tag {
                Some(tag) if !document.slot_full(id, &tag)? => {
                    let child_id = document.create(&tag)?;
                    fill(document, child_id, child, source)?;
                    document.add_child(id, child_id)?;
                },
                _ => {
                    event!(Level::DEBUG, "keeping {} under {} as passthrough", expanded_name(child), schema.tag);
                    let markup = passthrough(document.registry(), child, source);
                    document.add_passthrough(id, markup)?;
                },
            }
        } else if child.is_comment() || child.is_pi() {
            event!(Level::DEBUG, "dropping comment or processing instruction under {}", schema.tag);
        } else if !schema.has_text() && child.text().is_some_and(|t| !t.trim().is_empty()) {
            event!(Level::DEBUG, "ignoring text under {}", schema.tag);
        }
    }

    Ok(())
}

/// The element's source markup, with declarations added for namespaces it
/// inherits and that the emitted document won't declare for it.
fn passthrough(registry: &registry::Registry, xml: roxmltree::Node, source: &str) -> String {
    let markup = &source[xml.range()];

    let inherited: Vec<&roxmltree::Namespace> = match xml.parent_element() {
        Some(parent) => xml.namespaces()
            .filter(|ns| parent.namespaces().any(|p| p.name() == ns.name() && p.uri() == ns.uri()))
            .collect(),
        None => Vec::new(),
    };

    let own = declared_prefixes(markup);

    let mut declarations = String::new();
    for ns in inherited.into_iter().filter(|ns| !own.iter().any(|prefix| *prefix == ns.name())) {
        match ns.name() {
            Some("xml") => {},
            /* the root element will declare registry namespaces under their usual prefix */
            Some(prefix) if registry.uri_for_prefix(prefix) == Some(ns.uri()) => {},
            Some(prefix) if markup.contains(&format!("{}:", prefix)) => {
                declarations.push_str(&format!(" xmlns:{}=\"{}\"", prefix, super::emit::escape_attribute(ns.uri())));
            },
            Some(_) => {},
            None => declarations.push_str(&format!(" xmlns=\"{}\"", super::emit::escape_attribute(ns.uri()))),
        }
    }

    if declarations.is_empty() {
        return markup.to_string();
    }

    /* declarations go right after the element name */
    let name_end = markup[1..]
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .map_or(markup.len(), |i| i + 1);

    let mut markup = markup.to_string();
    markup.insert_str(name_end, &declarations);
    markup
}

/// Namespace prefixes declared on the start tag of `markup` itself, with
/// `None` for a default namespace declaration. `markup` is known to be
/// well-formed.
fn declared_prefixes(markup: &str) -> Vec<Option<&str>> {
    let mut prefixes = Vec::new();

    let Some(mut rest) = markup.strip_prefix('<') else {
        return prefixes;
    };
    rest = rest.trim_start_matches(|c: char| !c.is_whitespace() && c != '/' && c != '>');

    loop {
        rest = rest.trim_start();
        if rest.is_empty() || rest.starts_with('/') || rest.starts_with('>') {
            break;
        }

        let Some(eq) = rest.find('=') else {
            break;
        };
        let name = rest[..eq].trim_end();

        let value = rest[eq + 1..].trim_start();
        let Some(quote) = value.chars().next() else {
            break;
        };
        let Some(close) = value[1..].find(quote) else {
            break;
        };
        rest = &value[close + 2..];

        if name == "xmlns" {
            prefixes.push(None);
        } else if let Some(prefix) = name.strip_prefix("xmlns:") {
            prefixes.push(Some(prefix));
        }
    }

    prefixes
}

impl From<roxmltree::Error> for ParseError {
    fn from(e: roxmltree::Error) -> ParseError {
        ParseError::Malformed(e)
    }
}

impl From<StructureError> for ParseError {
    fn from(e: StructureError) -> ParseError {
        match e {
            StructureError::UnknownType(tag) => ParseError::UnknownType(tag),
            e => ParseError::Structure(e),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Malformed(e) => write!(f, "malformed markup: {}", e),
            ParseError::UnknownType(tag) => write!(f, "unknown root element '{}'", tag),
            ParseError::Structure(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Malformed(e) => Some(e),
            ParseError::Structure(e) => Some(e),
            ParseError::UnknownType(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use crate::model::document::node::Slot;
    use crate::model::schema::Registry;
    use crate::serialization;

    fn parse(source: &str) -> document::Document {
        from_text(&Registry::builtin(), source).unwrap()
    }

    #[test]
    fn test_organization_example() {
        let doc = parse(r#"<Organization><OrganizationName xml:lang="en">Example</OrganizationName></Organization>"#);
        let root = doc.root();

        assert_eq!(doc.node(root).unwrap().tag(), "md:Organization");

        let names = doc.children_tagged(root, "OrganizationName");
        assert_eq!(names.len(), 1);

        let name = doc.node(names[0]).unwrap();
        assert_eq!(name.text(), Some("Example"));
        assert_eq!(name.attribute("xml:lang"), Some("en"));
        assert_eq!(name.parent(), Some(root));
    }

    #[test]
    fn test_namespaces_map_to_registry_prefixes() {
        let doc = parse(r#"<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata" xmlns:ui="urn:oasis:names:tc:SAML:metadata:ui" entityID="https://example.org/idp">
  <Extensions>
    <ui:UIInfo><ui:DisplayName xml:lang="en">Example IdP</ui:DisplayName></ui:UIInfo>
  </Extensions>
</EntityDescriptor>"#);
        let root = doc.root();

        let ext = doc.first_child_tagged(root, "md:Extensions").unwrap();
        let ui = doc.first_child_tagged(ext, "mdui:UIInfo").unwrap();
        let name = doc.first_child_tagged(ui, "mdui:DisplayName").unwrap();
        assert_eq!(doc.node(name).unwrap().text(), Some("Example IdP"));
        assert!(doc.node(ext).unwrap().passthrough().is_empty());
    }

    #[test]
    fn test_unknown_attributes_are_ignored_and_defaults_cleared() {
        let doc = parse(r#"<IDPSSODescriptor colour="blue" WantAuthnRequestsSigned="true"/>"#);
        let root = doc.node(doc.root()).unwrap();

        assert_eq!(root.attribute("colour"), None);
        assert_eq!(root.attribute("WantAuthnRequestsSigned"), Some("true"));
        assert_eq!(root.attribute("protocolSupportEnumeration"), Some(""));
    }

    #[test]
    fn test_unknown_children_become_passthrough() {
        let source = r#"<md:Extensions xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" xmlns:foo="urn:foo"><foo:Thing a="1"><foo:Inner/></foo:Thing><!-- note --><md:Bogus/></md:Extensions>"#;
        let doc = parse(source);
        let root = doc.node(doc.root()).unwrap();

        assert_eq!(root.passthrough(), &[
            r#"<foo:Thing xmlns:foo="urn:foo" a="1"><foo:Inner/></foo:Thing>"#.to_string(),
            r#"<md:Bogus/>"#.to_string(),
        ]);
        assert!(!root.has_children());

        /* passthrough survives another round */
        let text = serialization::to_text(&doc, doc.root(), 0).unwrap();
        let again = parse(&text);
        assert_eq!(serialization::to_text(&again, again.root(), 0).unwrap(), text);
    }

    #[test]
    fn test_default_namespace_is_kept_for_passthrough() {
        let doc = parse(r#"<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata" entityID="https://example.org/sp"><Signature/></EntityDescriptor>"#);
        let root = doc.node(doc.root()).unwrap();

        assert_eq!(root.passthrough(), &[r#"<Signature xmlns="urn:oasis:names:tc:SAML:2.0:metadata"/>"#.to_string()]);
    }

    #[test]
    fn test_redeclared_namespace_is_not_declared_twice() {
        let doc = parse(concat!(
            r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" xmlns:alg="urn:oasis:names:tc:SAML:metadata:algsupport" entityID="https://example.org/sp">"#,
            r#"<md:Extensions><alg:DigestMethod xmlns:alg="urn:oasis:names:tc:SAML:metadata:algsupport" Algorithm="a"/></md:Extensions>"#,
            r#"</md:EntityDescriptor>"#));
        let ext = doc.first_child_tagged(doc.root(), "Extensions").unwrap();

        assert_eq!(doc.node(ext).unwrap().passthrough(), &[
            r#"<alg:DigestMethod xmlns:alg="urn:oasis:names:tc:SAML:metadata:algsupport" Algorithm="a"/>"#.to_string(),
        ]);

        let text = serialization::to_text(&doc, doc.root(), 0).unwrap();
        let again = parse(&text);
        assert_eq!(serialization::to_text(&again, again.root(), 0).unwrap(), text);
    }

    #[test]
    fn test_redeclared_default_namespace_is_not_declared_twice() {
        let doc = parse(r#"<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata" entityID="https://example.org/sp"><Signature xmlns = 'urn:oasis:names:tc:SAML:2.0:metadata' a="x>y"/></EntityDescriptor>"#);
        let root = doc.node(doc.root()).unwrap();

        assert_eq!(root.passthrough(), &[r#"<Signature xmlns = 'urn:oasis:names:tc:SAML:2.0:metadata' a="x>y"/>"#.to_string()]);

        let text = serialization::to_text(&doc, doc.root(), 0).unwrap();
        let again = parse(&text);
        assert_eq!(serialization::to_text(&again, again.root(), 0).unwrap(), text);
    }

    #[test]
    fn test_declared_prefixes() {
        assert_eq!(declared_prefixes(r#"<a:b xmlns:a="urn:a" c='1>2' xmlns="urn:d"/>"#), vec![Some("a"), None]);
        assert_eq!(declared_prefixes("<plain>text</plain>"), Vec::<Option<&str>>::new());
        assert_eq!(declared_prefixes("<x y=\"xmlns:z\"/>"), Vec::<Option<&str>>::new());
    }

    #[test]
    fn test_second_singleton_becomes_passthrough() {
        let doc = parse(r#"<EntityDescriptor entityID="https://example.org/sp"><Organization/><Organization/></EntityDescriptor>"#);
        let root = doc.node(doc.root()).unwrap();

        assert_matches!(root.slot("md:Organization"), Some(Slot::One(Some(_))));
        assert_eq!(root.passthrough(), &["<Organization/>".to_string()]);
    }

    #[test]
    fn test_many_slot_keeps_document_order() {
        let doc = parse(r#"<ContactPerson contactType="technical"><EmailAddress>a@example.org</EmailAddress><GivenName>Ada</GivenName><EmailAddress>b@example.org</EmailAddress></ContactPerson>"#);
        let root = doc.root();

        let emails: Vec<&str> = doc.children_tagged(root, "EmailAddress").iter()
            .map(|id| doc.node(*id).unwrap().text().unwrap())
            .collect();
        assert_eq!(emails, vec!["a@example.org", "b@example.org"]);
        assert!(doc.first_child_tagged(root, "GivenName").is_some());
    }

    #[test]
    fn test_errors() {
        assert_matches!(from_text(&Registry::builtin(), "<EntityDescriptor>"), Err(ParseError::Malformed(_)));
        assert_matches!(from_text(&Registry::builtin(), ""), Err(ParseError::Malformed(_)));
        assert_matches!(from_text(&Registry::builtin(), "<Nope/>"), Err(ParseError::UnknownType(tag)) if tag == "md:Nope");
        assert_matches!(from_text(&Registry::builtin(), r#"<x:Nope xmlns:x="urn:x"/>"#), Err(ParseError::UnknownType(tag)) if tag == "{urn:x}Nope");
    }

    #[test]
    fn test_fixture_round_trip() {
        let source = include_str!("../../testdata/sp-metadata.xml");
        let doc = parse(source);
        let root = doc.root();

        assert_eq!(doc.node(root).unwrap().attribute("entityID"), Some("https://sp.example.org/shibboleth"));
        assert_eq!(doc.children_tagged(root, "SPSSODescriptor").len(), 1);
        assert_eq!(doc.children_tagged(root, "ContactPerson").len(), 2);

        let first = serialization::to_text(&doc, root, 2).unwrap();
        let reparsed = parse(&first);
        assert_eq!(serialization::to_text(&reparsed, reparsed.root(), 2).unwrap(), first);
    }
}
