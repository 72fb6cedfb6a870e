//! Read-only digest of an entity descriptor: who it is, what it can do and
//! how to reach the people behind it.

use std::fmt;

use tracing::{event, Level};

use crate::model::document;
use crate::model::document::NodeId;

const DEFAULT_KEY_USE: &str = "signing and encryption";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Idp,
    Sp,
    Both,
    None,
}

/// Organization details in one language.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrganizationInfo {
    pub lang: String,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contact {
    pub contact_type: String,
    pub company: Option<String>,
    pub given_name: Option<String>,
    pub sur_name: Option<String>,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub key_use: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub kind: String,
    pub binding: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logo {
    pub lang: String,
    pub width: String,
    pub height: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeolocationHint {
    pub latitude: String,
    pub longitude: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityAttribute {
    pub name: String,
    pub name_format: String,
    pub friendly_name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub entity_id: String,
    pub valid_until: Option<chrono::DateTime<chrono::Utc>>,
    pub organization: Vec<OrganizationInfo>,
    pub contacts: Vec<Contact>,
    pub certificates: Vec<Certificate>,
    pub endpoints: Vec<Endpoint>,
    pub role: Role,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub logos: Vec<Logo>,
    pub geolocation_hint: Option<GeolocationHint>,
    pub attributes: Vec<EntityAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryError {
    NotAnEntity(String),
}

const IDP_ENDPOINTS: &[&str] = &[
    "md:ArtifactResolutionService",
    "md:AssertionIDRequestService",
    "md:ManageNameIDService",
    "md:NameIDMappingService",
    "md:SingleLogoutService",
    "md:SingleSignOnService",
];

const SP_ENDPOINTS: &[&str] = &[
    "md:ArtifactResolutionService",
    "md:AssertionConsumerService",
    "md:ManageNameIDService",
    "md:SingleLogoutService",
];

const ORGANIZATION_FIELDS: &[(&str, fn(&mut OrganizationInfo) -> &mut Option<String>)] = &[
    ("md:OrganizationName", |info| &mut info.name),
    ("md:OrganizationDisplayName", |info| &mut info.display_name),
    ("md:OrganizationURL", |info| &mut info.url),
];

/* these live in the role's extensions */
const SP_EXTENSION_ENDPOINTS: &[&str] = &[
    "init:RequestInitiator",
    "idpdisc:DiscoveryResponse",
];

/// Tree-walking helpers over one document.
struct Reader<'a> {
    document: &'a document::Document,
}

impl<'a> Reader<'a> {
    fn children(&self, id: NodeId, tag: &str) -> &'a [NodeId] {
        self.document.children_tagged(id, tag)
    }

    /// Every node reached by following `path` from `id`.
    fn all(&self, id: NodeId, path: &[&str]) -> Vec<NodeId> {
        path.iter().fold(vec![id], |ids, tag| {
            ids.into_iter().flat_map(|id| self.children(id, tag).iter().copied()).collect()
        })
    }

    fn attribute(&self, id: NodeId, name: &str) -> Option<&'a str> {
        self.document.get(id)
            .and_then(|node| node.attribute(name))
            .filter(|value| !value.is_empty())
    }

    fn text(&self, id: NodeId) -> Option<String> {
        self.document.get(id).and_then(|node| node.text()).map(str::to_string)
    }

    fn first_text(&self, id: NodeId, tag: &str) -> Option<String> {
        self.children(id, tag).first().and_then(|child| self.text(*child))
    }

    fn texts(&self, id: NodeId, tag: &str) -> Vec<String> {
        self.children(id, tag).iter().filter_map(|child| self.text(*child)).collect()
    }

    /// Text of the `en` node among `ids`, otherwise of the first one.
    fn prefer_english(&self, ids: &[NodeId]) -> Option<String> {
        ids.iter()
            .find(|id| self.attribute(**id, "xml:lang") == Some("en"))
            .or_else(|| ids.first())
            .and_then(|id| self.text(*id))
    }
}

impl Summary {
    pub fn of(document: &document::Document) -> Result<Summary, SummaryError> {
        let root = document.root();
        let tag = document.node(root).map(|node| node.tag()).unwrap_or_default();
        if tag != "md:EntityDescriptor" {
            return Err(SummaryError::NotAnEntity(tag.to_string()));
        }

        let r = Reader { document };

        let role = match (r.children(root, "md:IDPSSODescriptor").is_empty(), r.children(root, "md:SPSSODescriptor").is_empty()) {
            (false, false) => Role::Both,
            (false, true) => Role::Idp,
            (true, false) => Role::Sp,
            (true, true) => Role::None,
        };

        /* the SP's user interface info only counts for pure SPs */
        let ui_role = match role {
            Role::Sp => "md:SPSSODescriptor",
            _ => "md:IDPSSODescriptor",
        };
        let ui = r.all(root, &[ui_role, "md:Extensions", "mdui:UIInfo"]);

        let summary = Summary {
            entity_id: r.attribute(root, "entityID").unwrap_or_default().to_string(),
            valid_until: r.attribute(root, "validUntil").and_then(parse_instant),
            organization: organization(&r, root),
            contacts: contacts(&r, root),
            certificates: certificates(&r, root),
            endpoints: endpoints(&r, root),
            role,
            display_name: r.prefer_english(&ui.iter().flat_map(|id| r.children(*id, "mdui:DisplayName").iter().copied()).collect::<Vec<_>>()),
            description: r.prefer_english(&ui.iter().flat_map(|id| r.children(*id, "mdui:Description").iter().copied()).collect::<Vec<_>>()),
            logos: logos(&r, root),
            geolocation_hint: geolocation_hint(&r, root),
            attributes: attributes(&r, root),
        };

        event!(Level::DEBUG, "summarized {} ({:?})", summary.entity_id, summary.role);

        Ok(summary)
    }

    /// Whether `validUntil` lies before `now`. Entities without a usable
    /// `validUntil` never expire.
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.valid_until.is_some_and(|valid_until| now > valid_until)
    }

    /// English name if there is one, otherwise the first name given.
    pub fn organization_name(&self) -> Option<&str> {
        self.organization.iter()
            .find(|org| org.lang == "en" && org.name.is_some())
            .or_else(|| self.organization.iter().find(|org| org.name.is_some()))
            .and_then(|org| org.name.as_deref())
    }

    /// Whether the entity ID is an http(s) URL that metadata could be
    /// refreshed from.
    pub fn is_metarefreshable(&self) -> bool {
        match url::Url::parse(&self.entity_id) {
            Ok(url) => url.scheme().starts_with("http")
                && url.host_str().is_some_and(|host| host.split('.').next().is_some_and(|label| !label.is_empty())),
            Err(_) => false,
        }
    }
}

fn parse_instant(value: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%SZ")
        .ok()
        .map(|instant| instant.and_utc())
}

fn organization(r: &Reader, root: NodeId) -> Vec<OrganizationInfo> {
    let mut languages: Vec<OrganizationInfo> = Vec::new();

    for org in r.children(root, "md:Organization") {
        for (tag, field) in ORGANIZATION_FIELDS {
            for node in r.children(*org, tag) {
                /* the language is required; skip nodes without one */
                let Some(lang) = r.attribute(*node, "xml:lang") else {
                    continue;
                };

                let index = match languages.iter().position(|info| info.lang == lang) {
                    Some(index) => index,
                    None => {
                        languages.push(OrganizationInfo { lang: lang.to_string(), ..Default::default() });
                        languages.len() - 1
                    },
                };

                *field(&mut languages[index]) = r.text(*node);
            }
        }
    }

    languages
}

fn contacts(r: &Reader, root: NodeId) -> Vec<Contact> {
    r.children(root, "md:ContactPerson").iter().map(|contact| Contact {
        contact_type: r.attribute(*contact, "contactType").unwrap_or_default().to_string(),
        company: r.first_text(*contact, "md:Company"),
        given_name: r.first_text(*contact, "md:GivenName"),
        sur_name: r.first_text(*contact, "md:SurName"),
        emails: r.texts(*contact, "md:EmailAddress"),
        phones: r.texts(*contact, "md:TelephoneNumber"),
    }).collect()
}

fn certificates(r: &Reader, root: NodeId) -> Vec<Certificate> {
    let mut result = Vec::new();

    for role in ["md:IDPSSODescriptor", "md:SPSSODescriptor"] {
        for key in r.all(root, &[role, "md:KeyDescriptor"]) {
            let key_use = r.attribute(key, "use").unwrap_or(DEFAULT_KEY_USE);

            for cert in r.all(key, &["ds:KeyInfo", "ds:X509Data", "ds:X509Certificate"]) {
                result.push(Certificate {
                    key_use: key_use.to_string(),
                    text: r.text(cert).unwrap_or_default(),
                });
            }
        }
    }

    result
}

fn endpoints(r: &Reader, root: NodeId) -> Vec<Endpoint> {
    let mut result = Vec::new();

    let mut collect = |parents: Vec<NodeId>, tags: &[&str]| {
        for tag in tags {
            let kind = r.document.registry().schema_for(tag)
                .map(|schema| schema.display_name.clone())
                .unwrap_or_else(|_| tag.to_string());

            for parent in &parents {
                for endpoint in r.children(*parent, tag) {
                    result.push(Endpoint {
                        kind: kind.clone(),
                        binding: r.attribute(*endpoint, "Binding").unwrap_or_default().to_string(),
                        location: r.attribute(*endpoint, "Location").unwrap_or_default().to_string(),
                    });
                }
            }
        }
    };

    collect(r.all(root, &["md:IDPSSODescriptor"]), IDP_ENDPOINTS);
    collect(r.all(root, &["md:SPSSODescriptor"]), SP_ENDPOINTS);
    collect(r.all(root, &["md:SPSSODescriptor", "md:Extensions"]), SP_EXTENSION_ENDPOINTS);

    result
}

fn logos(r: &Reader, root: NodeId) -> Vec<Logo> {
    let mut result: Vec<Logo> = Vec::new();

    for logo in r.all(root, &["md:SPSSODescriptor", "md:Extensions", "mdui:UIInfo", "mdui:Logo"]) {
        let Some(lang) = r.attribute(logo, "xml:lang") else {
            continue;
        };

        let entry = Logo {
            lang: lang.to_string(),
            width: r.attribute(logo, "width").unwrap_or_default().to_string(),
            height: r.attribute(logo, "height").unwrap_or_default().to_string(),
            location: r.text(logo).unwrap_or_default(),
        };

        /* one logo per language; the last one wins */
        match result.iter_mut().find(|existing| existing.lang == lang) {
            Some(existing) => *existing = entry,
            None => result.push(entry),
        }
    }

    result
}

fn geolocation_hint(r: &Reader, root: NodeId) -> Option<GeolocationHint> {
    let hint = r.all(root, &["md:SPSSODescriptor", "md:Extensions", "mdui:DiscoHints", "mdui:GeolocationHint"])
        .into_iter()
        .find_map(|id| r.text(id))?;

    let coordinates = hint.trim().strip_prefix("geo:").unwrap_or(hint.trim());
    let mut parts = coordinates.split(',');

    match (parts.next(), parts.next()) {
        (Some(latitude), Some(longitude)) => Some(GeolocationHint {
            latitude: latitude.to_string(),
            /* drop any altitude or uncertainty suffix */
            longitude: longitude.split(';').next().unwrap_or(longitude).to_string(),
        }),
        _ => None,
    }
}

fn attributes(r: &Reader, root: NodeId) -> Vec<EntityAttribute> {
    r.all(root, &["md:Extensions", "mdattr:EntityAttributes", "saml:Attribute"]).into_iter().map(|attr| EntityAttribute {
        name: r.attribute(attr, "Name").unwrap_or_default().to_string(),
        name_format: r.attribute(attr, "NameFormat").unwrap_or_default().to_string(),
        friendly_name: r.attribute(attr, "FriendlyName").unwrap_or_default().to_string(),
        values: r.texts(attr, "saml:AttributeValue"),
    }).collect()
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Idp => write!(f, "IdP"),
            Role::Sp => write!(f, "SP"),
            Role::Both => write!(f, "IdP and SP"),
            Role::None => write!(f, "none"),
        }
    }
}

impl fmt::Display for SummaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummaryError::NotAnEntity(tag) => write!(f, "expected an md:EntityDescriptor at the root, found '{}'", tag),
        }
    }
}

impl std::error::Error for SummaryError {}
