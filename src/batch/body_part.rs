//! One logical sub-request of a `$batch` body

use axum::http::Method;
use indexmap::IndexMap;

/// Where a part sits inside a changeset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesetPosition {
    pub boundary: String,
    pub start: bool,
    pub end: bool,
}

/// A parsed sub-request. Built by the parser, read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyPart {
    method: Method,
    headers: IndexMap<String, String>,
    uri: String,
    entity_set_name: String,
    entity_key: Option<String>,
    body: String,
    request_query: Option<String>,
    links: bool,
    navigation_property: Option<String>,
    target_entity_set_name: Option<String>,
    target_entity_key: Option<String>,
    changeset: Option<ChangesetPosition>,
}

impl BodyPart {
    pub fn new(method: Method, uri: impl Into<String>, entity_set_name: impl Into<String>) -> Self {
        Self {
            method,
            headers: IndexMap::new(),
            uri: uri.into(),
            entity_set_name: entity_set_name.into(),
            entity_key: None,
            body: String::new(),
            request_query: None,
            links: false,
            navigation_property: None,
            target_entity_set_name: None,
            target_entity_key: None,
            changeset: None,
        }
    }

    pub fn with_key(mut self, key: Option<String>) -> Self {
        self.entity_key = key;
        self
    }

    pub fn with_headers(mut self, headers: IndexMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_query(mut self, query: Option<String>) -> Self {
        self.request_query = query;
        self
    }

    /// `Set('key')/$links/[_]Target[('key')]`. The navigation property is
    /// always the `_`-prefixed name.
    pub fn as_links(mut self, target: String, target_key: Option<String>) -> Self {
        let target_set = strip_navigation_prefix(&target);
        self.links = true;
        self.navigation_property = Some(format!("_{}", target_set));
        self.target_entity_set_name = Some(target_set);
        self.target_entity_key = target_key;
        self
    }

    /// `Set('key')/_Nav[('key')]`. `navigation_property` keeps any key suffix.
    pub fn as_navigation(
        mut self,
        navigation_property: String,
        target_entity_set_name: String,
        target_key: Option<String>,
    ) -> Self {
        self.navigation_property = Some(navigation_property);
        self.target_entity_set_name = Some(target_entity_set_name);
        self.target_entity_key = target_key;
        self
    }

    pub fn in_changeset(mut self, boundary: impl Into<String>, start: bool, end: bool) -> Self {
        self.changeset = Some(ChangesetPosition {
            boundary: boundary.into(),
            start,
            end,
        });
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &IndexMap<String, String> {
        &self.headers
    }

    /// Header lookup ignoring ASCII case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn entity_set_name(&self) -> &str {
        &self.entity_set_name
    }

    pub fn entity_key(&self) -> Option<&str> {
        self.entity_key.as_deref()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn request_query(&self) -> Option<&str> {
        self.request_query.as_deref()
    }

    pub fn is_links_request(&self) -> bool {
        self.links
    }

    pub fn navigation_property(&self) -> Option<&str> {
        self.navigation_property.as_deref()
    }

    /// True for navigation-property targets (not `$links`)
    pub fn has_navigation_property(&self) -> bool {
        !self.links && self.navigation_property.is_some()
    }

    /// Navigation target written with a key, e.g. `_Supplier('k')`
    pub fn navigation_has_key(&self) -> bool {
        self.has_navigation_property()
            && self.navigation_property.as_deref().is_some_and(|np| np.contains('('))
    }

    pub fn target_entity_set_name(&self) -> Option<&str> {
        self.target_entity_set_name.as_deref()
    }

    pub fn target_entity_key(&self) -> Option<&str> {
        self.target_entity_key.as_deref()
    }

    pub fn changeset(&self) -> Option<&ChangesetPosition> {
        self.changeset.as_ref()
    }

    pub fn changeset_boundary(&self) -> Option<&str> {
        self.changeset.as_ref().map(|c| c.boundary.as_str())
    }

    pub fn is_changeset_start(&self) -> bool {
        self.changeset.as_ref().is_some_and(|c| c.start)
    }

    pub fn is_changeset_end(&self) -> bool {
        self.changeset.as_ref().is_some_and(|c| c.end)
    }

    /// The kind of create this part performs, if any
    pub fn create_kind(&self) -> Option<CreateKind> {
        if self.method != Method::POST || self.links {
            return None;
        }
        if self.navigation_property.is_some() {
            Some(CreateKind::Navigation)
        } else {
            Some(CreateKind::Plain)
        }
    }
}

/// Creates are buffered per kind; a change of kind forces a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateKind {
    Plain,
    Navigation,
}

fn strip_navigation_prefix(navigation_property: &str) -> String {
    navigation_property
        .strip_prefix('_')
        .unwrap_or(navigation_property)
        .to_string()
}
