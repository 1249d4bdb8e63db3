//! # Batch body parser
//!
//! Splits a `multipart/mixed` `$batch` body into ordered [`BodyPart`]s.
//!
//! Grammar (after CRLF is normalized to LF):
//!
//! ```text
//! --B
//! Content-Type: application/http
//!
//! GET Sales('1') HTTP/1.1
//! Host: example
//!
//! --B
//! Content-Type: multipart/mixed; boundary=CS
//!
//! --CS
//! Content-Type: application/http
//!
//! POST Sales HTTP/1.1
//! Content-Type: application/json
//!
//! {"__id": "1"}
//! --CS--
//! --B--
//! ```
//!
//! Changesets nest exactly one level. Any structural problem rejects the
//! whole batch before a single part runs.

use std::sync::OnceLock;

use axum::http::Method;
use indexmap::IndexMap;
use regex::Regex;

use super::body_part::BodyPart;
use crate::errors::{codes, CoreError, CoreResult};
use crate::odata::query::parse_top;
use crate::config::ODataLimits;

const CONTENT_TYPE: &str = "Content-Type";
const APPLICATION_HTTP: &str = "application/http";
const MULTIPART_MIXED: &str = "multipart/mixed";
const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE"];

fn links_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([^\(/]+)\('([^']*)'\)/\$links/([^\(/]+)(\('([^')]*)'\))?$")
            .expect("static pattern")
    })
}

fn navigation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([^\(/]+)\('([^']*)'\)/_([^\(/]+)(\('([^')]*)'\))?$").expect("static pattern")
    })
}

fn entity_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([^\(/]+)(\('([^']*)'\))?$").expect("static pattern"))
}

fn boundary_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)boundary\s*=\s*"?([^";\s]+)"?"#).expect("static pattern")
    })
}

/// Extract the `boundary=` parameter of a multipart content type.
pub fn boundary_of(content_type: &str) -> Option<&str> {
    boundary_pattern()
        .captures(content_type)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Parser for one `$batch` request
pub struct BatchBodyParser {
    collection_uri: String,
    top_limits: ODataLimits,
    top_total: u64,
}

impl BatchBodyParser {
    /// `request_uri` is the absolute `$batch` URI; part URIs are resolved
    /// against everything before `/$batch`.
    pub fn new(request_uri: &str, top_limits: ODataLimits) -> Self {
        let collection_uri = request_uri
            .split("/$batch")
            .next()
            .unwrap_or(request_uri)
            .trim_end_matches('/')
            .to_string();

        Self {
            collection_uri,
            top_limits,
            top_total: 0,
        }
    }

    pub fn collection_uri(&self) -> &str {
        &self.collection_uri
    }

    /// Parse the whole body.
    pub fn parse(&mut self, boundary: &str, body: &str) -> CoreResult<Vec<BodyPart>> {
        let body = body.replace("\r\n", "\n");
        let open = format!("--{}\n", boundary);
        let close = format!("--{}--", boundary);

        if !body.starts_with(&open) || !body.trim_end().ends_with(&close) {
            return Err(CoreError::new(codes::BATCH_BODY_PARSE_ERROR));
        }

        let mut parts = Vec::new();
        for segment in body.split(open.as_str()) {
            let segment = truncate_at_line(segment, &close);
            if segment.trim().is_empty() {
                continue;
            }
            self.parse_segment(segment, None, &mut parts)?;
        }
        Ok(parts)
    }

    fn parse_segment(
        &mut self,
        segment: &str,
        changeset: Option<&str>,
        parts: &mut Vec<BodyPart>,
    ) -> CoreResult<()> {
        let (header_block, content) = split_head(segment);
        let headers = parse_headers(header_block);
        let content_type = header(&headers, CONTENT_TYPE).ok_or_else(|| header_error(CONTENT_TYPE))?;

        if content_type.starts_with(APPLICATION_HTTP) {
            let part = self.parse_request(content)?;
            parts.push(match changeset {
                Some(boundary) => part.in_changeset(boundary, false, false),
                None => part,
            });
            return Ok(());
        }

        if content_type.starts_with(MULTIPART_MIXED) {
            if changeset.is_some() {
                return Err(CoreError::new(codes::BATCH_BODY_FORMAT_CHANGESET_NEST_ERROR));
            }
            let boundary = boundary_of(content_type)
                .ok_or_else(|| header_error(CONTENT_TYPE))?
                .to_string();
            return self.parse_changeset(&boundary, content, parts);
        }

        Err(header_error(CONTENT_TYPE))
    }

    fn parse_changeset(
        &mut self,
        boundary: &str,
        content: &str,
        parts: &mut Vec<BodyPart>,
    ) -> CoreResult<()> {
        let open = format!("--{}\n", boundary);
        let close = format!("--{}--", boundary);
        let content = truncate_at_line(content, &close);

        let mut members = Vec::new();
        for segment in content.split(open.as_str()) {
            if segment.trim().is_empty() {
                continue;
            }
            self.parse_segment(segment, Some(boundary), &mut members)?;
        }

        let count = members.len();
        if count == 0 {
            return Err(CoreError::new(codes::BATCH_BODY_PARSE_ERROR));
        }
        parts.extend(
            members
                .into_iter()
                .enumerate()
                .map(|(i, part)| part.in_changeset(boundary, i == 0, i == count - 1)),
        );
        Ok(())
    }

    fn parse_request(&mut self, content: &str) -> CoreResult<BodyPart> {
        let (head, body) = split_head(content.trim_start_matches('\n'));
        let mut lines = head.lines();
        let request_line = lines.next().unwrap_or("").trim();
        let headers = parse_headers(&lines.collect::<Vec<_>>().join("\n"));

        let mut words = request_line.split_whitespace();
        let method_token = words.next().unwrap_or("");
        if !ALLOWED_METHODS.contains(&method_token) {
            return Err(CoreError::new(codes::BATCH_BODY_FORMAT_METHOD_ERROR).with_params([method_token]));
        }
        let method = Method::from_bytes(method_token.as_bytes())
            .map_err(|_| CoreError::new(codes::BATCH_BODY_FORMAT_METHOD_ERROR).with_params([method_token]))?;
        let target = words.next().ok_or_else(|| path_error(""))?;

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };
        let query = query.filter(|q| !q.is_empty());

        let part = if path.contains('/') {
            if query.is_some() {
                return Err(path_error(target));
            }
            self.parse_multi_segment(method, path)?
        } else {
            self.parse_single_segment(method, path, query)?
        };

        let body = body.trim_end_matches('\n');
        Ok(part.with_headers(headers).with_body(body))
    }

    fn parse_multi_segment(&self, method: Method, path: &str) -> CoreResult<BodyPart> {
        if let Some(caps) = links_pattern().captures(path) {
            let uri = self.resolve(path);
            return Ok(BodyPart::new(method, uri, &caps[1])
                .with_key(Some(caps[2].to_string()))
                .as_links(caps[3].to_string(), caps.get(5).map(|m| m.as_str().to_string())));
        }

        if let Some(caps) = navigation_pattern().captures(path) {
            // A navigation path never addresses an existing entity to replace or remove
            if method == Method::PUT || method == Method::DELETE {
                return Err(path_error(path));
            }
            let target_set = caps[3].to_string();
            let navigation_property = format!(
                "_{}{}",
                target_set,
                caps.get(4).map(|m| m.as_str()).unwrap_or("")
            );
            let uri = self.resolve(&target_set);
            return Ok(BodyPart::new(method, uri, &caps[1])
                .with_key(Some(caps[2].to_string()))
                .as_navigation(
                    navigation_property,
                    target_set,
                    caps.get(5).map(|m| m.as_str().to_string()),
                ));
        }

        Err(path_error(path))
    }

    fn parse_single_segment(
        &mut self,
        method: Method,
        path: &str,
        query: Option<&str>,
    ) -> CoreResult<BodyPart> {
        let caps = entity_pattern().captures(path).ok_or_else(|| path_error(path))?;
        let key = caps.get(3).map(|m| m.as_str().to_string());

        if method == Method::POST && key.is_some() {
            return Err(path_error(path));
        }
        if method != Method::GET && method != Method::POST && key.is_none() {
            return Err(path_error(path));
        }

        let mut part = BodyPart::new(method.clone(), self.resolve(path), &caps[1]).with_key(key);
        if method == Method::GET {
            if let Some(query) = query {
                self.count_top(query)?;
            }
            part = part.with_query(query.map(str::to_string));
        }
        Ok(part)
    }

    /// Add a GET part's `$top` to the batch total.
    ///
    /// Invalid values are left for the part itself to report.
    fn count_top(&mut self, query: &str) -> CoreResult<()> {
        let top = url::form_urlencoded::parse(query.as_bytes())
            .find(|(name, _)| name == "$top")
            .and_then(|(_, value)| parse_top(&value, &self.top_limits).ok());

        if let Some(top) = top {
            self.top_total += u64::from(top);
            if self.top_total > u64::from(self.top_limits.top_max) {
                return Err(CoreError::new(codes::BATCH_TOTAL_TOP_COUNT_LIMITATION_EXCEEDED));
            }
        }
        Ok(())
    }

    fn resolve(&self, path: &str) -> String {
        format!("{}/{}", self.collection_uri, path)
            .trim_end_matches('/')
            .to_string()
    }
}

/// Split at the first blank line: (head, rest)
fn split_head(text: &str) -> (&str, &str) {
    match text.find("\n\n") {
        Some(pos) => (&text[..pos], &text[pos + 2..]),
        None => (text.trim_end_matches('\n'), ""),
    }
}

/// Everything before the first line containing `marker`
fn truncate_at_line<'a>(text: &'a str, marker: &str) -> &'a str {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.contains(marker) {
            return &text[..offset];
        }
        offset += line.len();
    }
    text
}

fn parse_headers(block: &str) -> IndexMap<String, String> {
    block
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

fn header<'a>(headers: &'a IndexMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn header_error(name: &str) -> CoreError {
    CoreError::new(codes::BATCH_BODY_FORMAT_HEADER_ERROR).with_params([name])
}

fn path_error(path: &str) -> CoreError {
    CoreError::new(codes::BATCH_BODY_FORMAT_PATH_ERROR).with_params([path])
}
