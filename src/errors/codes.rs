//! Error code constants and the message catalog.
//!
//! Codes have the form `PRnnn-XX-nnnn` where `nnn` is the HTTP status
//! that the error maps to. The catalog is a static table resolved once.

use std::collections::HashMap;
use std::sync::OnceLock;

use super::Severity;

// ==================
// Request format (400)
// ==================
pub const JSON_PARSE_ERROR: &str = "PR400-OD-0001";
pub const REQUEST_FIELD_FORMAT_ERROR: &str = "PR400-OD-0006";
pub const NO_SUCH_ASSOCIATION: &str = "PR400-OD-0008";
pub const KEY_FOR_NAVPROP_SHOULD_NOT_BE_SPECIFIED: &str = "PR400-OD-0010";
pub const BATCH_BODY_FORMAT_HEADER_ERROR: &str = "PR400-OD-0021";
pub const BATCH_BODY_FORMAT_CHANGESET_NEST_ERROR: &str = "PR400-OD-0022";
pub const BATCH_BODY_PARSE_ERROR: &str = "PR400-OD-0023";
pub const ENTITY_KEY_LINKS_PARSE_ERROR: &str = "PR400-OD-0028";
pub const QUERY_INVALID_ERROR: &str = "PR400-OD-0029";
pub const TOO_MANY_REQUESTS: &str = "PR400-OD-0030";
pub const BATCH_BODY_FORMAT_PATH_ERROR: &str = "PR400-OD-0034";
pub const BATCH_BODY_FORMAT_METHOD_ERROR: &str = "PR400-OD-0035";
pub const QUERY_PARSE_ERROR_WITH_PARAM: &str = "PR400-OD-0036";
pub const BATCH_TOTAL_TOP_COUNT_LIMITATION_EXCEEDED: &str = "PR400-OD-0037";

// ==================
// Authorization (401/403)
// ==================
pub const AUTHORIZATION_REQUIRED: &str = "PR401-AU-0001";
pub const NECESSARY_PRIVILEGE_LACKING: &str = "PR403-AU-0002";

// ==================
// Resource state (404/409/412)
// ==================
pub const NOT_FOUND: &str = "PR404-OD-0000";
pub const NO_SUCH_ENTITY_SET: &str = "PR404-OD-0001";
pub const NO_SUCH_ENTITY: &str = "PR404-OD-0002";
pub const NOT_SUCH_NAVPROP: &str = "PR404-OD-0003";
pub const CONFLICT_LINKS: &str = "PR409-OD-0002";
pub const ENTITY_ALREADY_EXISTS: &str = "PR409-OD-0003";
pub const ETAG_NOT_MATCH: &str = "PR412-OD-0002";

// ==================
// Method and server conditions
// ==================
pub const METHOD_NOT_ALLOWED: &str = "PR405-MC-0001";
pub const SERVER_REQUEST_TIMEOUT: &str = "PR408-MC-0001";
pub const UNKNOWN_ERROR: &str = "PR500-SV-0000";
pub const METHOD_NOT_IMPLEMENTED: &str = "PR501-MC-0001";
pub const TOO_MANY_CONCURRENT_REQUESTS: &str = "PR503-SV-0001";
pub const READ_DELETE_ONLY: &str = "PR503-SV-0005";

/// One catalog row: severity override and message template.
#[derive(Debug, Clone, Copy)]
pub struct CatalogEntry {
    pub severity: Option<Severity>,
    pub template: &'static str,
}

const CATALOG: &[(&str, Option<Severity>, &str)] = &[
    (JSON_PARSE_ERROR, None, "JSON parse error."),
    (REQUEST_FIELD_FORMAT_ERROR, None, "[{0}] field format error."),
    (NO_SUCH_ASSOCIATION, None, "No such association."),
    (
        KEY_FOR_NAVPROP_SHOULD_NOT_BE_SPECIFIED,
        None,
        "Key for navigation property should not be specified.",
    ),
    (BATCH_BODY_FORMAT_HEADER_ERROR, None, "Batch request body format error: [{0}] header is invalid."),
    (BATCH_BODY_FORMAT_CHANGESET_NEST_ERROR, None, "Batch request body format error: changesets cannot be nested."),
    (BATCH_BODY_PARSE_ERROR, None, "Batch request body parse error."),
    (ENTITY_KEY_LINKS_PARSE_ERROR, None, "Entity key for links parse error."),
    (QUERY_INVALID_ERROR, None, "Query [{0}] has invalid value [{1}]."),
    (TOO_MANY_REQUESTS, None, "Too many requests in batch [{0}]."),
    (BATCH_BODY_FORMAT_PATH_ERROR, None, "Batch request body format error: path [{0}] is invalid."),
    (BATCH_BODY_FORMAT_METHOD_ERROR, None, "Batch request body format error: method [{0}] is invalid."),
    (QUERY_PARSE_ERROR_WITH_PARAM, None, "Query parse error [{0}]."),
    (
        BATCH_TOTAL_TOP_COUNT_LIMITATION_EXCEEDED,
        None,
        "Total of $top in batch request exceeds the limit.",
    ),
    (AUTHORIZATION_REQUIRED, None, "Authorization required."),
    (NECESSARY_PRIVILEGE_LACKING, None, "Necessary privilege is lacking."),
    (NOT_FOUND, None, "Resource not found."),
    (NO_SUCH_ENTITY_SET, None, "No such entity set."),
    (NO_SUCH_ENTITY, None, "No such entity."),
    (NOT_SUCH_NAVPROP, None, "No such navigation property."),
    (CONFLICT_LINKS, None, "The link already exists."),
    (ENTITY_ALREADY_EXISTS, None, "The entity already exists."),
    (ETAG_NOT_MATCH, None, "ETag does not match."),
    (METHOD_NOT_ALLOWED, None, "Method not allowed."),
    (SERVER_REQUEST_TIMEOUT, None, "Server request timeout."),
    (UNKNOWN_ERROR, Some(Severity::Error), "Server unknown error."),
    (METHOD_NOT_IMPLEMENTED, None, "Method not implemented."),
    (TOO_MANY_CONCURRENT_REQUESTS, None, "Too many concurrent requests."),
    (READ_DELETE_ONLY, None, "Unit is in read/delete-only mode."),
];

fn catalog() -> &'static HashMap<&'static str, CatalogEntry> {
    static TABLE: OnceLock<HashMap<&'static str, CatalogEntry>> = OnceLock::new();
    TABLE.get_or_init(|| {
        CATALOG
            .iter()
            .map(|(code, severity, template)| {
                (
                    *code,
                    CatalogEntry {
                        severity: *severity,
                        template,
                    },
                )
            })
            .collect()
    })
}

/// Look up a code in the catalog.
pub fn lookup(code: &str) -> Option<CatalogEntry> {
    catalog().get(code).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_code_is_catalogued_once() {
        let mut seen = std::collections::HashSet::new();
        for (code, _, _) in CATALOG {
            assert!(seen.insert(*code), "duplicate catalog row for {}", code);
        }
        assert_eq!(seen.len(), catalog().len());
    }

    #[test]
    fn test_lookup_unknown_code() {
        assert!(lookup("PR999-XX-9999").is_none());
        assert!(lookup(BATCH_BODY_PARSE_ERROR).is_some());
    }
}
