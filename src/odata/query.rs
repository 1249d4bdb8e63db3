//! # System query options
//!
//! Parses `$top`, `$skip`, `$select` and `$inlinecount`. Expression options
//! (`$filter`, `$orderby`, `$expand`) are carried verbatim for the producer.

use indexmap::IndexMap;

use crate::config::ODataLimits;
use crate::errors::{codes, CoreError, CoreResult};

/// Parsed query options of one GET request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// Number of entities to return
    pub top: u32,
    /// Number of entities to skip
    pub skip: u32,
    /// Properties to return (None = all)
    pub select: Option<Vec<String>>,
    /// Include the total count in list responses
    pub inline_count: bool,
    /// Unparsed expression options, keyed by option name
    pub expressions: IndexMap<String, String>,
}

const EXPRESSION_OPTIONS: &[&str] = &["$filter", "$orderby", "$expand", "q"];

impl QueryOptions {
    /// Options applied when the request carries no query string
    pub fn defaults(limits: &ODataLimits) -> Self {
        Self {
            top: limits.top_default,
            skip: 0,
            select: None,
            inline_count: false,
            expressions: IndexMap::new(),
        }
    }

    /// Parse a raw (still percent-encoded) query string.
    pub fn parse(query: Option<&str>, limits: &ODataLimits) -> CoreResult<Self> {
        let mut options = Self::defaults(limits);
        let Some(query) = query else {
            return Ok(options);
        };

        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match name.as_ref() {
                "$top" => options.top = parse_top(&value, limits)?,
                "$skip" => options.skip = parse_skip(&value, limits)?,
                "$select" => options.select = Some(parse_select(&value)?),
                "$inlinecount" => options.inline_count = parse_inline_count(&value)?,
                "$format" => {
                    if value != "json" {
                        return Err(invalid("$format", &value));
                    }
                }
                other if EXPRESSION_OPTIONS.contains(&other) => {
                    options.expressions.insert(other.to_string(), value.into_owned());
                }
                other if other.starts_with('$') => {
                    return Err(CoreError::new(codes::QUERY_PARSE_ERROR_WITH_PARAM).with_params([other]));
                }
                // Custom query parameters are not ours to interpret
                _ => {}
            }
        }
        Ok(options)
    }
}

/// Parse `$top`, accepting `0..=top_max`.
pub fn parse_top(value: &str, limits: &ODataLimits) -> CoreResult<u32> {
    match value.parse::<u32>() {
        Ok(top) if top <= limits.top_max => Ok(top),
        _ => Err(invalid("$top", value)),
    }
}

fn parse_skip(value: &str, limits: &ODataLimits) -> CoreResult<u32> {
    match value.parse::<u32>() {
        Ok(skip) if skip <= limits.skip_max => Ok(skip),
        _ => Err(invalid("$skip", value)),
    }
}

fn parse_select(value: &str) -> CoreResult<Vec<String>> {
    let fields: Vec<String> = value
        .split(',')
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect();

    if fields.is_empty() {
        return Err(invalid("$select", value));
    }
    Ok(fields)
}

fn parse_inline_count(value: &str) -> CoreResult<bool> {
    match value {
        "allpages" => Ok(true),
        "none" => Ok(false),
        _ => Err(invalid("$inlinecount", value)),
    }
}

fn invalid(option: &str, value: &str) -> CoreError {
    CoreError::new(codes::QUERY_INVALID_ERROR).with_params([option, value])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ODataLimits {
        ODataLimits::default()
    }

    #[test]
    fn test_no_query_gives_defaults() {
        let options = QueryOptions::parse(None, &limits()).unwrap();
        assert_eq!(options.top, 25);
        assert_eq!(options.skip, 0);
        assert!(options.select.is_none());
    }

    #[test]
    fn test_parse_top_skip_select() {
        let options =
            QueryOptions::parse(Some("$top=10&$skip=5&$select=name,%20age"), &limits()).unwrap();
        assert_eq!(options.top, 10);
        assert_eq!(options.skip, 5);
        assert_eq!(options.select, Some(vec!["name".to_string(), "age".to_string()]));
    }

    #[test]
    fn test_top_over_limit_rejected() {
        let err = QueryOptions::parse(Some("$top=10001"), &limits()).unwrap_err();
        assert!(err.is(codes::QUERY_INVALID_ERROR));
        assert!(err.message().contains("$top"));
    }

    #[test]
    fn test_negative_top_rejected() {
        assert!(QueryOptions::parse(Some("$top=-1"), &limits()).is_err());
    }

    #[test]
    fn test_expression_options_carried() {
        let options =
            QueryOptions::parse(Some("$filter=name%20eq%20'a'&$inlinecount=allpages"), &limits())
                .unwrap();
        assert_eq!(options.expressions["$filter"], "name eq 'a'");
        assert!(options.inline_count);
    }

    #[test]
    fn test_unknown_system_option_rejected() {
        let err = QueryOptions::parse(Some("$bogus=1"), &limits()).unwrap_err();
        assert!(err.is(codes::QUERY_PARSE_ERROR_WITH_PARAM));
    }

    #[test]
    fn test_custom_parameter_ignored() {
        assert!(QueryOptions::parse(Some("trace=1"), &limits()).is_ok());
    }
}
