//! # Core errors
//!
//! Every failure that can become an HTTP response is a [`CoreError`]: a
//! catalogued code plus rendered message. Values are immutable; the
//! `with_*` methods return a modified copy.
//!
//! The HTTP status is derived from the code itself (`PR409-OD-0003` is a
//! 409). Severity comes from the catalog, or from the status class when the
//! catalog has no override.

pub mod codes;

use std::fmt;
use std::sync::OnceLock;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use regex::Regex;
use serde_json::json;

/// Log severity of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    /// Default severity for a status code when the catalog does not say.
    pub fn for_status(status: u16) -> Self {
        if status >= 500 {
            Severity::Warn
        } else if status >= 400 {
            Severity::Info
        } else {
            Severity::Warn
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warn => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// Result alias used throughout the batch engine
pub type CoreResult<T> = Result<T, CoreError>;

/// A catalogued, renderable error
#[derive(Debug, Clone)]
pub struct CoreError {
    code: &'static str,
    status: StatusCode,
    severity: Severity,
    template: &'static str,
    params: Vec<String>,
    cause: Option<String>,
    realm: Option<String>,
}

const UNCATALOGUED_TEMPLATE: &str = "Unknown error.";

impl CoreError {
    /// Build the error for a catalogued code.
    pub fn new(code: &'static str) -> Self {
        let status = parse_status(code);
        let entry = codes::lookup(code);
        let severity = entry
            .and_then(|e| e.severity)
            .unwrap_or_else(|| Severity::for_status(status.as_u16()));
        let template = entry.map(|e| e.template).unwrap_or(UNCATALOGUED_TEMPLATE);

        Self {
            code,
            status,
            severity,
            template,
            params: Vec::new(),
            cause: None,
            realm: None,
        }
    }

    /// Unknown server error wrapping an arbitrary cause.
    pub fn unknown(cause: impl fmt::Display) -> Self {
        Self::new(codes::UNKNOWN_ERROR).with_cause(cause)
    }

    /// Fill the `{n}` placeholders of the message template.
    ///
    /// Control characters in parameters are escaped before substitution.
    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.params = params
            .into_iter()
            .map(|p| escape_control(&p.to_string()))
            .collect();
        self
    }

    /// Attach the underlying cause.
    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Attach the authentication realm reported in `WWW-Authenticate`.
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    /// True when this error carries the given code.
    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }

    /// Rendered message text.
    pub fn message(&self) -> String {
        let mut message = self.template.to_string();
        for (i, param) in self.params.iter().enumerate() {
            message = message.replace(&format!("{{{}}}", i), param);
        }
        message
    }

    /// OData JSON error body.
    pub fn to_json_body(&self) -> String {
        json!({
            "code": self.code,
            "message": {
                "lang": "en",
                "value": self.message(),
            }
        })
        .to_string()
    }

    /// Emit the error once at its catalog severity.
    pub fn log(&self) {
        let message = self.message();
        let cause = self.cause.as_deref().unwrap_or("");
        match self.severity {
            Severity::Info => tracing::info!(
                event = "ERROR_RESPONSE",
                code = self.code,
                status = self.status.as_u16(),
                cause,
                "{}",
                message
            ),
            Severity::Warn => tracing::warn!(
                event = "ERROR_RESPONSE",
                code = self.code,
                status = self.status.as_u16(),
                cause,
                "{}",
                message
            ),
            Severity::Error => tracing::error!(
                event = "ERROR_RESPONSE",
                code = self.code,
                status = self.status.as_u16(),
                cause,
                "{}",
                message
            ),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] - {}", self.code, self.message())
    }
}

impl std::error::Error for CoreError {}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        self.log();
        let mut response = (
            self.status,
            [(header::CONTENT_TYPE, "application/json")],
            self.to_json_body(),
        )
            .into_response();

        if let Some(realm) = &self.realm {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer realm=\"{}\"", realm)) {
                response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

fn parse_status(code: &str) -> StatusCode {
    static CODE_PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = CODE_PATTERN
        .get_or_init(|| Regex::new(r"^PR(\d{3})-\w{2}-\d{4}$").expect("static pattern"));

    pattern
        .captures(code)
        .and_then(|caps| caps[1].parse::<u16>().ok())
        .and_then(|status| StatusCode::from_u16(status).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn escape_control(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_control() {
            out.extend(c.escape_default());
        } else {
            out.push(c);
        }
    }
    out
}
