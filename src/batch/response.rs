//! # Per-part responses and the multipart response writer

use axum::http::StatusCode;
use indexmap::IndexMap;

use super::body_part::BodyPart;
use crate::errors::CoreError;

pub const DATA_SERVICE_VERSION: &str = "DataServiceVersion";
pub const ODATA_VERSION: &str = "2.0";

/// Response to one sub-request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResponse {
    status: StatusCode,
    headers: IndexMap<String, String>,
    body: Option<String>,
}

impl BatchResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: IndexMap::new(),
            body: None,
        }
    }

    /// Error rendered as an OData JSON error body. Logs the error once.
    pub fn from_error(error: &CoreError) -> Self {
        error.log();
        Self::new(error.status())
            .with_header("Content-Type", "application/json")
            .with_body(error.to_json_body())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &IndexMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    fn write_http(&self, out: &mut String) {
        out.push_str(&format!(
            "HTTP/1.1 {} {}\n",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("")
        ));
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\n", name, value));
        }
        out.push('\n');
        if let Some(body) = &self.body {
            out.push_str(body);
            out.push_str("\n\n");
        }
    }
}

/// Builds the `multipart/mixed` response body part by part, in order
pub struct MultipartWriter {
    boundary: String,
    out: String,
    parts: usize,
}

impl MultipartWriter {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            out: String::new(),
            parts: 0,
        }
    }

    /// Append the response for `part`, framed the way the part was sent.
    pub fn write(&mut self, part: &BodyPart, response: &BatchResponse) {
        match part.changeset() {
            Some(changeset) => {
                if changeset.start {
                    self.out.push_str(&format!(
                        "--{}\nContent-Type: multipart/mixed; boundary={}\n\n",
                        self.boundary, changeset.boundary
                    ));
                }
                self.out.push_str(&format!(
                    "--{}\nContent-Type: application/http\nContent-Transfer-Encoding: binary\n\n",
                    changeset.boundary
                ));
                response.write_http(&mut self.out);
                if changeset.end {
                    self.out.push_str(&format!("--{}--\n\n", changeset.boundary));
                }
            }
            None => {
                self.out.push_str(&format!(
                    "--{}\nContent-Type: application/http\n\n",
                    self.boundary
                ));
                response.write_http(&mut self.out);
            }
        }
        self.parts += 1;
    }

    pub fn parts_written(&self) -> usize {
        self.parts
    }

    /// Close the envelope and return the body.
    pub fn finish(mut self) -> String {
        self.out.push_str(&format!("--{}--", self.boundary));
        self.out
    }
}
