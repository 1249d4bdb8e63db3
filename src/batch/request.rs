//! Batch request writer
//!
//! Client side of the `$batch` wire format: renders sub-requests into a
//! body that [`super::parser::BatchBodyParser`] accepts.

use axum::http::Method;
use indexmap::IndexMap;

/// One sub-request to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubRequest {
    pub method: Method,
    /// Path relative to the collection, with optional query
    pub path: String,
    pub headers: IndexMap<String, String>,
    pub body: Option<String>,
}

impl SubRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: IndexMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn post_json(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
            .with_header("Content-Type", "application/json")
            .with_body(body)
    }

    pub fn put_json(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
            .with_header("Content-Type", "application/json")
            .with_body(body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    fn write(&self, out: &mut String) {
        out.push_str("Content-Type: application/http\nContent-Transfer-Encoding: binary\n\n");
        out.push_str(&format!("{} {} HTTP/1.1\n", self.method, self.path));
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\n", name, value));
        }
        out.push('\n');
        if let Some(body) = &self.body {
            out.push_str(body);
            out.push('\n');
        }
        out.push('\n');
    }
}

/// Builds a `$batch` request body
pub struct BatchRequestWriter {
    boundary: String,
    out: String,
}

impl BatchRequestWriter {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            out: String::new(),
        }
    }

    /// `multipart/mixed; boundary=...` for the outer request
    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary)
    }

    pub fn request(mut self, request: &SubRequest) -> Self {
        self.out.push_str(&format!("--{}\n", self.boundary));
        request.write(&mut self.out);
        self
    }

    pub fn changeset(mut self, changeset_boundary: &str, requests: &[SubRequest]) -> Self {
        self.out.push_str(&format!(
            "--{}\nContent-Type: multipart/mixed; boundary={}\n\n",
            self.boundary, changeset_boundary
        ));
        for request in requests {
            self.out.push_str(&format!("--{}\n", changeset_boundary));
            request.write(&mut self.out);
        }
        self.out.push_str(&format!("--{}--\n\n", changeset_boundary));
        self
    }

    pub fn finish(mut self) -> String {
        self.out.push_str(&format!("--{}--\n", self.boundary));
        self.out
    }
}
