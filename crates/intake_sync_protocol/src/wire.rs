//! HTTP-shaped request and response values.
//!
//! Transport-neutral so the engine's HTTP remote client, the reference
//! server and loopback tests agree on one representation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        })
    }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL or path.
    pub url: String,
    /// JSON body, if any.
    pub body: Option<Value>,
}

impl HttpRequest {
    /// Creates a request without a body.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
        }
    }

    /// Attaches a JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Returns the path component of the URL.
    pub fn path(&self) -> &str {
        let without_scheme = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        match without_scheme.find('/') {
            Some(i) if self.url.contains("://") => &without_scheme[i..],
            _ => without_scheme,
        }
    }
}

/// A received response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with a JSON body.
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            body: serde_json::to_vec(body).unwrap_or_default(),
        }
    }

    /// Creates an error response in `{"detail": ...}` form.
    pub fn error(status: u16, detail: impl Into<String>) -> Self {
        let body = ErrorBody {
            detail: detail.into(),
        };
        Self {
            status,
            body: serde_json::to_vec(&body).unwrap_or_default(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parses the body as JSON.
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Extracts the error detail, falling back to the raw body text.
    pub fn detail(&self) -> String {
        serde_json::from_slice::<ErrorBody>(&self.body)
            .map(|e| e.detail)
            .unwrap_or_else(|_| String::from_utf8_lossy(&self.body).into_owned())
    }
}

/// Error body returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable detail.
    pub detail: String,
}
