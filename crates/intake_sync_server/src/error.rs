//! Error types for the reference server.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors the server turns into HTTP error responses.
///
/// The `Display` text is the response `detail`, matching what the real API
/// sends, so clients classify loopback and production responses alike.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Malformed request (bad JSON, bad path parameter).
    #[error("{0}")]
    InvalidRequest(String),

    /// The body parsed but failed field validation.
    #[error("{0}")]
    Validation(String),

    /// Another candidate already holds this email.
    #[error("Email already registered")]
    DuplicateEmail,

    /// No candidate with the requested key.
    #[error("Candidate not found")]
    NotFound,

    /// No route matches the path.
    #[error("Not Found")]
    NoRoute,

    /// The route exists but not for this method.
    #[error("Method Not Allowed")]
    MethodNotAllowed,

    /// Fault injection is active.
    #[error("Service unavailable")]
    Unavailable,

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) | ServerError::DuplicateEmail => 400,
            ServerError::NotFound | ServerError::NoRoute => 404,
            ServerError::MethodNotAllowed => 405,
            ServerError::Validation(_) => 422,
            ServerError::Internal(_) => 500,
            ServerError::Unavailable => 503,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}
