//! The reference server.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handler::RequestHandler;
use crate::store::{Candidate, CandidateStore};
use intake_sync_protocol::{HttpRequest, HttpResponse};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// The reference candidate server.
///
/// Serves the candidate routes over [`HttpRequest`] values so clients can be
/// exercised end to end without a network. Fault injection makes requests
/// answer `503` for retry testing.
///
/// # Example
///
/// ```
/// use intake_sync_protocol::{HttpMethod, HttpRequest};
/// use intake_sync_server::{ServerConfig, SyncServer};
/// use serde_json::json;
///
/// let server = SyncServer::new(ServerConfig::default());
/// let request = HttpRequest::new(HttpMethod::Post, "/candidates")
///     .with_body(json!({"name": "Ada", "email": "ada@example.com"}));
///
/// let response = server.handle(&request);
/// assert_eq!(response.status, 200);
/// assert_eq!(server.candidate_count(), 1);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    store: Arc<CandidateStore>,
    available: AtomicBool,
    fail_next: AtomicUsize,
    requests: AtomicU64,
}

impl SyncServer {
    /// Creates a server with an empty table.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(CandidateStore::new()))
    }

    /// Creates a server over an existing table.
    pub fn with_store(config: ServerConfig, store: Arc<CandidateStore>) -> Self {
        Self {
            handler: RequestHandler::new(config, Arc::clone(&store)),
            store,
            available: AtomicBool::new(true),
            fail_next: AtomicUsize::new(0),
            requests: AtomicU64::new(0),
        }
    }

    /// Handles one request.
    pub fn handle(&self, request: &HttpRequest) -> HttpResponse {
        self.requests.fetch_add(1, Ordering::Relaxed);

        let result = if self.take_fault() {
            Err(ServerError::Unavailable)
        } else {
            self.handler.route(request)
        };

        match result {
            Ok((status, body)) => {
                tracing::debug!(method = %request.method, path = request.path(), status, "request served");
                HttpResponse::json(status, &body)
            }
            Err(err) => {
                let status = err.status_code();
                if err.is_server_error() {
                    tracing::warn!(method = %request.method, path = request.path(), status, error = %err, "request failed");
                } else {
                    tracing::debug!(method = %request.method, path = request.path(), status, error = %err, "request refused");
                }
                HttpResponse::error(status, err.to_string())
            }
        }
    }

    fn take_fault(&self) -> bool {
        if !self.available.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Makes the next `n` requests answer `503`.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Turns the outage switch on (`false`) or off (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns the candidate table.
    pub fn store(&self) -> &Arc<CandidateStore> {
        &self.store
    }

    /// Number of stored candidates.
    pub fn candidate_count(&self) -> usize {
        self.store.len()
    }

    /// All stored candidates, newest first.
    pub fn candidates(&self) -> Vec<Candidate> {
        self.store.list(0, usize::MAX)
    }

    /// Number of requests handled, including injected failures.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl Default for SyncServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_sync_protocol::HttpMethod;
    use serde_json::json;

    fn create(email: &str) -> HttpRequest {
        HttpRequest::new(HttpMethod::Post, "/candidates")
            .with_body(json!({"name": "Ada", "email": email}))
    }

    #[test]
    fn server_lifecycle() {
        let server = SyncServer::default();
        assert_eq!(server.candidate_count(), 0);
        assert_eq!(server.request_count(), 0);
    }

    #[test]
    fn error_responses_carry_detail() {
        let server = SyncServer::default();
        assert_eq!(server.handle(&create("a@x.com")).status, 200);

        let dup = server.handle(&create("a@x.com"));
        assert_eq!(dup.status, 400);
        assert_eq!(dup.detail(), "Email already registered");

        let missing = server.handle(&HttpRequest::new(HttpMethod::Get, "/candidates/42"));
        assert_eq!(missing.status, 404);
        assert_eq!(missing.detail(), "Candidate not found");
    }

    #[test]
    fn fail_next_counts_down() {
        let server = SyncServer::default();
        server.fail_next(2);

        assert_eq!(server.handle(&create("a@x.com")).status, 503);
        assert_eq!(server.handle(&create("a@x.com")).status, 503);
        assert_eq!(server.handle(&create("a@x.com")).status, 200);
        assert_eq!(server.candidate_count(), 1);
        assert_eq!(server.request_count(), 3);
    }

    #[test]
    fn outage_switch() {
        let server = SyncServer::default();
        server.set_available(false);
        assert_eq!(server.handle(&create("a@x.com")).status, 503);
        assert_eq!(server.candidate_count(), 0);

        server.set_available(true);
        assert_eq!(server.handle(&create("a@x.com")).status, 200);
    }

    #[test]
    fn shared_store() {
        let store = Arc::new(CandidateStore::new());
        let server = SyncServer::with_store(ServerConfig::default(), Arc::clone(&store));
        server.handle(&create("a@x.com"));
        assert_eq!(store.len(), 1);
        assert_eq!(server.candidates()[0].email, "a@x.com");
    }
}
