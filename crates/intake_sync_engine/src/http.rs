//! HTTP remote client.
//!
//! Maps mutations onto the candidates REST API and folds responses into
//! the three delivery outcomes. The actual HTTP stack is abstracted via
//! [`HttpClient`] so the CLI can plug in reqwest and tests can route
//! requests straight into an in-process server.

use crate::remote::RemoteClient;
use async_trait::async_trait;
use intake_sync_protocol::{
    DeliveryOutcome, HttpMethod, HttpRequest, HttpResponse, Mutation, MutationKind, Payload,
    Rejection, CANDIDATE,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// HTTP client abstraction.
///
/// `Err` means the request never produced a response (connection refused,
/// DNS failure, TLS error). Any response, whatever its status, is `Ok`.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Performs one request.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// Classifies a response to a mutation request.
///
/// | Status | Outcome |
/// |---|---|
/// | 2xx | delivered, remote id from the body's `id` |
/// | 409, or 400 naming a duplicate | unique violation on `email` |
/// | 404 | not found; delivered for a delete |
/// | 400, 422 | validation |
/// | 408, 425, 429, 5xx | transient |
/// | other | rejected |
pub fn classify_response(kind: MutationKind, response: &HttpResponse) -> DeliveryOutcome {
    if response.is_success() {
        let remote_id = response
            .json_body()
            .and_then(|body| body.get("id").and_then(Value::as_i64));
        return DeliveryOutcome::Delivered { remote_id };
    }

    let detail = response.detail();
    match response.status {
        409 => DeliveryOutcome::Rejected(Rejection::unique_violation("email", detail)),
        400 if names_duplicate(&detail) => {
            DeliveryOutcome::Rejected(Rejection::unique_violation("email", detail))
        }
        404 if kind == MutationKind::Delete => DeliveryOutcome::delivered(),
        404 => DeliveryOutcome::Rejected(Rejection::not_found(detail)),
        400 | 422 => DeliveryOutcome::Rejected(Rejection::validation(detail)),
        408 | 425 | 429 | 500..=599 => {
            DeliveryOutcome::transient(format!("HTTP {}: {}", response.status, detail))
        }
        status => DeliveryOutcome::Rejected(Rejection::other(format!("HTTP {}: {}", status, detail))),
    }
}

fn names_duplicate(detail: &str) -> bool {
    let detail = detail.to_lowercase();
    ["already registered", "already exists", "duplicate", "unique"]
        .iter()
        .any(|needle| detail.contains(needle))
}

fn is_unique_violation(outcome: &DeliveryOutcome) -> bool {
    matches!(outcome, DeliveryOutcome::Rejected(rejection) if rejection.is_unique_violation())
}

/// Whether a stored row is the candidate a create payload describes.
fn same_candidate(row: &Value, payload: &Payload) -> bool {
    let name = |v: Option<&Value>| v.and_then(Value::as_str).map(|n| n.trim().to_string());
    name(row.get("name")) == name(payload.get("name"))
}

enum Resolved {
    Found { id: i64, row: Value },
    Missing,
    Failed(DeliveryOutcome),
}

/// [`RemoteClient`] speaking the candidates REST API.
///
/// - create: `POST {base}/candidates`
/// - update: `PUT {base}/candidates/{id}`
/// - delete: `DELETE {base}/candidates/{id}`
///
/// An update or delete queued before its create was confirmed carries only
/// the email; the id is looked up with `GET {base}/candidates/by-email/{email}`.
///
/// A create that was attempted before and now hits a duplicate email is
/// looked up the same way: if the row matches the payload, an earlier
/// attempt was applied and only its response was lost.
pub struct HttpRemoteClient<C: HttpClient> {
    base_url: String,
    client: C,
    last_error: Mutex<Option<String>>,
}

impl<C: HttpClient> HttpRemoteClient<C> {
    /// Creates a client for the API at `base_url`.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            last_error: Mutex::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error, if the last request had one.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn collection_url(&self) -> String {
        format!("{}/candidates", self.base_url)
    }

    fn entity_url(&self, id: i64) -> String {
        format!("{}/candidates/{}", self.base_url, id)
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, DeliveryOutcome> {
        let method = request.method;
        let url = request.url.clone();
        match self.client.execute(request).await {
            Ok(response) => {
                debug!(%method, %url, status = response.status, "remote responded");
                *self.last_error.lock() = None;
                Ok(response)
            }
            Err(err) => {
                debug!(%method, %url, error = %err, "remote unreachable");
                *self.last_error.lock() = Some(err.clone());
                Err(DeliveryOutcome::transient(err))
            }
        }
    }

    async fn resolve(&self, mutation: &Mutation) -> Resolved {
        let Some(email) = mutation.target.natural_key() else {
            return Resolved::Failed(DeliveryOutcome::Rejected(Rejection::validation(
                "mutation has neither a remote id nor an email",
            )));
        };

        let url = format!(
            "{}/candidates/by-email/{}",
            self.base_url,
            urlencoding::encode(email)
        );
        let response = match self.execute(HttpRequest::new(HttpMethod::Get, url)).await {
            Ok(response) => response,
            Err(outcome) => return Resolved::Failed(outcome),
        };

        if response.status == 404 {
            return Resolved::Missing;
        }
        match classify_response(MutationKind::Update, &response) {
            DeliveryOutcome::Delivered {
                remote_id: Some(id),
            } => Resolved::Found {
                id,
                row: response.json_body().unwrap_or(Value::Null),
            },
            DeliveryOutcome::Delivered { remote_id: None } => Resolved::Failed(
                DeliveryOutcome::transient("candidate lookup returned no id"),
            ),
            other => Resolved::Failed(other),
        }
    }

    fn request_for(
        &self,
        mutation: &Mutation,
        remote_id: Option<i64>,
    ) -> Result<HttpRequest, DeliveryOutcome> {
        let body = Value::Object(mutation.payload.clone());
        match (mutation.kind, remote_id) {
            (MutationKind::Create, _) => {
                Ok(HttpRequest::new(HttpMethod::Post, self.collection_url()).with_body(body))
            }
            (MutationKind::Update, Some(id)) => {
                Ok(HttpRequest::new(HttpMethod::Put, self.entity_url(id)).with_body(body))
            }
            (MutationKind::Delete, Some(id)) => {
                Ok(HttpRequest::new(HttpMethod::Delete, self.entity_url(id)))
            }
            (_, None) => Err(DeliveryOutcome::Rejected(Rejection::other(format!(
                "{} has no remote id",
                mutation.describe()
            )))),
        }
    }

    async fn reconcile_create(
        &self,
        mutation: &Mutation,
        rejected: DeliveryOutcome,
    ) -> DeliveryOutcome {
        match self.resolve(mutation).await {
            Resolved::Found { id, row } if same_candidate(&row, &mutation.payload) => {
                debug!(
                    mutation_id = %mutation.id,
                    remote_id = id,
                    "create was applied by an earlier attempt"
                );
                DeliveryOutcome::Delivered { remote_id: Some(id) }
            }
            Resolved::Failed(outcome @ DeliveryOutcome::Transient { .. }) => outcome,
            _ => rejected,
        }
    }
}

#[async_trait]
impl<C: HttpClient> RemoteClient for HttpRemoteClient<C> {
    async fn send(&self, mutation: &Mutation) -> DeliveryOutcome {
        if mutation.entity_type != CANDIDATE {
            return DeliveryOutcome::Rejected(Rejection::other(format!(
                "unsupported entity type '{}'",
                mutation.entity_type
            )));
        }

        let remote_id = match (mutation.kind, mutation.target.remote_id) {
            (MutationKind::Create, _) => None,
            (_, Some(id)) => Some(id),
            (kind, None) => match self.resolve(mutation).await {
                Resolved::Found { id, .. } => Some(id),
                Resolved::Missing if kind == MutationKind::Delete => {
                    return DeliveryOutcome::delivered()
                }
                Resolved::Missing => {
                    return DeliveryOutcome::Rejected(Rejection::not_found(format!(
                        "no candidate registered with {}",
                        mutation.target.natural_key().unwrap_or_default()
                    )))
                }
                Resolved::Failed(outcome) => return outcome,
            },
        };

        let request = match self.request_for(mutation, remote_id) {
            Ok(request) => request,
            Err(outcome) => return outcome,
        };
        let response = match self.execute(request).await {
            Ok(response) => response,
            Err(outcome) => return outcome,
        };

        match classify_response(mutation.kind, &response) {
            DeliveryOutcome::Delivered { remote_id: None } => {
                DeliveryOutcome::Delivered { remote_id }
            }
            outcome
                if mutation.kind == MutationKind::Create
                    && mutation.attempt > 0
                    && is_unique_violation(&outcome) =>
            {
                self.reconcile_create(mutation, outcome).await
            }
            outcome => outcome,
        }
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a request and returns the response.
    fn handle(&self, request: &HttpRequest) -> HttpResponse;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        (**self).handle(request)
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead. Marking it
/// unreachable makes every request fail like a dropped connection.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    reachable: AtomicBool,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            reachable: AtomicBool::new(true),
        }
    }

    /// Simulates losing or regaining the network path.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err("connection refused".into());
        }
        Ok(self.server.handle(&request))
    }
}

#[async_trait]
impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        (**self).execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_sync_protocol::{EntityTarget, MutationId, NewMutation, Payload, RejectionKind};
    use serde_json::json;

    fn response(status: u16, body: Value) -> HttpResponse {
        HttpResponse::json(status, &body)
    }

    #[test]
    fn success_reports_remote_id() {
        let outcome = classify_response(MutationKind::Create, &response(201, json!({"id": 12})));
        assert_eq!(outcome, DeliveryOutcome::Delivered { remote_id: Some(12) });
    }

    #[test]
    fn duplicate_email_is_a_unique_violation() {
        for resp in [
            HttpResponse::error(400, "Email already registered"),
            HttpResponse::error(409, "conflict"),
        ] {
            let outcome = classify_response(MutationKind::Create, &resp);
            assert!(
                matches!(outcome, DeliveryOutcome::Rejected(ref r) if r.is_unique_violation()),
                "{:?}",
                outcome
            );
        }
    }

    #[test]
    fn client_errors_are_permanent() {
        let outcome = classify_response(MutationKind::Update, &HttpResponse::error(422, "bad"));
        assert!(matches!(
            outcome,
            DeliveryOutcome::Rejected(Rejection { kind: RejectionKind::Validation, .. })
        ));

        let outcome = classify_response(MutationKind::Update, &HttpResponse::error(404, "gone"));
        assert!(matches!(
            outcome,
            DeliveryOutcome::Rejected(Rejection { kind: RejectionKind::NotFound, .. })
        ));

        let outcome = classify_response(MutationKind::Create, &HttpResponse::error(403, "no"));
        assert!(matches!(
            outcome,
            DeliveryOutcome::Rejected(Rejection { kind: RejectionKind::Other, .. })
        ));
    }

    #[test]
    fn deleting_a_missing_row_counts_as_delivered() {
        let outcome = classify_response(MutationKind::Delete, &HttpResponse::error(404, "gone"));
        assert_eq!(outcome, DeliveryOutcome::delivered());
    }

    #[test]
    fn server_trouble_is_transient() {
        for status in [408, 425, 429, 500, 502, 503] {
            let outcome = classify_response(MutationKind::Create, &HttpResponse::error(status, "busy"));
            assert!(
                matches!(outcome, DeliveryOutcome::Transient { .. }),
                "status {status}"
            );
        }
    }

    struct Recorder {
        requests: Mutex<Vec<HttpRequest>>,
        replies: Mutex<Vec<HttpResponse>>,
    }

    impl Recorder {
        fn new(replies: Vec<HttpResponse>) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                replies: Mutex::new(replies),
            }
        }
    }

    impl LoopbackServer for Recorder {
        fn handle(&self, request: &HttpRequest) -> HttpResponse {
            self.requests.lock().push(request.clone());
            let mut replies = self.replies.lock();
            if replies.is_empty() {
                HttpResponse::error(500, "no reply scripted")
            } else {
                replies.remove(0)
            }
        }
    }

    #[tokio::test]
    async fn update_by_email_resolves_id_first() {
        let server = Arc::new(Recorder::new(vec![
            response(200, json!({"id": 4, "email": "a+b@x.com"})),
            response(200, json!({"id": 4})),
        ]));
        let client = HttpRemoteClient::new("http://api.local/", LoopbackClient::new(Arc::clone(&server)));

        let mut payload = Payload::new();
        payload.insert("difficulty".into(), json!("senior"));
        let m = NewMutation::update("candidate", EntityTarget::by_natural_key("a+b@x.com"), payload)
            .into_mutation(MutationId::new(), 1);

        assert_eq!(client.send(&m).await, DeliveryOutcome::Delivered { remote_id: Some(4) });

        let requests = server.requests.lock();
        assert_eq!(requests[0].method, HttpMethod::Get);
        assert_eq!(requests[0].url, "http://api.local/candidates/by-email/a%2Bb%40x.com");
        assert_eq!(requests[1].method, HttpMethod::Put);
        assert_eq!(requests[1].url, "http://api.local/candidates/4");
        assert_eq!(requests[1].body, Some(json!({"difficulty": "senior"})));
    }

    #[tokio::test]
    async fn delete_of_unknown_email_is_a_no_op() {
        let server = Arc::new(Recorder::new(vec![HttpResponse::error(404, "Candidate not found")]));
        let client = HttpRemoteClient::new("http://api.local", LoopbackClient::new(Arc::clone(&server)));
        let m = NewMutation::delete("candidate", EntityTarget::by_natural_key("gone@x.com"))
            .into_mutation(MutationId::new(), 1);

        assert_eq!(client.send(&m).await, DeliveryOutcome::delivered());
        assert_eq!(server.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_server_is_transient() {
        let loopback = LoopbackClient::new(Recorder::new(Vec::new()));
        loopback.set_reachable(false);
        let client = HttpRemoteClient::new("http://api.local", loopback);
        let m = NewMutation::delete("candidate", EntityTarget::by_remote_id(1))
            .into_mutation(MutationId::new(), 1);

        assert!(matches!(client.send(&m).await, DeliveryOutcome::Transient { .. }));
        assert_eq!(client.last_error().as_deref(), Some("connection refused"));
    }

    fn retried_create(email: &str, attempt: u32) -> Mutation {
        let mut payload = Payload::new();
        payload.insert("name".into(), json!("Ada Lovelace"));
        payload.insert("email".into(), json!(email));
        let mut m = NewMutation::create("candidate", payload).into_mutation(MutationId::new(), 1);
        m.attempt = attempt;
        m
    }

    #[tokio::test]
    async fn retried_create_adopts_the_row_it_already_wrote() {
        let server = Arc::new(Recorder::new(vec![
            HttpResponse::error(400, "Email already registered"),
            response(200, json!({"id": 9, "name": "Ada Lovelace", "email": "ada@x.com"})),
        ]));
        let client = HttpRemoteClient::new("http://api.local", LoopbackClient::new(Arc::clone(&server)));

        let outcome = client.send(&retried_create("ada@x.com", 1)).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { remote_id: Some(9) });

        let requests = server.requests.lock();
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(requests[1].url, "http://api.local/candidates/by-email/ada%40x.com");
    }

    #[tokio::test]
    async fn first_attempt_duplicate_stays_rejected() {
        let server = Arc::new(Recorder::new(vec![HttpResponse::error(400, "Email already registered")]));
        let client = HttpRemoteClient::new("http://api.local", LoopbackClient::new(Arc::clone(&server)));

        let outcome = client.send(&retried_create("ada@x.com", 0)).await;
        assert!(is_unique_violation(&outcome));
        assert_eq!(server.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn retried_create_against_someone_elses_row_stays_rejected() {
        let server = Arc::new(Recorder::new(vec![
            HttpResponse::error(409, "conflict"),
            response(200, json!({"id": 3, "name": "Augusta King", "email": "ada@x.com"})),
        ]));
        let client = HttpRemoteClient::new("http://api.local", LoopbackClient::new(Arc::clone(&server)));

        let outcome = client.send(&retried_create("ada@x.com", 2)).await;
        assert!(is_unique_violation(&outcome));
        assert_eq!(server.requests.lock().len(), 2);
    }

    #[test]
    fn update_without_remote_id_is_never_posted() {
        let client = HttpRemoteClient::new("http://api.local", LoopbackClient::new(Recorder::new(Vec::new())));
        let update = NewMutation::update("candidate", EntityTarget::by_natural_key("a@x.com"), Payload::new())
            .into_mutation(MutationId::new(), 1);
        let delete = NewMutation::delete("candidate", EntityTarget::by_natural_key("a@x.com"))
            .into_mutation(MutationId::new(), 2);

        for m in [&update, &delete] {
            assert!(matches!(
                client.request_for(m, None),
                Err(DeliveryOutcome::Rejected(Rejection { kind: RejectionKind::Other, .. }))
            ));
        }
        assert_eq!(client.request_for(&update, Some(3)).unwrap().method, HttpMethod::Put);
        assert_eq!(
            client.request_for(&retried_create("a@x.com", 0), None).unwrap().method,
            HttpMethod::Post
        );
    }
}
