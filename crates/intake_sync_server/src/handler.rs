//! Request routing and candidate endpoint handlers.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::{CandidatePatch, CandidateStore};
use intake_sync_protocol::{
    validate_candidate_payload, CandidateFields, HttpMethod, HttpRequest, MutationKind, Payload,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// A successful handler result: status and JSON body.
pub(crate) type Reply = (u16, Value);

/// Handler for candidate requests.
pub struct RequestHandler {
    config: ServerConfig,
    store: Arc<CandidateStore>,
}

impl RequestHandler {
    /// Creates a handler over `store`.
    pub fn new(config: ServerConfig, store: Arc<CandidateStore>) -> Self {
        Self { config, store }
    }

    /// Dispatches a request to its endpoint.
    ///
    /// Path segments before `candidates` are ignored.
    ///
    /// # Errors
    ///
    /// Returns the [`ServerError`] to render as the error response.
    pub fn route(&self, request: &HttpRequest) -> ServerResult<(u16, Value)> {
        let (path, query) = request
            .path()
            .split_once('?')
            .unwrap_or((request.path(), ""));
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some(start) = segments.iter().position(|s| *s == "candidates") else {
            return Err(ServerError::NoRoute);
        };

        match (request.method, &segments[start + 1..]) {
            (HttpMethod::Get, []) => self.handle_list(query),
            (HttpMethod::Post, []) => self.handle_create(request.body.as_ref()),
            (HttpMethod::Get, ["by-email", email]) => self.handle_find_by_email(email),
            (HttpMethod::Get, [id]) => self.handle_get(parse_id(id)?),
            (HttpMethod::Put, [id]) => self.handle_update(parse_id(id)?, request.body.as_ref()),
            (HttpMethod::Delete, [id]) => self.handle_delete(parse_id(id)?),
            (_, [] | [_] | ["by-email", _]) => Err(ServerError::MethodNotAllowed),
            _ => Err(ServerError::NoRoute),
        }
    }

    /// `GET /candidates?skip=&limit=`
    fn handle_list(&self, query: &str) -> ServerResult<Reply> {
        let mut skip = 0usize;
        let mut limit = self.config.default_page_size;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let parsed = value
                .parse::<usize>()
                .map_err(|_| ServerError::Validation(format!("{} must be a non-negative integer", key)));
            match key {
                "skip" => skip = parsed?,
                "limit" => limit = parsed?,
                _ => {}
            }
        }
        let limit = limit.min(self.config.max_page_size);
        let rows = self.store.list(skip, limit);
        Ok((200, to_json(&rows)?))
    }

    /// `POST /candidates`
    fn handle_create(&self, body: Option<&Value>) -> ServerResult<Reply> {
        let payload = self.validated(MutationKind::Create, body)?;
        let fields: CandidateFields = serde_json::from_value(Value::Object(payload))
            .map_err(|e| ServerError::Validation(e.to_string()))?;
        let candidate = self.store.create(fields)?;
        tracing::debug!(id = candidate.id, "candidate created");
        Ok((200, to_json(&candidate)?))
    }

    /// `GET /candidates/{id}`
    fn handle_get(&self, id: i64) -> ServerResult<Reply> {
        let candidate = self.store.get(id).ok_or(ServerError::NotFound)?;
        Ok((200, to_json(&candidate)?))
    }

    /// `GET /candidates/by-email/{email}`
    fn handle_find_by_email(&self, raw: &str) -> ServerResult<Reply> {
        let email = urlencoding::decode(raw)
            .map_err(|e| ServerError::InvalidRequest(format!("bad email encoding: {}", e)))?;
        let candidate = self.store.find_by_email(&email).ok_or(ServerError::NotFound)?;
        Ok((200, to_json(&candidate)?))
    }

    /// `PUT /candidates/{id}`
    fn handle_update(&self, id: i64, body: Option<&Value>) -> ServerResult<Reply> {
        let payload = self.validated(MutationKind::Update, body)?;
        let patch: CandidatePatch = serde_json::from_value(Value::Object(payload))
            .map_err(|e| ServerError::Validation(e.to_string()))?;
        let candidate = self.store.update(id, patch)?;
        tracing::debug!(id, "candidate updated");
        Ok((200, to_json(&candidate)?))
    }

    /// `DELETE /candidates/{id}`
    fn handle_delete(&self, id: i64) -> ServerResult<Reply> {
        self.store.delete(id)?;
        tracing::debug!(id, "candidate deleted");
        Ok((200, json!({"message": "Candidate deleted"})))
    }

    /// Checks the body shape and the configured limits.
    fn validated(&self, kind: MutationKind, body: Option<&Value>) -> ServerResult<Payload> {
        let payload = match body {
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(ServerError::Validation("body must be a JSON object".into())),
            None => return Err(ServerError::Validation("body is required".into())),
        };
        validate_candidate_payload(kind, &payload)
            .map_err(|e| ServerError::Validation(e.to_string()))?;

        if let Some(name) = payload.get("name").and_then(Value::as_str) {
            if name.trim().chars().count() > self.config.max_name_len {
                return Err(ServerError::Validation(format!(
                    "name exceeds {} characters",
                    self.config.max_name_len
                )));
            }
        }
        if let Some(categories) = payload.get("categories").and_then(Value::as_array) {
            if categories.len() > self.config.max_categories {
                return Err(ServerError::Validation(format!(
                    "at most {} categories are allowed",
                    self.config.max_categories
                )));
            }
        }
        Ok(payload)
    }
}

fn parse_id(raw: &str) -> ServerResult<i64> {
    raw.parse()
        .map_err(|_| ServerError::Validation(format!("candidate id '{}' is not an integer", raw)))
}

fn to_json<T: serde::Serialize>(value: &T) -> ServerResult<Value> {
    serde_json::to_value(value).map_err(|e| ServerError::Internal(e.to_string()))
}
