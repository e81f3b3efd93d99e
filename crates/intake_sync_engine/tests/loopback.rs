//! End-to-end tests: engine -> HTTP remote client -> reference server.

use intake_sync_engine::{
    ConnectivityMonitor, HttpRemoteClient, LoopbackClient, LoopbackServer, MemoryStore,
    RetryConfig, SyncConfig, SyncEngine, SyncStatus,
};
use intake_sync_protocol::{HttpMethod, HttpRequest, HttpResponse, RejectionKind};
use intake_sync_server::{ServerConfig, SyncServer};
use intake_testkit::{candidate, delete_by_email, update_by_email};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Routes loopback requests into an in-process server.
struct InProcessServer {
    server: Arc<SyncServer>,
}

impl LoopbackServer for InProcessServer {
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        self.server.handle(request)
    }
}

/// Applies requests but swallows the next `lose` responses, as a proxy
/// that times out after the backend committed would.
struct LossyGateway {
    server: Arc<SyncServer>,
    lose: AtomicUsize,
}

impl LoopbackServer for LossyGateway {
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        let response = self.server.handle(request);
        let lost = self
            .lose
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            HttpResponse::error(504, "Gateway Timeout")
        } else {
            response
        }
    }
}

type Client = Arc<LoopbackClient<InProcessServer>>;

struct Harness {
    server: Arc<SyncServer>,
    client: Client,
    engine: SyncEngine,
}

fn harness(online: bool) -> Harness {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let client = Arc::new(LoopbackClient::new(InProcessServer {
        server: Arc::clone(&server),
    }));
    let remote = HttpRemoteClient::new("http://intake.test/api/", Arc::clone(&client));

    let config = SyncConfig::new("loopback").with_retry(RetryConfig::immediate());
    let engine = SyncEngine::open(
        config,
        MemoryStore::new(),
        remote,
        ConnectivityMonitor::new(online, Duration::ZERO),
    )
    .unwrap();

    Harness {
        server,
        client,
        engine,
    }
}

fn register_directly(server: &SyncServer, name: &str, email: &str) -> i64 {
    let request = HttpRequest::new(HttpMethod::Post, "/candidates")
        .with_body(json!({"name": name, "email": email}));
    let response = server.handle(&request);
    assert_eq!(response.status, 200);
    response.json_body().unwrap()["id"].as_i64().unwrap()
}

#[tokio::test]
async fn offline_writes_reach_the_server_after_reconnect() {
    let h = harness(false);

    h.engine.enqueue(candidate("Ada Lovelace", "ada@x.com")).unwrap();
    h.engine.enqueue(candidate("Grace Hopper", "grace@x.com")).unwrap();
    h.engine
        .enqueue(update_by_email("ADA@x.com", json!({"difficulty": "senior"})))
        .unwrap();
    assert_eq!(h.engine.get_state().pending_count, 3);

    assert!(h.engine.flush().await.offline);
    assert_eq!(h.server.request_count(), 0);

    h.engine.connectivity().report(true);
    let report = h.engine.flush().await;
    assert_eq!(report.delivered, 3);

    let ada = h.server.store().find_by_email("ada@x.com").unwrap();
    assert_eq!(ada.difficulty.to_string(), "senior");
    assert_eq!(h.server.candidate_count(), 2);
    // The update rode on the id adopted from the create: no lookup needed.
    assert_eq!(h.server.request_count(), 3);

    let state = h.engine.get_state();
    assert_eq!(state.status, SyncStatus::Synced);
    assert_eq!(state.pending_count, 0);
}

#[tokio::test]
async fn duplicate_email_is_rejected_and_can_be_fixed() {
    let h = harness(true);
    register_directly(&h.server, "Ada (web)", "ada@x.com");

    let id = h.engine.enqueue(candidate("Ada Lovelace", "Ada@x.com")).unwrap();
    h.engine.enqueue(candidate("Grace Hopper", "grace@x.com")).unwrap();
    let report = h.engine.flush().await;
    assert_eq!(report.rejected, 1);
    assert_eq!(report.delivered, 1);

    let state = h.engine.get_state();
    assert_eq!(state.status, SyncStatus::Error);
    assert_eq!(state.pending_count, 1);
    assert!(state.last_error.unwrap().contains("Email already registered"));

    let failed = h.engine.failed();
    let rejection = failed[0].rejection.as_ref().unwrap();
    assert!(rejection.is_unique_violation());
    assert_eq!(
        rejection.kind,
        RejectionKind::UniqueViolation {
            field: "email".into()
        }
    );

    let fix = json!({"email": "ada.lovelace@x.com"});
    h.engine
        .requeue(id, Some(fix.as_object().cloned().unwrap()))
        .unwrap();
    assert_eq!(h.engine.flush().await.delivered, 1);

    assert_eq!(h.server.candidate_count(), 3);
    assert!(h.server.store().find_by_email("ada.lovelace@x.com").is_some());
    assert_eq!(h.engine.get_state().status, SyncStatus::Synced);
}

#[tokio::test]
async fn update_of_a_server_side_row_resolves_by_email() {
    let h = harness(true);
    let remote_id = register_directly(&h.server, "Ada", "ada+intake@x.com");

    h.engine
        .enqueue(update_by_email("ada+intake@x.com", json!({"test_duration_hours": 4})))
        .unwrap();
    assert_eq!(h.engine.flush().await.delivered, 1);

    let row = h.server.store().get(remote_id).unwrap();
    assert_eq!(row.test_duration_hours, 4);
}

#[tokio::test]
async fn update_of_an_unknown_email_is_not_found() {
    let h = harness(true);

    h.engine
        .enqueue(update_by_email("nobody@x.com", json!({"name": "Nobody"})))
        .unwrap();
    assert_eq!(h.engine.flush().await.rejected, 1);

    let failed = h.engine.failed();
    assert_eq!(
        failed[0].rejection.as_ref().unwrap().kind,
        RejectionKind::NotFound
    );
}

#[tokio::test]
async fn delete_of_a_missing_row_counts_as_delivered() {
    let h = harness(true);

    h.engine.enqueue(delete_by_email("gone@x.com")).unwrap();
    assert_eq!(h.engine.flush().await.delivered, 1);
    assert_eq!(h.engine.get_state().pending_count, 0);
}

#[tokio::test]
async fn server_outage_is_retried_until_it_recovers() {
    let h = harness(true);
    h.server.fail_next(2);

    h.engine.enqueue(candidate("Ada", "ada@x.com")).unwrap();
    assert_eq!(h.engine.flush().await.transient, 1);
    assert_eq!(h.engine.flush().await.transient, 1);
    assert_eq!(h.engine.get_state().pending_count, 1);

    assert_eq!(h.engine.retry_now().await.delivered, 1);
    assert_eq!(h.server.candidate_count(), 1);
    assert_eq!(h.server.request_count(), 3);
    assert_eq!(h.engine.mutations().len(), 0);
}

#[tokio::test]
async fn unreachable_network_is_transient() {
    let h = harness(true);
    h.client.set_reachable(false);

    h.engine.enqueue(candidate("Ada", "ada@x.com")).unwrap();
    let report = h.engine.flush().await;
    assert_eq!(report.transient, 1);
    assert_ne!(h.engine.get_state().status, SyncStatus::Error);
    assert_eq!(h.server.request_count(), 0);

    h.client.set_reachable(true);
    assert_eq!(h.engine.flush().await.delivered, 1);
}

#[tokio::test]
async fn server_side_validation_failure_is_permanent() {
    // Name limit stricter than client-side validation.
    let strict = Arc::new(SyncServer::new(ServerConfig::default().with_max_name_len(3)));
    let client = LoopbackClient::new(InProcessServer {
        server: Arc::clone(&strict),
    });
    let engine = SyncEngine::open(
        SyncConfig::new("strict"),
        MemoryStore::new(),
        HttpRemoteClient::new("http://intake.test", client),
        ConnectivityMonitor::default(),
    )
    .unwrap();

    engine.enqueue(candidate("Ada Lovelace", "ada@x.com")).unwrap();
    assert_eq!(engine.flush().await.rejected, 1);
    assert_eq!(
        engine.failed()[0].rejection.as_ref().unwrap().kind,
        RejectionKind::Validation
    );
    assert_eq!(strict.candidate_count(), 0);
}

#[tokio::test]
async fn create_applied_behind_a_lost_response_is_confirmed_on_retry() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let gateway = LossyGateway {
        server: Arc::clone(&server),
        lose: AtomicUsize::new(1),
    };
    let engine = SyncEngine::open(
        SyncConfig::new("lossy").with_retry(RetryConfig::immediate()),
        MemoryStore::new(),
        HttpRemoteClient::new("http://intake.test/api", LoopbackClient::new(gateway)),
        ConnectivityMonitor::default(),
    )
    .unwrap();

    engine.enqueue(candidate("Ada Lovelace", "ada@x.com")).unwrap();
    engine
        .enqueue(update_by_email("ada@x.com", json!({"difficulty": "senior"})))
        .unwrap();

    let report = engine.flush().await;
    assert_eq!(report.transient, 1);
    assert_eq!(server.candidate_count(), 1);

    let report = engine.flush().await;
    assert_eq!(report.delivered, 2);
    assert_eq!(report.rejected, 0);

    let state = engine.get_state();
    assert_eq!(state.status, SyncStatus::Synced);
    assert_eq!(state.pending_count, 0);
    assert_eq!(server.candidate_count(), 1);
    let ada = server.store().find_by_email("ada@x.com").unwrap();
    assert_eq!(ada.difficulty.to_string(), "senior");
}
