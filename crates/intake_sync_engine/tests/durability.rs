//! Journal durability: restarts, torn writes, locking and compaction.

use intake_storage::{InMemoryBackend, StorageBackend, StorageError};
use intake_sync_engine::{
    ConnectivityMonitor, DurableStore, JournalStore, MockRemote, SyncConfig, SyncEngine,
    SyncError, SyncStatus,
};
use intake_sync_protocol::{Mutation, MutationId, MutationStatus};
use intake_testkit::{
    candidate, delete_by_email, email_pool, mutation_ops_strategy, update_by_email,
    CrashableBackend, TempJournal,
};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn offline_engine<B: StorageBackend + 'static>(backend: B) -> SyncEngine {
    SyncEngine::open(
        SyncConfig::new("durability"),
        JournalStore::new(backend),
        MockRemote::new(),
        ConnectivityMonitor::new(false, Duration::ZERO),
    )
    .unwrap()
}

fn queued(n: u64, email: &str) -> Mutation {
    candidate("Ada", email).into_mutation(MutationId::new(), n)
}

#[test]
fn queue_survives_restart_on_disk() {
    let journal = TempJournal::new();

    let ids = {
        let engine = offline_engine(journal.open().unwrap());
        let a = engine.enqueue(candidate("Ada", "ada@x.com")).unwrap();
        let b = engine.enqueue(candidate("Grace", "grace@x.com")).unwrap();
        let c = engine
            .enqueue(update_by_email("ada@x.com", json!({"difficulty": "junior"})))
            .unwrap();
        vec![a, b, c]
    };

    let engine = offline_engine(journal.open().unwrap());
    let reloaded: Vec<_> = engine.mutations().iter().map(|m| m.id).collect();
    assert_eq!(reloaded, ids);
    assert_eq!(engine.get_state().pending_count, 3);
    assert_eq!(engine.get_state().status, SyncStatus::Idle);
}

#[test]
fn second_owner_is_locked_out() {
    let journal = TempJournal::new();
    let _owner = journal.open().unwrap();

    let err = journal.open().unwrap_err();
    assert!(matches!(err, StorageError::Locked { .. }));
}

#[test]
fn crash_mid_append_loses_only_the_torn_record() {
    let disk = InMemoryBackend::new();
    let backend = CrashableBackend::new(Box::new(disk.clone()));
    let control = backend.control();

    let engine = offline_engine(backend);
    let kept = engine.enqueue(candidate("Ada", "ada@x.com")).unwrap();
    let intact_len = disk.bytes().len();

    control.crash_after(7);
    let err = engine
        .enqueue(candidate("Grace", "grace@x.com"))
        .unwrap_err();
    assert!(err.is_persistence_failure());
    assert_eq!(engine.get_state().pending_count, 1);
    assert_eq!(disk.bytes().len(), intact_len + 7);
    drop(engine);

    let engine = offline_engine(disk.clone());
    let ids: Vec<_> = engine.mutations().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![kept]);
    assert_eq!(disk.bytes().len(), intact_len);
}

#[test]
fn failing_fsync_rejects_the_enqueue() {
    let disk = InMemoryBackend::new();
    let backend = CrashableBackend::new(Box::new(disk.clone()));
    let control = backend.control();
    let engine = offline_engine(backend);

    control.set_fail_on_sync(true);
    let err = engine.enqueue(candidate("Ada", "ada@x.com")).unwrap_err();
    assert!(matches!(err, SyncError::Persistence(_)));
    assert_eq!(engine.get_state().pending_count, 0);
    assert!(engine.mutations().is_empty());
}

#[tokio::test]
async fn delivered_mutations_leave_the_journal() {
    let journal = TempJournal::new();
    {
        let remote = Arc::new(MockRemote::new());
        let engine = SyncEngine::open(
            SyncConfig::new("durability"),
            JournalStore::new(journal.open().unwrap()),
            Arc::clone(&remote),
            ConnectivityMonitor::new(true, Duration::ZERO),
        )
        .unwrap();
        engine.enqueue(candidate("Ada", "ada@x.com")).unwrap();
        engine.enqueue(delete_by_email("old@x.com")).unwrap();
        assert_eq!(engine.flush().await.delivered, 2);
        assert_eq!(remote.call_count(), 2);
    }

    // An emptied queue truncates the journal.
    assert!(journal.bytes().is_empty());
    let engine = offline_engine(journal.open().unwrap());
    assert!(engine.mutations().is_empty());
}

#[test]
fn corrupted_middle_record_refuses_to_open() {
    let disk = InMemoryBackend::new();
    let mut store = JournalStore::new(disk.clone());
    store.load().unwrap();
    store.append(&queued(1, "a@x.com")).unwrap();
    store.append(&queued(2, "b@x.com")).unwrap();

    disk.corrupt_with(|bytes| bytes[20] ^= 0xFF);
    let mut reopened = JournalStore::new(disk);
    assert!(matches!(reopened.load(), Err(SyncError::Corrupted { .. })));
}

#[test]
fn damaged_length_field_keeps_the_journal_intact() {
    let disk = InMemoryBackend::new();
    let mut store = JournalStore::new(disk.clone());
    store.load().unwrap();
    store.append(&queued(1, "a@x.com")).unwrap();
    store.append(&queued(2, "b@x.com")).unwrap();

    // High byte of the first record's length.
    disk.corrupt_with(|bytes| bytes[10] = 0x7F);
    let damaged = disk.bytes();

    let mut reopened = JournalStore::new(disk.clone());
    assert!(matches!(reopened.load(), Err(SyncError::Corrupted { .. })));
    assert_eq!(disk.bytes(), damaged);
}

#[test]
fn compaction_keeps_order_and_unknown_fields() {
    let disk = InMemoryBackend::new();
    let mut store = JournalStore::new(disk.clone()).with_compaction_threshold(3);
    store.load().unwrap();

    let a = queued(1, "a@x.com");
    let mut b = queued(2, "b@x.com");
    b.extra.insert("ui_draft".into(), json!({"step": 3}));
    let c = queued(3, "c@x.com");
    for m in [&a, &b, &c] {
        store.append(m).unwrap();
    }

    let mut retried = b.clone();
    retried.attempt = 2;
    store.update(&retried).unwrap();
    store.remove(&a.id).unwrap();
    let mut failed = c.clone();
    failed.status = MutationStatus::Failed;
    store.update(&failed).unwrap();

    // The removal left three dead records and triggered a rewrite down to
    // two; the last update was appended after it.
    let stats = store.stats().unwrap();
    assert_eq!(stats.live, 2);
    assert_eq!(stats.records, 3);

    let mut reopened = JournalStore::new(InMemoryBackend::with_data(disk.bytes()));
    let live = reopened.load().unwrap();
    assert_eq!(live, vec![retried, failed]);
    assert_eq!(live[0].extra["ui_draft"], json!({"step": 3}));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn reload_matches_every_acknowledged_append(
        ops in mutation_ops_strategy(4, 12),
        crash_at in 0usize..4096,
    ) {
        let pool = email_pool(4);
        let disk = InMemoryBackend::new();
        let backend = CrashableBackend::new(Box::new(disk.clone()));
        backend.control().crash_after(crash_at);

        let mut store = JournalStore::new(backend).with_compaction_threshold(0);
        store.load().unwrap();

        let mut acknowledged = Vec::new();
        for (seq, op) in ops.iter().enumerate() {
            let m = op.to_new_mutation(&pool).into_mutation(MutationId::new(), seq as u64 + 1);
            if store.append(&m).is_ok() {
                acknowledged.push(m);
            }
        }

        let mut reopened = JournalStore::new(disk.clone());
        let live = reopened.load().unwrap();
        prop_assert_eq!(live, acknowledged);
    }
}
