//! End-to-end sync runs against the in-process fake API.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::fake_api::{bills, context, settings, FakeCongressApi};
use congress_sync::config::CurrentCongressPolicy;
use congress_sync::sink::mock::CollectingSink;
use congress_sync::sink::{Ack, Cell, JsonlSink, Row, RowSink, SinkError};
use congress_sync::state::mock::MemoryStateStore;
use congress_sync::state::{FileStateStore, StateError, SyncState};
use congress_sync::sync::{DriverStatus, SyncError, SyncOrchestrator};
use serde_json::{json, Value};

fn members(ids: &[&str]) -> Vec<Value> {
    ids.iter()
        .map(|id| json!({"bioguideId": id, "name": format!("Member {id}"), "state": "Ohio"}))
        .collect()
}

fn two_congress_api() -> FakeCongressApi {
    FakeCongressApi::new()
        .list("bill/117", "bills", bills(117, 5))
        .list("bill/118", "bills", bills(118, 3))
        .list("member/congress/117", "members", members(&["A1", "B1"]))
        .list("member/congress/118", "members", members(&["B1", "C1"]))
        .detail("member/A1", json!({"member": {"bioguideId": "A1", "birthYear": "1950"}}))
        .detail("member/B1", json!({"member": {"bioguideId": "B1", "birthYear": "1960"}}))
        .detail("member/C1", json!({"member": {"bioguideId": "C1", "birthYear": "1970"}}))
}

fn list_calls(transport: &congress_sync::http::mock::MockTransport) -> usize {
    transport
        .calls()
        .iter()
        .filter(|r| r.query_value("offset").is_some())
        .count()
}

fn rows(sink: &CollectingSink, table: &str) -> Vec<Row> {
    sink.batches_for(table)
        .into_iter()
        .flat_map(|b| b.rows)
        .collect()
}

/// A complete run followed by a second run makes no list requests at all.
#[tokio::test]
async fn test_rerun_after_done_is_idempotent() {
    let transport = Arc::new(two_congress_api().into_transport());
    let store = Arc::new(MemoryStateStore::new());

    let sink = Arc::new(CollectingSink::new());
    let first = SyncOrchestrator::new(context(
        transport.clone(),
        store.clone(),
        sink.clone(),
        &["bill", "member"],
        settings(117, 118, 2),
    ));
    let report = first.run().await.expect("first run");

    assert!(report.is_clean());
    assert_eq!(sink.row_count("bill"), 8);
    assert_eq!(sink.row_count("member"), 4);
    assert_eq!(report.last_processed_congress, 117);
    let member_rows = rows(&sink, "member");
    assert_eq!(member_rows[0]["congress"], Cell::Int(117));
    assert_eq!(
        member_rows[0]["detail"],
        Cell::Json(json!({"bioguideId": "A1", "birthYear": "1950"}))
    );

    let calls_before = transport.calls().len();
    let rerun_sink = Arc::new(CollectingSink::new());
    let second = SyncOrchestrator::new(context(
        transport.clone(),
        store,
        rerun_sink.clone(),
        &["bill", "member"],
        settings(117, 118, 2),
    ));
    let report = second.run().await.expect("second run");

    assert_eq!(transport.calls().len(), calls_before);
    assert!(rerun_sink.batches().is_empty());
    assert!(report.outcomes().all(|o| o.status == DriverStatus::Done && o.pages == 0));
}

/// Stopping mid-endpoint and resuming yields exactly the rows of an uninterrupted run.
#[tokio::test]
async fn test_crash_then_resume_matches_uninterrupted_run() {
    let api = FakeCongressApi::new().list("bill/118", "bills", bills(118, 7));

    let reference = Arc::new(CollectingSink::new());
    SyncOrchestrator::new(context(
        Arc::new(api.clone().into_transport()),
        Arc::new(MemoryStateStore::new()),
        reference.clone(),
        &["bill"],
        settings(118, 118, 2),
    ))
    .run()
    .await
    .expect("reference run");

    // Sink dies on the third page.
    let store = Arc::new(MemoryStateStore::new());
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    let crashing = Arc::new(CollectingSink::with_verdict(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 2 {
            Err(SinkError::Io("connection reset".into()))
        } else {
            Ok(Ack::Accepted)
        }
    }));
    let report = SyncOrchestrator::new(context(
        Arc::new(api.clone().into_transport()),
        store.clone(),
        crashing.clone(),
        &["bill"],
        settings(118, 118, 2),
    ))
    .run()
    .await
    .expect("interrupted run still reports");
    assert!(report.failed_endpoints.contains("bill"));
    assert_eq!(crashing.row_count("bill"), 4);

    let persisted: SyncState =
        serde_json::from_slice(&store.blob().expect("checkpoint")).expect("valid checkpoint");
    let cursor = persisted.cursor("bill", 118).expect("bill cursor");
    assert_eq!(cursor.offset, 4);
    assert!(!cursor.done);

    let resumed = Arc::new(CollectingSink::new());
    SyncOrchestrator::new(context(
        Arc::new(api.into_transport()),
        store,
        resumed.clone(),
        &["bill"],
        settings(118, 118, 2),
    ))
    .run()
    .await
    .expect("resumed run");

    let mut combined = rows(&crashing, "bill");
    combined.extend(rows(&resumed, "bill"));
    assert_eq!(combined, rows(&reference, "bill"));
}

/// One endpoint failing leaves the others untouched and blocks congress completion.
#[tokio::test]
async fn test_failed_endpoint_is_isolated() {
    let transport = Arc::new(two_congress_api().failing("member/congress/117").into_transport());
    let sink = Arc::new(CollectingSink::new());
    let sync = SyncOrchestrator::new(context(
        transport.clone(),
        Arc::new(MemoryStateStore::new()),
        sink.clone(),
        &["bill", "member"],
        settings(117, 118, 2),
    ));

    let report = sync.run().await.expect("run");

    assert_eq!(report.failed_endpoints.iter().collect::<Vec<_>>(), vec!["member"]);
    assert_eq!(sink.row_count("bill"), 8);
    assert_eq!(sink.row_count("member"), 0);
    assert_eq!(transport.count_matching("member/congress/118"), 0);
    assert!(!report.congresses[0].complete);
    assert_eq!(report.last_processed_congress, 117);

    let state = sync.context().state.snapshot().await;
    assert!(state.cursor("bill", 118).is_some_and(|c| c.done));
    assert!(state.cursor("member", 117).is_none());
    assert!(state.endpoint_last_sync_at.contains_key("bill"));
    assert!(!state.endpoint_last_sync_at.contains_key("member"));
}

/// A checkpoint that cannot be written stops the run.
#[tokio::test]
async fn test_state_persist_failure_is_fatal() {
    let store = Arc::new(MemoryStateStore::new());
    store.fail_writes(true);
    let sync = SyncOrchestrator::new(context(
        Arc::new(two_congress_api().into_transport()),
        store,
        Arc::new(CollectingSink::new()),
        &["bill"],
        settings(117, 118, 2),
    ));

    let result = sync.run().await;

    assert!(matches!(result, Err(SyncError::StatePersist(StateError::Io(_)))));
}

/// A corrupt checkpoint is reported, never silently reset.
#[tokio::test]
async fn test_corrupt_checkpoint_is_an_error() {
    let transport = Arc::new(two_congress_api().into_transport());
    let sync = SyncOrchestrator::new(context(
        transport.clone(),
        Arc::new(MemoryStateStore::with_blob(b"{\"last_processed_congress\":".to_vec())),
        Arc::new(CollectingSink::new()),
        &["bill"],
        settings(117, 118, 2),
    ));

    let result = sync.run().await;

    assert!(matches!(result, Err(SyncError::StatePersist(StateError::Corrupt(_)))));
    assert!(transport.calls().is_empty());
}

/// Cancellation raised while a page is in flight stops the driver before the next page.
#[tokio::test]
async fn test_cancellation_between_pages() {
    let transport = Arc::new(
        FakeCongressApi::new()
            .list("bill/118", "bills", bills(118, 9))
            .into_transport(),
    );
    let store = Arc::new(MemoryStateStore::new());
    let ctx = context(
        transport.clone(),
        store.clone(),
        Arc::new(CollectingSink::new()),
        &["bill"],
        settings(118, 118, 3),
    );
    let cancel = ctx.cancel.clone();
    let pages = Arc::new(AtomicUsize::new(0));
    let seen = pages.clone();
    let sink: Arc<dyn RowSink> = Arc::new(CollectingSink::with_verdict(move |_| {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            cancel.store(true, Ordering::SeqCst);
        }
        Ok(Ack::Accepted)
    }));
    let sync = SyncOrchestrator::new(congress_sync::sync::SyncContext { sink, ..ctx });

    let report = sync.run().await.expect("run");

    assert!(report.cancelled);
    assert_eq!(pages.load(Ordering::SeqCst), 1);
    assert_eq!(list_calls(&transport), 1);
    let cursor = sync.context().state.cursor("bill", 118).await;
    assert_eq!(cursor.offset, 3);
    assert!(!cursor.done);
    assert!(store.writes() >= 2);
}

/// Refresh policy re-reads the current congress with an update window.
#[tokio::test]
async fn test_refresh_policy_rereads_current_congress() {
    let transport = Arc::new(
        FakeCongressApi::new()
            .list("bill/118", "bills", bills(118, 2))
            .into_transport(),
    );
    let store = Arc::new(MemoryStateStore::new());
    let mut refresh = settings(118, 118, 250);
    refresh.policy = CurrentCongressPolicy::Refresh;

    for _ in 0..2 {
        SyncOrchestrator::new(context(
            transport.clone(),
            store.clone(),
            Arc::new(CollectingSink::new()),
            &["bill"],
            refresh.clone(),
        ))
        .run()
        .await
        .expect("run");
    }

    let lists: Vec<_> = transport
        .calls()
        .into_iter()
        .filter(|r| r.url.ends_with("/bill/118"))
        .collect();
    assert_eq!(lists.len(), 2);
    assert!(lists[0].query_value("fromDateTime").is_none());
    assert!(lists[1].query_value("fromDateTime").is_some());
    assert_eq!(lists[1].query_value("sort"), Some("updateDate asc"));
}

/// Real collaborators: JSON-lines output and an on-disk checkpoint.
#[tokio::test]
async fn test_file_backed_run_writes_tables_and_checkpoint() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state_path = dir.path().join("state").join("checkpoint.json");
    let out_dir = dir.path().join("out");

    let sync = SyncOrchestrator::new(context(
        Arc::new(two_congress_api().into_transport()),
        Arc::new(FileStateStore::new(&state_path)),
        Arc::new(JsonlSink::new(&out_dir)),
        &["bill", "member"],
        settings(117, 118, 2),
    ));
    sync.run().await.expect("run");

    let bill_lines = std::fs::read_to_string(out_dir.join("bill.jsonl")).expect("bill table");
    assert_eq!(bill_lines.lines().count(), 8);
    let first: Value = serde_json::from_str(bill_lines.lines().next().expect("line")).expect("json");
    assert_eq!(first["congress"], json!(117));
    assert_eq!(first["detail"], Value::Null);

    let state: SyncState =
        serde_json::from_slice(&std::fs::read(&state_path).expect("checkpoint")).expect("state");
    assert_eq!(state.last_processed_congress, 117);
    assert!(state.cursor("member", 118).is_some_and(|c| c.done && c.offset == 2));
}

/// A checkpoint failure in one driver stops the drivers running alongside it.
#[tokio::test]
async fn test_checkpoint_failure_stops_sibling_drivers() {
    let transport = Arc::new(
        FakeCongressApi::new()
            .list("bill/118", "bills", bills(118, 20))
            .list("amendment/118", "amendments", bills(118, 20))
            .into_transport()
            .with_delay(|_| Duration::from_millis(5)),
    );
    let store = Arc::new(MemoryStateStore::new());
    store.fail_next_writes(1);
    let sink = Arc::new(CollectingSink::new());
    let sync = SyncOrchestrator::new(context(
        transport.clone(),
        store.clone(),
        sink.clone(),
        &["bill", "amendment"],
        settings(118, 118, 2),
    ));

    let result = sync.run().await;

    assert!(matches!(result, Err(SyncError::StatePersist(StateError::Io(_)))));
    assert!(sync.context().is_cancelled());
    // One page per driver, plus at most one request the surviving driver already sent.
    assert!(list_calls(&transport) <= 3, "lists: {}", list_calls(&transport));
    assert!(sink.batches().len() <= 2);
    assert!(store.writes() <= 1);
}

/// A refresh interrupted in one run and finished in the next only counts as synced up to
/// the end of its frozen window.
#[tokio::test]
async fn test_resumed_refresh_records_window_end() {
    let transport = Arc::new(
        FakeCongressApi::new()
            .list("bill/118", "bills", bills(118, 4))
            .into_transport(),
    );
    let store = Arc::new(MemoryStateStore::new());
    let mut refresh = settings(118, 118, 2);
    refresh.policy = CurrentCongressPolicy::Refresh;
    let run = |sink: Arc<CollectingSink>| {
        SyncOrchestrator::new(context(
            transport.clone(),
            store.clone(),
            sink,
            &["bill"],
            refresh.clone(),
        ))
    };
    let bill_lists = || -> Vec<congress_sync::http::ApiRequest> {
        transport
            .calls()
            .into_iter()
            .filter(|r| r.url.ends_with("/bill/118"))
            .collect()
    };

    run(Arc::new(CollectingSink::new())).run().await.expect("full run");

    // Reopened with a window ending at this run's start, then the sink fails.
    let failing = Arc::new(CollectingSink::with_verdict(|_| {
        Err(SinkError::Io("disk full".into()))
    }));
    let interrupted = run(failing).run().await.expect("interrupted run");
    assert!(interrupted.failed_endpoints.contains("bill"));
    let window_end = interrupted.started_at;

    let before_resume = bill_lists().len();
    let resumed = run(Arc::new(CollectingSink::new())).run().await.expect("resumed run");
    assert!(resumed.is_clean());
    assert!(resumed.started_at > window_end);

    let to = window_end.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let resumed_lists = bill_lists().split_off(before_resume);
    assert!(!resumed_lists.is_empty());
    assert!(resumed_lists
        .iter()
        .all(|r| r.query_value("toDateTime") == Some(to.as_str())));

    let state: SyncState =
        serde_json::from_slice(&store.blob().expect("checkpoint")).expect("state");
    assert_eq!(state.endpoint_last_sync_at.get("bill"), Some(&window_end));

    // The next refresh starts where the resumed window ended.
    let before_next = bill_lists().len();
    run(Arc::new(CollectingSink::new())).run().await.expect("next refresh");
    let next = bill_lists().split_off(before_next);
    assert_eq!(next[0].query_value("fromDateTime"), Some(to.as_str()));
}

/// At most `worker_limit` endpoint drivers talk to the API at once.
#[tokio::test]
async fn test_drivers_bounded_by_worker_limit() {
    let transport = Arc::new(
        FakeCongressApi::new()
            .list("bill/118", "bills", vec![])
            .list("amendment/118", "amendments", vec![])
            .list("member/congress/118", "members", vec![])
            .list("nomination/118", "nominations", vec![])
            .list("treaty/118", "treaties", vec![])
            .into_transport()
            .with_delay(|_| Duration::from_millis(10)),
    );
    let mut limited = settings(118, 118, 250);
    limited.worker_limit = 2;

    let report = SyncOrchestrator::new(context(
        transport.clone(),
        Arc::new(MemoryStateStore::new()),
        Arc::new(CollectingSink::new()),
        &["bill", "amendment", "member", "nomination", "treaty"],
        limited,
    ))
    .run()
    .await
    .expect("run");

    assert!(report.is_clean());
    assert_eq!(list_calls(&transport), 5);
    assert_eq!(transport.max_in_flight(), 2);
}
