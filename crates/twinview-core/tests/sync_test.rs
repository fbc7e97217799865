#![allow(clippy::unwrap_used)]

// Integration tests for `TwinSynchronizer`: desired ordering, reported
// write coalescing, and snapshot refresh.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::broadcast;
use twinview_core::{
    CoreError, HubSession, InboundEvent, SessionConfig, SessionState, SyncEvent, TwinSynchronizer,
};

use common::{FakeHub, identity};

// ── Helpers ─────────────────────────────────────────────────────────

async fn started(hub: &Arc<FakeHub>) -> TwinSynchronizer {
    let session = HubSession::new(hub.connector(), SessionConfig::default());
    session.connect("hub-a.example.net", &identity()).await.unwrap();
    TwinSynchronizer::start(session).await.unwrap()
}

async fn next_event(events: &mut broadcast::Receiver<Arc<SyncEvent>>) -> Arc<SyncEvent> {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for sync event")
        .unwrap()
}

async fn next_desired_version(events: &mut broadcast::Receiver<Arc<SyncEvent>>) -> i64 {
    loop {
        if let SyncEvent::DesiredChanged { version, .. } = *next_event(events).await {
            return version;
        }
    }
}

// ── Seeding ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_seeds_snapshot_from_hub() {
    let hub = FakeHub::new();
    *hub.desired.lock().unwrap() = json!({ "interval": 10, "$version": 4 });
    *hub.reported.lock().unwrap() = json!({ "fw": "2.1" });

    let sync = started(&hub).await;
    let state = sync.state();

    assert_eq!(state.desired_version, 4);
    assert_eq!(state.desired["interval"], json!(10));
    assert_eq!(state.reported["fw"], json!("2.1"));
}

// ── Desired ordering ────────────────────────────────────────────────

#[tokio::test]
async fn test_out_of_order_desired_versions_are_ignored() {
    let hub = FakeHub::new();
    let sync = started(&hub).await;
    let mut events = sync.events();

    hub.push_desired(5, json!({ "a": 5, "$version": 5 }));
    hub.push_desired(3, json!({ "a": 3, "$version": 3 }));
    hub.push_desired(6, json!({ "b": 1, "$version": 6 }));

    assert_eq!(next_desired_version(&mut events).await, 5);
    assert_eq!(next_desired_version(&mut events).await, 6);

    let state = sync.state();
    assert_eq!(state.desired_version, 6);
    assert_eq!(state.desired["a"], json!(5));
    assert_eq!(state.desired["b"], json!(1));
}

#[tokio::test]
async fn test_duplicate_desired_version_applies_once() {
    let hub = FakeHub::new();
    let sync = started(&hub).await;
    let mut events = sync.events();

    hub.push_desired(2, json!({ "count": 1, "$version": 2 }));
    hub.push_desired(2, json!({ "count": 99, "$version": 2 }));
    hub.push_desired(3, json!({ "$version": 3 }));

    assert_eq!(next_desired_version(&mut events).await, 2);
    assert_eq!(next_desired_version(&mut events).await, 3);
    assert_eq!(sync.state().desired["count"], json!(1));
}

#[tokio::test]
async fn test_desired_null_removes_key() {
    let hub = FakeHub::new();
    *hub.desired.lock().unwrap() = json!({ "mode": "eco", "level": 2, "$version": 1 });
    let sync = started(&hub).await;
    let mut events = sync.events();

    hub.push_desired(2, json!({ "mode": null, "$version": 2 }));
    next_desired_version(&mut events).await;

    let desired = sync.state().desired;
    assert!(desired.get("mode").is_none());
    assert_eq!(desired["level"], json!(2));
}

#[tokio::test]
async fn test_malformed_desired_is_dropped_and_session_survives() {
    let hub = FakeHub::new();
    let sync = started(&hub).await;
    let mut events = sync.events();

    hub.push(InboundEvent::DesiredPatch {
        version: Some(9),
        payload: Bytes::from_static(b"{truncated"),
    });

    let event = next_event(&mut events).await;
    assert!(matches!(
        *event,
        SyncEvent::DecodeFailed {
            error: CoreError::Decode { .. }
        }
    ));
    assert_eq!(sync.state().desired_version, 1);
    assert_eq!(sync.session().state(), SessionState::Connected);
}

// ── Reported writes ─────────────────────────────────────────────────

#[tokio::test]
async fn test_write_refreshes_snapshot() {
    let hub = FakeHub::new();
    let sync = started(&hub).await;

    let ack = sync.update_twin(json!({ "battery": 87 })).await.unwrap();

    assert_eq!(ack.status, 204);
    let state = sync.state();
    assert_eq!(state.reported["battery"], json!(87));
    assert_eq!(state.reported_version(), ack.version);
}

#[tokio::test]
async fn test_failed_refresh_after_accepted_write_is_reported() {
    let hub = FakeHub::new();
    let sync = started(&hub).await;
    let mut events = sync.events();
    hub.fail_get.store(true, Ordering::SeqCst);

    let ack = sync.update_twin(json!({ "battery": 87 })).await.unwrap();

    assert_eq!(ack.status, 204);
    let event = next_event(&mut events).await;
    assert!(matches!(
        *event,
        SyncEvent::RefreshFailed {
            error: CoreError::Network { .. }
        }
    ));
    // The snapshot still predates the write.
    assert!(sync.state().reported.get("battery").is_none());
    assert_eq!(hub.reported.lock().unwrap()["battery"], json!(87));
}

#[tokio::test]
async fn test_writes_during_flight_coalesce_to_latest() {
    let hub = FakeHub::new();
    let sync = started(&hub).await;
    hub.close_gate();

    let first = tokio::spawn({
        let sync = sync.clone();
        async move { sync.update_twin(json!({ "step": 1 })).await }
    });
    hub.wait_for("first write on the wire", |h| h.patch_log().len() == 1)
        .await;

    let second = tokio::spawn({
        let sync = sync.clone();
        async move { sync.update_twin(json!({ "step": 2 })).await }
    });
    let third = tokio::spawn({
        let sync = sync.clone();
        async move { sync.update_twin(json!({ "step": 3 })).await }
    });
    // Let both callers enqueue behind the held write.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(hub.patch_log().len(), 1);

    hub.open_gate();
    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    let third = third.await.unwrap().unwrap();

    assert_eq!(hub.patch_log(), vec![json!({ "step": 1 }), json!({ "step": 3 })]);
    assert_eq!(second, third);
    assert_ne!(first.version, third.version);
    assert_eq!(sync.state().reported["step"], json!(3));

    // Nothing else is written once the queue drains.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(hub.patch_log().len(), 2);
}

#[tokio::test]
async fn test_rejected_write_reaches_every_coalesced_caller() {
    let hub = FakeHub::new();
    let sync = started(&hub).await;
    hub.close_gate();
    hub.patch_status.store(400, std::sync::atomic::Ordering::SeqCst);

    let first = tokio::spawn({
        let sync = sync.clone();
        async move { sync.update_twin(json!({ "a": 1 })).await }
    });
    hub.wait_for("first write on the wire", |h| h.patch_log().len() == 1)
        .await;
    let second = tokio::spawn({
        let sync = sync.clone();
        async move { sync.update_twin(json!({ "a": 2 })).await }
    });
    let third = tokio::spawn({
        let sync = sync.clone();
        async move { sync.update_twin(json!({ "a": 3 })).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    hub.open_gate();

    for handle in [first, second, third] {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, CoreError::Remote { status: 400, .. }), "got {err:?}");
    }
    assert_eq!(hub.patch_log().len(), 2);
}

#[tokio::test]
async fn test_write_after_disconnect_fails() {
    let hub = FakeHub::new();
    let sync = started(&hub).await;
    sync.session().disconnect().await;

    let err = sync.update_twin(json!({ "a": 1 })).await.unwrap_err();

    assert!(matches!(err, CoreError::NotConnected));
    assert!(hub.patch_log().is_empty());
}
