use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::timeout;

use super::hub::{CollabHub, SignalKind};
use crate::gateway::{EntryGateway, MemoryEntryGateway};
use crate::models::{EntryStatus, FormEntry, Identity, ServerMessage};

fn identity(user_id: &str) -> Identity {
    Identity {
        user_id: user_id.to_string(),
        organisation_id: "org1".to_string(),
        role: "OPERATOR".to_string(),
        permissions: vec!["WORK_ORDER_EDIT".to_string()],
    }
}

async fn hub_with_entry(entry_id: &str, work_order_id: &str) -> (Arc<CollabHub>, Arc<MemoryEntryGateway>) {
    let gateway = Arc::new(MemoryEntryGateway::new());
    gateway
        .insert_entry(FormEntry::new(entry_id, work_order_id))
        .await;
    (Arc::new(CollabHub::new(gateway.clone())), gateway)
}

async fn recv(rx: &mut UnboundedReceiver<ServerMessage>) -> ServerMessage {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

fn assert_no_event(rx: &mut UnboundedReceiver<ServerMessage>) {
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

/// Connects and consumes the `connection:ready` frame.
async fn connect(hub: &CollabHub, user: &str) -> (String, UnboundedReceiver<ServerMessage>) {
    let (conn_id, mut rx) = hub.connect(identity(user)).await;
    match recv(&mut rx).await {
        ServerMessage::ConnectionReady {
            connection_id,
            user_id,
        } => {
            assert_eq!(connection_id, conn_id);
            assert_eq!(user_id, user);
        }
        other => panic!("expected connection:ready, got {:?}", other),
    }
    (conn_id, rx)
}

#[tokio::test]
async fn lock_conflict_and_independent_fields() {
    let (hub, _) = hub_with_entry("e1", "wo1").await;
    let (conn_a, mut rx_a) = connect(&hub, "userA").await;
    let (conn_b, mut rx_b) = connect(&hub, "userB").await;
    hub.join_form(&conn_a, "wo1").await;
    hub.join_form(&conn_b, "wo1").await;

    // A takes the condition field; the whole room hears it
    hub.lock_field(&conn_a, "wo1", "e1", "condition").await;
    for rx in [&mut rx_a, &mut rx_b] {
        match recv(rx).await {
            ServerMessage::FormLocked {
                entry_id,
                field,
                user_id,
            } => {
                assert_eq!(entry_id, "e1");
                assert_eq!(field, "condition");
                assert_eq!(user_id, "userA");
            }
            other => panic!("expected form:locked, got {:?}", other),
        }
    }

    // B is denied the same field, privately
    hub.lock_field(&conn_b, "wo1", "e1", "condition").await;
    match recv(&mut rx_b).await {
        ServerMessage::FormLockDenied {
            entry_id,
            field,
            locked_by,
        } => {
            assert_eq!(entry_id, "e1");
            assert_eq!(field, "condition");
            assert_eq!(locked_by.user_id, "userA");
        }
        other => panic!("expected form:lock-denied, got {:?}", other),
    }
    assert_no_event(&mut rx_a);

    // But a different field of the same entry is free for B
    hub.lock_field(&conn_b, "wo1", "e1", "notes").await;
    match recv(&mut rx_b).await {
        ServerMessage::FormLocked { field, user_id, .. } => {
            assert_eq!(field, "notes");
            assert_eq!(user_id, "userB");
        }
        other => panic!("expected form:locked, got {:?}", other),
    }
}

#[tokio::test]
async fn re_locking_an_owned_field_reaffirms_without_broadcast() {
    let (hub, _) = hub_with_entry("e1", "wo1").await;
    let (conn_a, mut rx_a) = connect(&hub, "userA").await;
    let (conn_b, mut rx_b) = connect(&hub, "userB").await;
    hub.join_form(&conn_a, "wo1").await;
    hub.join_form(&conn_b, "wo1").await;

    hub.lock_field(&conn_a, "wo1", "e1", "condition").await;
    recv(&mut rx_a).await;
    recv(&mut rx_b).await;

    hub.lock_field(&conn_a, "wo1", "e1", "condition").await;
    assert!(matches!(
        recv(&mut rx_a).await,
        ServerMessage::FormLocked { .. }
    ));
    assert_no_event(&mut rx_b);
}

#[tokio::test]
async fn update_persists_before_broadcast() {
    let (hub, gateway) = hub_with_entry("e1", "wo1").await;
    let (conn_a, mut rx_a) = connect(&hub, "userA").await;
    let (conn_b, mut rx_b) = connect(&hub, "userB").await;
    hub.join_form(&conn_a, "wo1").await;
    hub.join_form(&conn_b, "wo1").await;

    hub.update_field(&conn_a, "wo1", "e1", "condition", json!("GOOD"))
        .await;

    // Both room members see the update, the sender included
    for rx in [&mut rx_a, &mut rx_b] {
        match recv(rx).await {
            ServerMessage::FormUpdated {
                entry_id,
                field,
                value,
            } => {
                assert_eq!(entry_id, "e1");
                assert_eq!(field, "condition");
                assert_eq!(value, json!("GOOD"));
            }
            other => panic!("expected form:updated, got {:?}", other),
        }
    }

    // And the store already holds the value
    let entry = gateway.read_entry("e1").await.unwrap().unwrap();
    assert_eq!(entry.fields["condition"], json!("GOOD"));
}

#[tokio::test]
async fn room_broadcasts_preserve_update_order() {
    let (hub, _) = hub_with_entry("e1", "wo1").await;
    let (conn_a, _rx_a) = connect(&hub, "userA").await;
    let (conn_b, mut rx_b) = connect(&hub, "userB").await;
    hub.join_form(&conn_a, "wo1").await;
    hub.join_form(&conn_b, "wo1").await;

    hub.update_field(&conn_a, "wo1", "e1", "condition", json!("FAIR"))
        .await;
    hub.update_field(&conn_a, "wo1", "e1", "condition", json!("GOOD"))
        .await;

    let first = recv(&mut rx_b).await;
    let second = recv(&mut rx_b).await;
    match (first, second) {
        (
            ServerMessage::FormUpdated { value: v1, .. },
            ServerMessage::FormUpdated { value: v2, .. },
        ) => {
            assert_eq!(v1, json!("FAIR"));
            assert_eq!(v2, json!("GOOD"));
        }
        other => panic!("expected two form:updated events, got {:?}", other),
    }
}

#[tokio::test]
async fn persistence_failure_reaches_caller_only() {
    let (hub, _) = hub_with_entry("e1", "wo1").await;
    let (conn_a, mut rx_a) = connect(&hub, "userA").await;
    let (conn_b, mut rx_b) = connect(&hub, "userB").await;
    hub.join_form(&conn_a, "wo1").await;
    hub.join_form(&conn_b, "wo1").await;

    // Unknown entry makes the gateway write fail
    hub.update_field(&conn_a, "wo1", "missing", "condition", json!("GOOD"))
        .await;

    assert!(matches!(recv(&mut rx_a).await, ServerMessage::Error { .. }));
    assert_no_event(&mut rx_b);
}

#[tokio::test]
async fn screenshots_append_in_submission_order() {
    let (hub, gateway) = hub_with_entry("e1", "wo1").await;
    let (conn_a, mut rx_a) = connect(&hub, "userA").await;
    hub.join_form(&conn_a, "wo1").await;

    hub.add_screenshot(&conn_a, "wo1", "e1", "data:image/jpeg;base64,one".into())
        .await;
    hub.add_screenshot(&conn_a, "wo1", "e1", "data:image/jpeg;base64,two".into())
        .await;

    // Sender hears both broadcasts too
    for expected in ["data:image/jpeg;base64,one", "data:image/jpeg;base64,two"] {
        match recv(&mut rx_a).await {
            ServerMessage::FormScreenshotAdded { data_url, .. } => {
                assert_eq!(data_url, expected)
            }
            other => panic!("expected form:screenshot-added, got {:?}", other),
        }
    }

    let entry = gateway.read_entry("e1").await.unwrap().unwrap();
    assert_eq!(
        entry.attachments,
        vec![
            "data:image/jpeg;base64,one".to_string(),
            "data:image/jpeg;base64,two".to_string()
        ]
    );
}

#[tokio::test]
async fn disconnect_releases_locks_and_frees_the_field() {
    let (hub, _) = hub_with_entry("e1", "wo1").await;
    let (conn_a, _rx_a) = connect(&hub, "userA").await;
    let (conn_b, mut rx_b) = connect(&hub, "userB").await;
    hub.join_form(&conn_a, "wo1").await;
    hub.join_form(&conn_b, "wo1").await;

    hub.lock_field(&conn_a, "wo1", "e1", "condition").await;
    recv(&mut rx_b).await; // form:locked

    hub.disconnect(&conn_a).await;
    match recv(&mut rx_b).await {
        ServerMessage::FormUnlocked { entry_id, field } => {
            assert_eq!(entry_id, "e1");
            assert_eq!(field, "condition");
        }
        other => panic!("expected form:unlocked, got {:?}", other),
    }

    // B can take the lock now
    hub.lock_field(&conn_b, "wo1", "e1", "condition").await;
    assert!(matches!(
        recv(&mut rx_b).await,
        ServerMessage::FormLocked { .. }
    ));
}

#[tokio::test]
async fn complete_marks_entry_and_clears_every_lock() {
    let (hub, gateway) = hub_with_entry("e1", "wo1").await;
    let (conn_a, mut rx_a) = connect(&hub, "userA").await;
    let (conn_b, mut rx_b) = connect(&hub, "userB").await;
    hub.join_form(&conn_a, "wo1").await;
    hub.join_form(&conn_b, "wo1").await;

    // Locks held by both connections on the entry
    hub.lock_field(&conn_a, "wo1", "e1", "condition").await;
    hub.lock_field(&conn_b, "wo1", "e1", "notes").await;
    for _ in 0..2 {
        recv(&mut rx_a).await;
        recv(&mut rx_b).await;
    }

    hub.complete_entry(&conn_a, "wo1", "e1").await;

    // Completion first, then an unlock per released lock
    match recv(&mut rx_b).await {
        ServerMessage::FormCompleted { entry_id } => assert_eq!(entry_id, "e1"),
        other => panic!("expected form:completed, got {:?}", other),
    }
    let mut unlocked_fields = Vec::new();
    for _ in 0..2 {
        match recv(&mut rx_b).await {
            ServerMessage::FormUnlocked { field, .. } => unlocked_fields.push(field),
            other => panic!("expected form:unlocked, got {:?}", other),
        }
    }
    unlocked_fields.sort();
    assert_eq!(unlocked_fields, vec!["condition", "notes"]);

    let entry = gateway.read_entry("e1").await.unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Completed);
    assert!(entry.completed_at.is_some());
    assert_eq!(entry.completed_by.as_deref(), Some("userA"));
}

#[tokio::test]
async fn unlock_by_non_owner_changes_nothing() {
    let (hub, _) = hub_with_entry("e1", "wo1").await;
    let (conn_a, mut rx_a) = connect(&hub, "userA").await;
    let (conn_b, mut rx_b) = connect(&hub, "userB").await;
    hub.join_form(&conn_a, "wo1").await;
    hub.join_form(&conn_b, "wo1").await;

    hub.lock_field(&conn_a, "wo1", "e1", "condition").await;
    recv(&mut rx_a).await;
    recv(&mut rx_b).await;

    hub.unlock_field(&conn_b, "wo1", "e1", "condition").await;
    assert_no_event(&mut rx_a);
    assert_no_event(&mut rx_b);

    // Still held: B gets denied
    hub.lock_field(&conn_b, "wo1", "e1", "condition").await;
    assert!(matches!(
        recv(&mut rx_b).await,
        ServerMessage::FormLockDenied { .. }
    ));
}

#[tokio::test]
async fn video_join_publishes_state_peers_and_counts() {
    let (hub, _) = hub_with_entry("e1", "wo1").await;
    let (conn_a, mut rx_a) = connect(&hub, "userA").await;
    let (conn_b, mut rx_b) = connect(&hub, "userB").await;

    hub.join_video(&conn_a, "wo1").await;
    match recv(&mut rx_a).await {
        ServerMessage::RoomState {
            participants,
            count,
        } => {
            assert!(participants.is_empty());
            assert_eq!(count, 1);
        }
        other => panic!("expected room:state, got {:?}", other),
    }
    match recv(&mut rx_a).await {
        ServerMessage::RoomCount {
            work_order_id,
            count,
        } => {
            assert_eq!(work_order_id, "wo1");
            assert_eq!(count, 1);
        }
        other => panic!("expected room:count, got {:?}", other),
    }

    hub.join_video(&conn_b, "wo1").await;
    match recv(&mut rx_a).await {
        ServerMessage::PeerJoined { connection_id } => assert_eq!(connection_id, conn_b),
        other => panic!("expected peer:joined, got {:?}", other),
    }
    assert!(matches!(
        recv(&mut rx_a).await,
        ServerMessage::RoomCount { count: 2, .. }
    ));
    match recv(&mut rx_b).await {
        ServerMessage::RoomState {
            participants,
            count,
        } => {
            assert_eq!(participants.len(), 1);
            assert_eq!(participants[0].connection_id, conn_a);
            assert_eq!(participants[0].user_id, "userA");
            assert_eq!(count, 2);
        }
        other => panic!("expected room:state, got {:?}", other),
    }
    assert!(matches!(
        recv(&mut rx_b).await,
        ServerMessage::RoomCount { count: 2, .. }
    ));
}

#[tokio::test]
async fn signal_relay_targets_exactly_one_peer() {
    let (hub, _) = hub_with_entry("e1", "wo1").await;
    let (conn_a, mut rx_a) = connect(&hub, "userA").await;
    let (conn_b, mut rx_b) = connect(&hub, "userB").await;
    let (_conn_c, mut rx_c) = connect(&hub, "userC").await;

    hub.join_video(&conn_a, "wo1").await;
    hub.join_video(&conn_b, "wo1").await;
    // Drain join chatter
    while rx_a.try_recv().is_ok() {}
    while rx_b.try_recv().is_ok() {}
    while rx_c.try_recv().is_ok() {}

    let offer = json!({"type": "offer", "sdp": "fake-offer-sdp"});
    hub.relay_signal(&conn_a, SignalKind::Offer, &conn_b, offer.clone())
        .await;

    match recv(&mut rx_b).await {
        ServerMessage::SignalOffer {
            from_connection_id,
            payload,
        } => {
            assert_eq!(from_connection_id, conn_a);
            assert_eq!(payload, offer);
        }
        other => panic!("expected signal:offer, got {:?}", other),
    }
    assert_no_event(&mut rx_a);
    assert_no_event(&mut rx_c);

    // Answer flows the other way
    let answer = json!({"type": "answer", "sdp": "fake-answer-sdp"});
    hub.relay_signal(&conn_b, SignalKind::Answer, &conn_a, answer.clone())
        .await;
    match recv(&mut rx_a).await {
        ServerMessage::SignalAnswer {
            from_connection_id,
            payload,
        } => {
            assert_eq!(from_connection_id, conn_b);
            assert_eq!(payload, answer);
        }
        other => panic!("expected signal:answer, got {:?}", other),
    }
}

#[tokio::test]
async fn relay_to_vanished_target_is_dropped_silently() {
    let (hub, _) = hub_with_entry("e1", "wo1").await;
    let (conn_a, mut rx_a) = connect(&hub, "userA").await;
    let (conn_b, _rx_b) = connect(&hub, "userB").await;
    hub.disconnect(&conn_b).await;

    hub.relay_signal(&conn_a, SignalKind::IceCandidate, &conn_b, json!({}))
        .await;
    assert_no_event(&mut rx_a);
}

#[tokio::test]
async fn room_count_reaches_form_listeners_without_joining_the_call() {
    let (hub, _) = hub_with_entry("e1", "wo1").await;
    let (form_conn, mut form_rx) = connect(&hub, "userA").await;
    let (call_conn, _call_rx) = connect(&hub, "userB").await;

    hub.join_form(&form_conn, "wo1").await;
    hub.join_video(&call_conn, "wo1").await;

    match recv(&mut form_rx).await {
        ServerMessage::RoomCount {
            work_order_id,
            count,
        } => {
            assert_eq!(work_order_id, "wo1");
            assert_eq!(count, 1);
        }
        other => panic!("expected room:count, got {:?}", other),
    }

    // And again when the call empties out
    hub.leave_video(&call_conn, "wo1").await;
    assert!(matches!(
        recv(&mut form_rx).await,
        ServerMessage::RoomCount { count: 0, .. }
    ));
}

#[tokio::test]
async fn disconnect_in_call_updates_the_count() {
    let (hub, _) = hub_with_entry("e1", "wo1").await;
    let (conn_a, mut rx_a) = connect(&hub, "userA").await;
    let (conn_b, _rx_b) = connect(&hub, "userB").await;

    hub.join_video(&conn_a, "wo1").await;
    hub.join_video(&conn_b, "wo1").await;
    while rx_a.try_recv().is_ok() {}

    hub.disconnect(&conn_b).await;
    assert!(matches!(
        recv(&mut rx_a).await,
        ServerMessage::RoomCount { count: 1, .. }
    ));
}

#[tokio::test]
async fn operations_from_a_disconnected_connection_do_nothing() {
    let (hub, _) = hub_with_entry("e1", "wo1").await;
    let (conn_a, _rx_a) = connect(&hub, "userA").await;
    let (conn_b, mut rx_b) = connect(&hub, "userB").await;
    hub.join_form(&conn_b, "wo1").await;

    hub.disconnect(&conn_a).await;

    // None of these may resurrect state for conn_a
    hub.join_form(&conn_a, "wo1").await;
    hub.lock_field(&conn_a, "wo1", "e1", "condition").await;
    hub.join_video(&conn_a, "wo1").await;
    assert_no_event(&mut rx_b);

    let snapshot = hub.snapshot().await;
    assert_eq!(snapshot.n_conn, 1);
    assert_eq!(snapshot.n_locks, 0);
    assert_eq!(snapshot.n_video_rooms, 0);
}

#[tokio::test]
async fn snapshot_counts_track_state() {
    let (hub, _) = hub_with_entry("e1", "wo1").await;
    let (conn_a, _rx_a) = connect(&hub, "userA").await;
    let (conn_b, _rx_b) = connect(&hub, "userB").await;

    hub.join_form(&conn_a, "wo1").await;
    hub.join_video(&conn_a, "wo1").await;
    hub.join_video(&conn_b, "wo1").await;
    hub.lock_field(&conn_a, "wo1", "e1", "condition").await;

    let snapshot = hub.snapshot().await;
    assert_eq!(snapshot.n_conn, 2);
    assert_eq!(snapshot.n_form_rooms, 1);
    assert_eq!(snapshot.n_video_rooms, 1);
    assert_eq!(snapshot.n_video_participants, 2);
    assert_eq!(snapshot.n_locks, 1);
}
