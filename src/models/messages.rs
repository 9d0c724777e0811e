use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A participant entry as exposed in `room:state`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub connection_id: String,
    pub user_id: String,
}

/// Owner summary carried by `form:lock-denied`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LockedBy {
    pub user_id: String,
}

/// Messages a client may send over the collaboration socket.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "form:join")]
    FormJoin { work_order_id: String },
    #[serde(rename = "form:lock")]
    FormLock {
        work_order_id: String,
        entry_id: String,
        field: String,
    },
    #[serde(rename = "form:unlock")]
    FormUnlock {
        work_order_id: String,
        entry_id: String,
        field: String,
    },
    #[serde(rename = "form:update")]
    FormUpdate {
        work_order_id: String,
        entry_id: String,
        field: String,
        value: Value,
    },
    #[serde(rename = "form:screenshot")]
    FormScreenshot {
        work_order_id: String,
        entry_id: String,
        data_url: String,
    },
    #[serde(rename = "form:complete")]
    FormComplete {
        work_order_id: String,
        entry_id: String,
    },
    #[serde(rename = "room:join")]
    RoomJoin { work_order_id: String },
    #[serde(rename = "room:leave")]
    RoomLeave { work_order_id: String },
    #[serde(rename = "signal:offer")]
    SignalOffer {
        target_connection_id: String,
        payload: Value,
    },
    #[serde(rename = "signal:answer")]
    SignalAnswer {
        target_connection_id: String,
        payload: Value,
    },
    #[serde(rename = "signal:ice-candidate")]
    SignalIceCandidate {
        target_connection_id: String,
        payload: Value,
    },
}

/// Messages the server pushes to clients.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// First frame on every connection; tells the client its server-side id.
    #[serde(rename = "connection:ready")]
    ConnectionReady {
        connection_id: String,
        user_id: String,
    },
    #[serde(rename = "form:locked")]
    FormLocked {
        entry_id: String,
        field: String,
        user_id: String,
    },
    #[serde(rename = "form:lock-denied")]
    FormLockDenied {
        entry_id: String,
        field: String,
        locked_by: LockedBy,
    },
    #[serde(rename = "form:updated")]
    FormUpdated {
        entry_id: String,
        field: String,
        value: Value,
    },
    #[serde(rename = "form:screenshot-added")]
    FormScreenshotAdded { entry_id: String, data_url: String },
    #[serde(rename = "form:completed")]
    FormCompleted { entry_id: String },
    #[serde(rename = "form:unlocked")]
    FormUnlocked { entry_id: String, field: String },
    #[serde(rename = "room:state")]
    RoomState {
        participants: Vec<ParticipantInfo>,
        count: usize,
    },
    #[serde(rename = "peer:joined")]
    PeerJoined { connection_id: String },
    #[serde(rename = "room:count")]
    RoomCount {
        work_order_id: String,
        count: usize,
    },
    #[serde(rename = "signal:offer")]
    SignalOffer {
        from_connection_id: String,
        payload: Value,
    },
    #[serde(rename = "signal:answer")]
    SignalAnswer {
        from_connection_id: String,
        payload: Value,
    },
    #[serde(rename = "signal:ice-candidate")]
    SignalIceCandidate {
        from_connection_id: String,
        payload: Value,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_form_lock() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"form:lock","workOrderId":"wo1","entryId":"e1","field":"condition"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::FormLock {
                work_order_id,
                entry_id,
                field,
            } => {
                assert_eq!(work_order_id, "wo1");
                assert_eq!(entry_id, "e1");
                assert_eq!(field, "condition");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn parses_signal_offer_with_opaque_payload() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"signal:offer","targetConnectionId":"c2","payload":{"type":"offer","sdp":"x"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::SignalOffer {
                target_connection_id,
                payload,
            } => {
                assert_eq!(target_connection_id, "c2");
                assert_eq!(payload["sdp"], "x");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn lock_denied_shape_matches_wire_format() {
        let msg = ServerMessage::FormLockDenied {
            entry_id: "e1".into(),
            field: "condition".into(),
            locked_by: LockedBy {
                user_id: "u1".into(),
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "form:lock-denied",
                "entryId": "e1",
                "field": "condition",
                "lockedBy": {"userId": "u1"}
            })
        );
    }

    #[test]
    fn room_count_shape_matches_wire_format() {
        let msg = ServerMessage::RoomCount {
            work_order_id: "wo1".into(),
            count: 2,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            json!({"type": "room:count", "workOrderId": "wo1", "count": 2})
        );
    }
}
