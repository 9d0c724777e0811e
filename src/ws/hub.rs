use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::locks::{LockOutcome, LockTable};
use super::registry::{ConnectionHandle, ConnectionRegistry, ConnId};
use super::rooms::{FormRooms, VideoRooms};
use crate::gateway::EntryGateway;
use crate::models::{Identity, LockedBy, ServerMessage};

/// Which WebRTC negotiation message a relay request carries. The payload
/// itself is never inspected.
#[derive(Debug, Clone, Copy)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

/// Room/lock/connection counters for the diagnostics endpoint.
pub struct HubSnapshot {
    pub n_conn: usize,
    pub n_form_rooms: usize,
    pub n_video_rooms: usize,
    pub n_video_participants: usize,
    pub n_locks: usize,
}

struct HubState {
    registry: ConnectionRegistry,
    locks: LockTable,
    form_rooms: FormRooms,
    video_rooms: VideoRooms,
}

/// Coordinator for all collaboration state in this process.
///
/// Every room, lock and registry mutation happens under one mutex, so lock
/// acquisitions for the same `(entryId, field)` always have a winner decided
/// by arrival order and no handler ever observes a half-applied mutation.
/// Gateway writes are awaited *outside* the mutex; only the broadcast for the
/// written operation waits on them, other rooms keep moving.
pub struct CollabHub {
    state: Mutex<HubState>,
    gateway: Arc<dyn EntryGateway>,
}

impl CollabHub {
    pub fn new(gateway: Arc<dyn EntryGateway>) -> Self {
        Self {
            state: Mutex::new(HubState {
                registry: ConnectionRegistry::new(),
                locks: LockTable::new(),
                form_rooms: FormRooms::new(),
                video_rooms: VideoRooms::new(),
            }),
            gateway,
        }
    }

    /// Registers a freshly authenticated connection and hands back its id and
    /// outbound message stream. The first message on the stream is
    /// `connection:ready`.
    pub async fn connect(&self, identity: Identity) -> (ConnId, UnboundedReceiver<ServerMessage>) {
        let conn_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.state.lock().await;
        state.registry.register(
            conn_id.clone(),
            ConnectionHandle {
                identity: identity.clone(),
                sender: tx,
                form_room: None,
                video_room: None,
            },
        );
        state.registry.send_to(
            &conn_id,
            ServerMessage::ConnectionReady {
                connection_id: conn_id.clone(),
                user_id: identity.user_id.clone(),
            },
        );
        info!("Connection {} registered for user {}", conn_id, identity.user_id);
        (conn_id, rx)
    }

    /// Disconnect cascade: release every lock the connection owns (with
    /// `form:unlocked` broadcasts), drop its room memberships and re-announce
    /// video room counts. After this, nothing can resurrect state for the
    /// connection.
    pub async fn disconnect(&self, conn_id: &str) {
        let mut state = self.state.lock().await;
        let Some(handle) = state.registry.unregister(conn_id) else {
            return;
        };
        info!("Connection {} disconnected, running cleanup", conn_id);

        for (entry_id, field, lock) in state.locks.release_connection(conn_id) {
            broadcast_form_room(
                &state,
                &lock.work_order_id,
                ServerMessage::FormUnlocked { entry_id, field },
            );
        }

        if let Some(work_order_id) = handle.form_room {
            state.form_rooms.leave(&work_order_id, conn_id);
        }

        if let Some(work_order_id) = handle.video_room {
            if let Some(count) = state.video_rooms.leave(&work_order_id, conn_id) {
                broadcast_room_count(&state, &work_order_id, count);
            }
        }
    }

    /// Joins the form editing room for a work order. Authorization to view
    /// the work order happens upstream; here an authenticated connection is
    /// enough.
    pub async fn join_form(&self, conn_id: &str, work_order_id: &str) {
        let mut state = self.state.lock().await;
        let previous = match state.registry.get_mut(conn_id) {
            Some(handle) => handle.form_room.replace(work_order_id.to_string()),
            None => return,
        };
        if let Some(previous) = previous {
            if previous != work_order_id {
                state.form_rooms.leave(&previous, conn_id);
            }
        }
        state.form_rooms.join(work_order_id, conn_id);
        debug!("Connection {} joined form room {}", conn_id, work_order_id);
    }

    pub async fn lock_field(&self, conn_id: &str, work_order_id: &str, entry_id: &str, field: &str) {
        let mut state = self.state.lock().await;
        let user_id = match state.registry.get(conn_id) {
            Some(handle) => handle.identity.user_id.clone(),
            None => return,
        };

        match state
            .locks
            .try_acquire(entry_id, field, conn_id, &user_id, work_order_id)
        {
            LockOutcome::Acquired => {
                broadcast_form_room(
                    &state,
                    work_order_id,
                    ServerMessage::FormLocked {
                        entry_id: entry_id.to_string(),
                        field: field.to_string(),
                        user_id,
                    },
                );
            }
            // Re-affirm to the holder only, nobody else needs to hear it
            LockOutcome::AlreadyOwned => {
                state.registry.send_to(
                    conn_id,
                    ServerMessage::FormLocked {
                        entry_id: entry_id.to_string(),
                        field: field.to_string(),
                        user_id,
                    },
                );
            }
            LockOutcome::Held(lock) => {
                debug!(
                    "Lock denied on ({}, {}) for {}: held by {}",
                    entry_id, field, conn_id, lock.owner_user
                );
                state.registry.send_to(
                    conn_id,
                    ServerMessage::FormLockDenied {
                        entry_id: entry_id.to_string(),
                        field: field.to_string(),
                        locked_by: LockedBy {
                            user_id: lock.owner_user,
                        },
                    },
                );
            }
        }
    }

    pub async fn unlock_field(
        &self,
        conn_id: &str,
        work_order_id: &str,
        entry_id: &str,
        field: &str,
    ) {
        let mut state = self.state.lock().await;
        // Only the owner releases; anything else is a tolerated no-op.
        if state.locks.release(entry_id, field, conn_id) {
            broadcast_form_room(
                &state,
                work_order_id,
                ServerMessage::FormUnlocked {
                    entry_id: entry_id.to_string(),
                    field: field.to_string(),
                },
            );
        }
    }

    /// Persists a field value, then broadcasts it to the whole room including
    /// the sender. The broadcast never precedes durability; on a gateway
    /// failure only the caller hears about it.
    ///
    /// Holding the field lock is *not* a precondition here: the lock is a UI
    /// affordance and the upstream behavior accepts unlocked updates.
    pub async fn update_field(
        &self,
        conn_id: &str,
        work_order_id: &str,
        entry_id: &str,
        field: &str,
        value: serde_json::Value,
    ) {
        if let Err(e) = self.gateway.write_field(entry_id, field, &value).await {
            warn!("Field write failed for entry {}: {}", entry_id, e);
            self.report_error(conn_id, format!("Failed to save field: {}", e))
                .await;
            return;
        }

        let state = self.state.lock().await;
        broadcast_form_room(
            &state,
            work_order_id,
            ServerMessage::FormUpdated {
                entry_id: entry_id.to_string(),
                field: field.to_string(),
                value,
            },
        );
    }

    /// Appends a screenshot data-URI to the entry's attachments, then
    /// broadcasts to the whole room including the sender.
    pub async fn add_screenshot(
        &self,
        conn_id: &str,
        work_order_id: &str,
        entry_id: &str,
        data_url: String,
    ) {
        if let Err(e) = self.gateway.append_attachment(entry_id, &data_url).await {
            warn!("Attachment append failed for entry {}: {}", entry_id, e);
            self.report_error(conn_id, format!("Failed to save screenshot: {}", e))
                .await;
            return;
        }

        let state = self.state.lock().await;
        broadcast_form_room(
            &state,
            work_order_id,
            ServerMessage::FormScreenshotAdded {
                entry_id: entry_id.to_string(),
                data_url,
            },
        );
    }

    /// Marks an entry completed, clears every lock on it (whoever owns them)
    /// and announces the completion followed by the individual unlocks so
    /// peers drop stale lock indicators.
    pub async fn complete_entry(&self, conn_id: &str, work_order_id: &str, entry_id: &str) {
        let user_id = {
            let state = self.state.lock().await;
            match state.registry.get(conn_id) {
                Some(handle) => handle.identity.user_id.clone(),
                None => return,
            }
        };

        if let Err(e) = self.gateway.mark_complete(entry_id, &user_id).await {
            warn!("Completion failed for entry {}: {}", entry_id, e);
            self.report_error(conn_id, format!("Failed to complete entry: {}", e))
                .await;
            return;
        }

        let mut state = self.state.lock().await;
        let released = state.locks.release_entry(entry_id);
        broadcast_form_room(
            &state,
            work_order_id,
            ServerMessage::FormCompleted {
                entry_id: entry_id.to_string(),
            },
        );
        for (field, lock) in released {
            broadcast_form_room(
                &state,
                &lock.work_order_id,
                ServerMessage::FormUnlocked {
                    entry_id: entry_id.to_string(),
                    field,
                },
            );
        }
    }

    /// Joins the video call room for a work order: replies with the current
    /// room state, tells the pre-existing members a peer arrived, and
    /// re-announces the count to callers and form-room onlookers alike.
    pub async fn join_video(&self, conn_id: &str, work_order_id: &str) {
        let mut state = self.state.lock().await;
        let (user_id, previous) = match state.registry.get_mut(conn_id) {
            Some(handle) => (
                handle.identity.user_id.clone(),
                handle.video_room.replace(work_order_id.to_string()),
            ),
            None => return,
        };

        // A connection is in at most one call at a time.
        if let Some(previous) = previous {
            if previous != work_order_id {
                if let Some(count) = state.video_rooms.leave(&previous, conn_id) {
                    broadcast_room_count(&state, &previous, count);
                }
            }
        }

        let (existing, count) = state.video_rooms.join(work_order_id, conn_id, &user_id);

        state.registry.send_to(
            conn_id,
            ServerMessage::RoomState {
                participants: existing.iter().map(|p| p.info()).collect(),
                count,
            },
        );
        for peer in &existing {
            state.registry.send_to(
                &peer.conn_id,
                ServerMessage::PeerJoined {
                    connection_id: conn_id.to_string(),
                },
            );
        }
        broadcast_room_count(&state, work_order_id, count);
        info!(
            "Connection {} joined video room {} ({} in call)",
            conn_id, work_order_id, count
        );
    }

    pub async fn leave_video(&self, conn_id: &str, work_order_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(handle) = state.registry.get_mut(conn_id) {
            if handle.video_room.as_deref() == Some(work_order_id) {
                handle.video_room = None;
            }
        }
        if let Some(count) = state.video_rooms.leave(work_order_id, conn_id) {
            broadcast_room_count(&state, work_order_id, count);
        }
    }

    /// Relays a WebRTC negotiation message verbatim to one target connection,
    /// tagged with the sender. A vanished target is dropped silently; the
    /// caller's own ICE timeouts are the failure signal.
    pub async fn relay_signal(
        &self,
        conn_id: &str,
        kind: SignalKind,
        target_connection_id: &str,
        payload: serde_json::Value,
    ) {
        let state = self.state.lock().await;
        if state.registry.get(conn_id).is_none() {
            return;
        }
        if state.registry.get(target_connection_id).is_none() {
            debug!(
                "Dropping {:?} relay from {}: target {} is gone",
                kind, conn_id, target_connection_id
            );
            return;
        }
        let from_connection_id = conn_id.to_string();
        let msg = match kind {
            SignalKind::Offer => ServerMessage::SignalOffer {
                from_connection_id,
                payload,
            },
            SignalKind::Answer => ServerMessage::SignalAnswer {
                from_connection_id,
                payload,
            },
            SignalKind::IceCandidate => ServerMessage::SignalIceCandidate {
                from_connection_id,
                payload,
            },
        };
        state.registry.send_to(target_connection_id, msg);
    }

    async fn report_error(&self, conn_id: &str, message: String) {
        let state = self.state.lock().await;
        state
            .registry
            .send_to(conn_id, ServerMessage::Error { message });
    }

    pub async fn snapshot(&self) -> HubSnapshot {
        let state = self.state.lock().await;
        HubSnapshot {
            n_conn: state.registry.len(),
            n_form_rooms: state.form_rooms.room_count(),
            n_video_rooms: state.video_rooms.room_count(),
            n_video_participants: state.video_rooms.participant_count(),
            n_locks: state.locks.len(),
        }
    }
}

fn broadcast_form_room(state: &HubState, work_order_id: &str, msg: ServerMessage) {
    for member in state.form_rooms.members(work_order_id) {
        state.registry.send_to(&member, msg.clone());
    }
}

/// The count goes to everyone in the call *and* to the form room of the same
/// work order, so form viewers can show "N in call" without joining.
fn broadcast_room_count(state: &HubState, work_order_id: &str, count: usize) {
    let mut targets: HashSet<ConnId> = state
        .video_rooms
        .participants(work_order_id)
        .into_iter()
        .map(|p| p.conn_id)
        .collect();
    targets.extend(state.form_rooms.members(work_order_id));

    let msg = ServerMessage::RoomCount {
        work_order_id: work_order_id.to_string(),
        count,
    };
    for target in targets {
        state.registry.send_to(&target, msg.clone());
    }
}
