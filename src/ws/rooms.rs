use std::collections::{HashMap, HashSet};

use super::registry::ConnId;
use crate::models::ParticipantInfo;

/// Form room membership, keyed by work order id. Rooms are ephemeral; an
/// empty room is dropped.
#[derive(Default)]
pub struct FormRooms {
    rooms: HashMap<String, HashSet<ConnId>>,
}

impl FormRooms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, work_order_id: &str, conn_id: &str) {
        self.rooms
            .entry(work_order_id.to_string())
            .or_default()
            .insert(conn_id.to_string());
    }

    pub fn leave(&mut self, work_order_id: &str, conn_id: &str) {
        if let Some(members) = self.rooms.get_mut(work_order_id) {
            members.remove(conn_id);
            if members.is_empty() {
                self.rooms.remove(work_order_id);
            }
        }
    }

    pub fn members(&self, work_order_id: &str) -> Vec<ConnId> {
        self.rooms
            .get(work_order_id)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

/// One video call participant.
#[derive(Debug, Clone)]
pub struct Participant {
    pub conn_id: ConnId,
    pub user_id: String,
}

impl Participant {
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            connection_id: self.conn_id.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

/// Video room membership, keyed by work order id. Participants are kept in
/// join order; a room disappears when its last participant leaves.
#[derive(Default)]
pub struct VideoRooms {
    rooms: HashMap<String, Vec<Participant>>,
}

impl VideoRooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the caller and returns the participants that were already in
    /// the room, plus the new total count.
    pub fn join(
        &mut self,
        work_order_id: &str,
        conn_id: &str,
        user_id: &str,
    ) -> (Vec<Participant>, usize) {
        let room = self.rooms.entry(work_order_id.to_string()).or_default();
        let existing = room.clone();
        if !room.iter().any(|p| p.conn_id == conn_id) {
            room.push(Participant {
                conn_id: conn_id.to_string(),
                user_id: user_id.to_string(),
            });
        }
        (existing, room.len())
    }

    /// Removes the caller; returns the remaining count if it was a member.
    pub fn leave(&mut self, work_order_id: &str, conn_id: &str) -> Option<usize> {
        let room = self.rooms.get_mut(work_order_id)?;
        let before = room.len();
        room.retain(|p| p.conn_id != conn_id);
        if room.len() == before {
            return None;
        }
        let count = room.len();
        if room.is_empty() {
            self.rooms.remove(work_order_id);
        }
        Some(count)
    }

    pub fn participants(&self, work_order_id: &str) -> Vec<Participant> {
        self.rooms.get(work_order_id).cloned().unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn participant_count(&self) -> usize {
        self.rooms.values().map(|r| r.len()).sum()
    }
}
