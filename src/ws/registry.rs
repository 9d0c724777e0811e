use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc::UnboundedSender;

use crate::models::{Identity, ServerMessage};

pub type ConnId = String;

/// Everything the hub tracks about one live socket.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub identity: Identity,
    pub sender: UnboundedSender<ServerMessage>,
    /// Work order whose form room this connection has joined, if any
    pub form_room: Option<String>,
    /// Work order whose video room this connection has joined, if any
    pub video_room: Option<String>,
}

/// Registry of live connections with a reverse user index, so notifications
/// can fan out to every open tab/device of one user.
#[derive(Default)]
pub struct ConnectionRegistry {
    conns: HashMap<ConnId, ConnectionHandle>,
    by_user: HashMap<String, HashSet<ConnId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: re-registering the same connection id replaces the handle.
    pub fn register(&mut self, conn_id: ConnId, handle: ConnectionHandle) {
        self.by_user
            .entry(handle.identity.user_id.clone())
            .or_default()
            .insert(conn_id.clone());
        self.conns.insert(conn_id, handle);
    }

    /// Removes the connection and returns its handle so the caller can run
    /// the cleanup cascade. After this returns, no lookup will see the
    /// connection again.
    pub fn unregister(&mut self, conn_id: &str) -> Option<ConnectionHandle> {
        let handle = self.conns.remove(conn_id)?;
        if let Some(conns) = self.by_user.get_mut(&handle.identity.user_id) {
            conns.remove(conn_id);
            if conns.is_empty() {
                self.by_user.remove(&handle.identity.user_id);
            }
        }
        Some(handle)
    }

    pub fn get(&self, conn_id: &str) -> Option<&ConnectionHandle> {
        self.conns.get(conn_id)
    }

    pub fn get_mut(&mut self, conn_id: &str) -> Option<&mut ConnectionHandle> {
        self.conns.get_mut(conn_id)
    }

    pub fn connections_of_user(&self, user_id: &str) -> Vec<ConnId> {
        self.by_user
            .get(user_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// Sends a message to one connection. A closed receiver is not an error,
    /// the connection is about to be unregistered anyway.
    pub fn send_to(&self, conn_id: &str, msg: ServerMessage) {
        if let Some(handle) = self.conns.get(conn_id) {
            let _ = handle.sender.send(msg);
        }
    }
}
