use std::collections::HashMap;

use super::registry::ConnId;

/// Exclusive claim on one editable field of one form entry.
#[derive(Debug, Clone)]
pub struct FieldLock {
    pub owner_conn: ConnId,
    pub owner_user: String,
    /// Work order room the lock was taken in, so releases triggered by
    /// disconnect know where to broadcast.
    pub work_order_id: String,
}

/// Outcome of a lock request. First writer wins; there is no queueing and a
/// denied request is never retried server-side.
#[derive(Debug)]
pub enum LockOutcome {
    Acquired,
    /// The caller already owns the lock; idempotent success.
    AlreadyOwned,
    /// Someone else holds it.
    Held(FieldLock),
}

/// Per-process field lock table, keyed by `(entryId, field)`.
///
/// Locks have no expiry of their own: they live exactly as long as the owning
/// connection, or until explicit unlock / entry completion. Transport-level
/// heartbeats are the only backstop for silent-but-connected owners.
#[derive(Default)]
pub struct LockTable {
    locks: HashMap<(String, String), FieldLock>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(
        &mut self,
        entry_id: &str,
        field: &str,
        conn_id: &str,
        user_id: &str,
        work_order_id: &str,
    ) -> LockOutcome {
        let key = (entry_id.to_string(), field.to_string());
        match self.locks.get(&key) {
            Some(lock) if lock.owner_conn == conn_id => LockOutcome::AlreadyOwned,
            Some(lock) => LockOutcome::Held(lock.clone()),
            None => {
                self.locks.insert(
                    key,
                    FieldLock {
                        owner_conn: conn_id.to_string(),
                        owner_user: user_id.to_string(),
                        work_order_id: work_order_id.to_string(),
                    },
                );
                LockOutcome::Acquired
            }
        }
    }

    /// Releases a lock if and only if `conn_id` owns it. Releasing a lock you
    /// don't own (or that doesn't exist) is a no-op, to tolerate duplicate or
    /// late unlock messages.
    pub fn release(&mut self, entry_id: &str, field: &str, conn_id: &str) -> bool {
        let key = (entry_id.to_string(), field.to_string());
        match self.locks.get(&key) {
            Some(lock) if lock.owner_conn == conn_id => {
                self.locks.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Clears every lock on one entry regardless of owner (entry completion).
    /// Returns the released `(field, lock)` pairs.
    pub fn release_entry(&mut self, entry_id: &str) -> Vec<(String, FieldLock)> {
        let keys: Vec<_> = self
            .locks
            .keys()
            .filter(|(e, _)| e == entry_id)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| {
                let lock = self.locks.remove(&key)?;
                Some((key.1, lock))
            })
            .collect()
    }

    /// Clears every lock one connection owns (disconnect cascade). Returns
    /// the released `(entry_id, field, lock)` triples.
    pub fn release_connection(&mut self, conn_id: &str) -> Vec<(String, String, FieldLock)> {
        let keys: Vec<_> = self
            .locks
            .iter()
            .filter(|(_, lock)| lock.owner_conn == conn_id)
            .map(|(key, _)| key.clone())
            .collect();
        keys.into_iter()
            .filter_map(|key| {
                let lock = self.locks.remove(&key)?;
                Some((key.0, key.1, lock))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }
}
