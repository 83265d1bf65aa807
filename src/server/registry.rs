//! Username registry: who is connected, and how to reach them
// (c) 2025 The glided developers

use super::session::{ConnId, OutboundQueue};

/// Maximum accepted username length, in bytes.
///
/// The wire format does not bound string fields, so the registry does;
/// anything longer is reported as invalid.
pub const MAX_USERNAME_LEN: usize = 32;

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The name is now bound to the connection
    Ok,
    /// The name failed validation; the client may try another
    Invalid,
    /// The name is held by another live connection
    Taken,
}

#[derive(Debug)]
struct Entry {
    name: String,
    conn: ConnId,
    queue: OutboundQueue,
}

/// The set of registered users, in registration order.
///
/// At most one live connection holds a given name at any time; the
/// check-and-insert in [`register`](Registry::register) is atomic because
/// the whole registry only ever lives behind the hub lock.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    users: Vec<Entry>,
}

/// Username validity: non-empty, no zero byte, within [`MAX_USERNAME_LEN`].
fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_USERNAME_LEN && !name.as_bytes().contains(&0)
}

impl Registry {
    pub(crate) fn register(
        &mut self,
        name: &str,
        conn: ConnId,
        queue: OutboundQueue,
    ) -> RegisterOutcome {
        if !valid_name(name) {
            return RegisterOutcome::Invalid;
        }
        if self.users.iter().any(|e| e.name == name) {
            return RegisterOutcome::Taken;
        }
        self.users.push(Entry {
            name: name.to_string(),
            conn,
            queue,
        });
        RegisterOutcome::Ok
    }

    /// Removes the given connection's binding, if any. Idempotent.
    /// Returns the name that was freed.
    pub(crate) fn unregister(&mut self, conn: ConnId) -> Option<String> {
        let idx = self.users.iter().position(|e| e.conn == conn)?;
        Some(self.users.remove(idx).name)
    }

    /// Snapshot of registered names, in registration order.
    pub(crate) fn list(&self) -> Vec<String> {
        self.users.iter().map(|e| e.name.clone()).collect()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.users.iter().any(|e| e.name == name)
    }

    /// Outbound queue handle for a registered user.
    pub(crate) fn queue_for(&self, name: &str) -> Option<OutboundQueue> {
        self.users
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.queue.clone())
    }
}
