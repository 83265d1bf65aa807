//! Pending glide requests awaiting the target's accept/reject
// (c) 2025 The glided developers

use std::time::Instant;

use crate::protocol::wire::RequestEntry;

/// An unresolved glide proposal.
#[derive(Debug, Clone)]
pub(crate) struct PendingRequest {
    /// Who proposed the transfer
    pub from: String,
    /// Who it is addressed to
    pub to: String,
    /// The offered file, as the requester named it
    pub path: String,
    /// When the proposal arrived
    pub created: Instant,
}

/// The set of pending requests, in submission order.
///
/// Duplicate (from, to, path) submissions are allowed; resolution picks the
/// oldest match first.
#[derive(Debug, Default)]
pub(crate) struct Broker {
    pending: Vec<PendingRequest>,
}

impl Broker {
    pub(crate) fn submit(&mut self, from: &str, to: &str, path: &str) {
        self.pending.push(PendingRequest {
            from: from.to_string(),
            to: to.to_string(),
            path: path.to_string(),
            created: Instant::now(),
        });
    }

    /// The unresolved requests addressed to `user`, oldest first.
    pub(crate) fn pending_for(&self, user: &str) -> Vec<RequestEntry> {
        self.pending
            .iter()
            .filter(|r| r.to == user)
            .map(|r| RequestEntry {
                from: r.from.clone(),
                filename: r.path.clone(),
            })
            .collect()
    }

    /// Removes and returns the oldest request from `from` addressed to `by`.
    ///
    /// `None` means there is nothing to resolve; a second resolution of the
    /// same request lands here.
    pub(crate) fn take(&mut self, by: &str, from: &str) -> Option<PendingRequest> {
        let idx = self
            .pending
            .iter()
            .position(|r| r.to == by && r.from == from)?;
        Some(self.pending.remove(idx))
    }

    /// Invalidates every request naming `user` as either party.
    /// Returns what was dropped so the peers can be notified.
    pub(crate) fn drop_user(&mut self, user: &str) -> Vec<PendingRequest> {
        let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|r| r.from == user || r.to == user);
        self.pending = kept;
        dropped
    }
}
