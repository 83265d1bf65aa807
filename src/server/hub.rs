//! Shared rendezvous state and its single serialized access point
// (c) 2025 The glided developers

//! Every mutation of the user registry, the pending-request set and the
//! live-transfer table goes through a [`Hub`] method while its lock is
//! held. Hub methods never perform I/O and never await; instead they hand
//! back [`Notice`]s (a peer's queue handle plus the message it is owed)
//! which the calling connection task delivers after the lock is released.
//! No connection task ever touches another connection's state directly.

use std::sync::Mutex;

use human_repr::HumanDuration as _;
use tracing::debug;

use super::broker::Broker;
use super::registry::{RegisterOutcome, Registry};
use super::relay::{Relay, RelayError};
use super::session::{ConnId, OutboundQueue};
use crate::protocol::wire::{Message, RequestEntry};

/// A message owed to some other connection, to be delivered once the hub
/// lock has been released.
#[derive(Debug)]
pub(crate) struct Notice {
    pub queue: OutboundQueue,
    pub message: Message,
}

/// Command-level failures, reported to the client as a Command failed
/// frame; the connection stays up.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HubError {
    /// The glide target is not currently registered (or is the requester)
    #[error("target user is not connected")]
    UnknownUser,
    /// ok/no named a requester with nothing pending
    #[error("no matching transfer request")]
    NoSuchRequest,
    /// Metadata or chunk with no matching live transfer; fatal to the
    /// offending connection
    #[error("no active transfer matches this file")]
    UnexpectedData,
}

/// What became of a relayed metadata or chunk frame.
#[derive(Debug)]
pub(crate) enum FrameOutcome {
    /// Forward the frame; `completed` carries the byte total if this frame
    /// finished the transfer
    Forward {
        notice: Notice,
        completed: Option<u64>,
    },
    /// The frame overflowed the declared size: transfer aborted, the
    /// receiver is owed the given notices, and the sender must be told its
    /// command failed
    Aborted { notices: Vec<Notice> },
}

#[derive(Debug, Default)]
struct HubState {
    registry: Registry,
    broker: Broker,
    relay: Relay,
}

/// Process-wide rendezvous state.
#[derive(Debug, Default)]
pub(crate) struct Hub {
    inner: Mutex<HubState>,
}

impl Hub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::unwrap_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        // Hub methods cannot panic while holding the lock, so a poisoned
        // mutex means the process is already lost; propagating the panic
        // is the only sensible option.
        self.inner.lock().unwrap()
    }

    /// Atomic check-and-insert of a username.
    pub(crate) fn register(
        &self,
        conn: ConnId,
        name: &str,
        queue: OutboundQueue,
    ) -> RegisterOutcome {
        self.lock().registry.register(name, conn, queue)
    }

    /// Registered users, in registration order, without the requester.
    pub(crate) fn list_users(&self, requester: &str) -> Vec<String> {
        let mut users = self.lock().registry.list();
        users.retain(|u| u != requester);
        users
    }

    /// Unresolved requests addressed to `user`, in submission order.
    pub(crate) fn pending_for(&self, user: &str) -> Vec<RequestEntry> {
        self.lock().broker.pending_for(user)
    }

    /// Files a glide request from `from` to `to`.
    pub(crate) fn glide(&self, from: &str, to: &str, path: &str) -> Result<(), HubError> {
        let mut st = self.lock();
        if to == from || !st.registry.contains(to) {
            return Err(HubError::UnknownUser);
        }
        st.broker.submit(from, to, path);
        Ok(())
    }

    /// Resolves the oldest pending request from `from` addressed to `by`.
    ///
    /// On accept, a transfer is opened and the requester is owed a
    /// Command succeeded frame as its cue to start streaming; on reject the
    /// requester is owed Command failed. Either way the request is gone,
    /// so resolving it twice fails the second time.
    pub(crate) fn resolve(
        &self,
        by: &str,
        from: &str,
        accept: bool,
    ) -> Result<Vec<Notice>, HubError> {
        let mut st = self.lock();
        let req = st.broker.take(by, from).ok_or(HubError::NoSuchRequest)?;
        debug!(
            "request {from} -> {by} ({path}) {verdict} after {age}",
            path = req.path,
            verdict = if accept { "accepted" } else { "declined" },
            age = req.created.elapsed().human_duration()
        );
        if accept {
            st.relay.begin(from, by, &req.path);
        }
        let message = if accept {
            Message::CommandOk
        } else {
            Message::CommandFailed
        };
        Ok(st
            .registry
            .queue_for(from)
            .map(|queue| Notice { queue, message })
            .into_iter()
            .collect())
    }

    /// Relays a metadata frame from `sender`'s connection.
    pub(crate) fn relay_metadata(
        &self,
        sender: &str,
        filename: &str,
        size: u32,
        frame: Message,
    ) -> Result<FrameOutcome, HubError> {
        let mut st = self.lock();
        let relayed = st
            .relay
            .metadata(sender, filename, size)
            .map_err(|_| HubError::UnexpectedData)?;
        let Some(queue) = st.registry.queue_for(&relayed.receiver) else {
            return Err(HubError::UnexpectedData);
        };
        Ok(FrameOutcome::Forward {
            notice: Notice {
                queue,
                message: frame,
            },
            completed: relayed.completed,
        })
    }

    /// Relays a chunk frame from `sender`'s connection.
    pub(crate) fn relay_chunk(
        &self,
        sender: &str,
        filename: &str,
        len: usize,
        frame: Message,
    ) -> Result<FrameOutcome, HubError> {
        let mut st = self.lock();
        match st.relay.chunk(sender, filename, len) {
            Ok(relayed) => {
                let Some(queue) = st.registry.queue_for(&relayed.receiver) else {
                    return Err(HubError::UnexpectedData);
                };
                Ok(FrameOutcome::Forward {
                    notice: Notice {
                        queue,
                        message: frame,
                    },
                    completed: relayed.completed,
                })
            }
            Err(RelayError::Overflow { receiver }) => {
                let notices = st
                    .registry
                    .queue_for(&receiver)
                    .map(|queue| Notice {
                        queue,
                        message: Message::CommandFailed,
                    })
                    .into_iter()
                    .collect();
                Ok(FrameOutcome::Aborted { notices })
            }
            Err(RelayError::UnexpectedData) => Err(HubError::UnexpectedData),
        }
    }

    /// Drains a departing connection from every table, exactly once.
    ///
    /// Idempotent and safe to call for connections that never registered.
    /// Peers left holding a pending request or an in-flight transfer with
    /// the departed user are owed a Client disconnected frame.
    pub(crate) fn disconnect(&self, conn: ConnId) -> Vec<Notice> {
        let mut st = self.lock();
        let Some(name) = st.registry.unregister(conn) else {
            return Vec::new();
        };
        let mut affected: Vec<String> = Vec::new();
        for req in st.broker.drop_user(&name) {
            affected.push(if req.from == name { req.to } else { req.from });
        }
        for t in st.relay.drop_user(&name) {
            affected.push(if t.sender == name { t.receiver } else { t.sender });
        }
        affected.sort();
        affected.dedup();
        affected
            .into_iter()
            .filter_map(|peer| st.registry.queue_for(&peer))
            .map(|queue| Notice {
                queue,
                message: Message::PeerDisconnected,
            })
            .collect()
    }
}
