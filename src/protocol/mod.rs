//! Wire protocol spoken between glide clients and the rendezvous server
// (c) 2025 The glided developers

//! # Protocol overview
//!
//! The protocol is a bare framing and session layer over a byte stream.
//! Every frame starts with a one-byte type code; see [`wire::Message`] for
//! the catalog and field layouts.
//!
//! A session runs like this:
//!
//! * Client ➡️ Server: Username (1). The server replies Username OK (2),
//!   INVALID (3) or TAKEN (4); the client may retry until it gets OK.
//!   Names are INVALID when empty, NUL-bearing, or longer than
//!   [`MAX_USERNAME_LEN`](crate::server::MAX_USERNAME_LEN) bytes.
//! * Client ➡️ Server: Command (9) frames: `list`, `reqs`, `glide`, `ok`,
//!   `no`. Queries are answered with Connected users (7) or Incoming
//!   requests (8); the rest with Command succeeded (11) / failed (10).
//! * Accepting a `glide` creates a transfer: the server tells the original
//!   requester to proceed (11), then relays its File metadata (5) and File
//!   chunk (6) frames to the acceptor unchanged.
//!
//! There is no end-of-transfer frame; a transfer is complete when the
//! relayed bytes reach the size declared in the metadata.
//!
//! Client disconnected (12) is sent to a peer whose pending request or
//! in-flight transfer just lost its counterparty; clients send the same
//! code as an explicit goodbye.

pub mod wire;

use tokio::io::{AsyncRead, AsyncWrite};

/// Marker trait for streams used for sending data
pub trait SendingStream: AsyncWrite + Send + Unpin {}
impl SendingStream for tokio::net::tcp::OwnedWriteHalf {}
impl SendingStream for tokio::io::WriteHalf<tokio::io::DuplexStream> {}

#[cfg(test)]
impl SendingStream for tokio_test::io::Mock {}

/// Marker trait for streams used for receiving data
pub trait ReceivingStream: AsyncRead + Send + Unpin {}
impl ReceivingStream for tokio::net::tcp::OwnedReadHalf {}
impl ReceivingStream for tokio::io::ReadHalf<tokio::io::DuplexStream> {}

#[cfg(test)]
impl ReceivingStream for tokio_test::io::Mock {}

/// Syntactic sugar helper type
#[derive(Debug)]
pub struct SendReceivePair<S: SendingStream, R: ReceivingStream> {
    /// outbound data
    pub send: S,
    /// inbound data
    pub recv: R,
}

impl<S: SendingStream, R: ReceivingStream> From<(S, R)> for SendReceivePair<S, R> {
    fn from(value: (S, R)) -> Self {
        Self {
            send: value.0,
            recv: value.1,
        }
    }
}
