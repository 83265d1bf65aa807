// (c) 2025 The glided developers

//! `glided` is the rendezvous server for the *glide* peer file-sharing tool.
//!
//! Clients connect over TCP, claim a unique username, discover each other,
//! and propose file transfers ("glides") to one another. Once a proposal is
//! accepted, the sender streams the file through the server in bounded
//! chunks and the server relays it to the recipient; file bytes never touch
//! the server's disk.
//!
//! ## Overview
//! - 📖 [The wire protocol](protocol): a one-byte-type-code framing layer
//!   with zero-terminated strings and big-endian integers
//! - 🔀 [The server](server): one task per connection, meeting only in a
//!   mutex-guarded hub that owns the username registry, the pending
//!   requests and the live transfers
//!
//! ## What glided is not
//!
//! * An end-to-end encryption layer (frames are relayed as received; run it
//!   somewhere you trust)
//! * A file store (nothing is retained; both parties must be connected)
//!
//! ## Running
//!
//! `glided` listens on all interfaces on port 5051 by default; see
//! `glided --help` for the knobs. Log verbosity follows `--debug`/`--quiet`
//! or the `RUST_LOG` environment variable.

pub mod cli;
pub use cli::cli as main;
pub mod protocol;
pub mod server;
pub(crate) mod util;
pub use util::TimeFormat;
