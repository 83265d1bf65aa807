//! Message catalog and byte-level codec
// (c) 2025 The glided developers

//! All messages share the same framing: a single type-code byte, followed by
//! a type-specific payload. Strings are zero-terminated and must not contain
//! a zero byte; multi-byte integers are big-endian unsigned.
//!
//! [`Message::decode`] is incremental: it consumes exactly one frame from the
//! front of the buffer when one is fully present, and reports
//! `Ok(None)` when more bytes are needed. It never blocks.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum payload of a single file chunk (the wire carries a u16 length).
pub const CHUNK_DATA_LIMIT: usize = u16::MAX as usize;

/// Maximum entry count of a user or request listing (u16 on the wire).
pub const LIST_LIMIT: usize = u16::MAX as usize;

/// Ceiling on the bytes a single frame may occupy before it decodes,
/// comfortably above the largest frame a client may legitimately send
/// (a full chunk). A peer that exceeds it is not speaking the protocol.
pub const FRAME_LIMIT: usize = 262_144;

/// Everything that can go wrong encoding or decoding a frame.
///
/// Decode-side errors are fatal to the connection that produced them; there
/// is no way to resynchronise a byte stream after a malformed frame.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The type-code byte was not in the catalog
    #[error("unknown message type code {0}")]
    UnknownType(u8),
    /// A Command frame carried an unknown command code
    #[error("unknown command code {0}")]
    UnknownCommand(u8),
    /// A string field contained a zero byte (encode side)
    #[error("string field contains an embedded zero byte")]
    EmbeddedNul,
    /// A string field was not valid UTF-8 (decode side)
    #[error("string field is not valid UTF-8")]
    BadUtf8,
    /// A chunk payload was larger than [`CHUNK_DATA_LIMIT`]
    #[error("chunk data exceeds {CHUNK_DATA_LIMIT} bytes")]
    OversizeChunk,
    /// A listing had more entries than its u16 count can express
    #[error("list exceeds {LIST_LIMIT} entries")]
    OversizeList,
    /// An incomplete frame grew past [`FRAME_LIMIT`]; no legal frame is
    /// that long, so waiting for more bytes would buffer without bound
    #[error("frame exceeds {FRAME_LIMIT} bytes")]
    OversizeFrame,
}

/// One entry of an [`Message::IncomingRequests`] listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEntry {
    /// Username of the requester
    pub from: String,
    /// Path of the offered file, as the requester supplied it
    pub filename: String,
}

/// A client command, carried inside a [`Message::Command`] frame.
///
/// On the wire this is a one-byte command code plus arguments:
/// `list`=1, `reqs`=2, `glide`=3, `ok`=4, `no`=5.
///
/// (The legacy protocol description assigned 4 to both `ok` and `no`,
/// evidently a transcription slip; this implementation gives `no` its own
/// code 5 and does not treat the two as interchangeable.)
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
pub enum Command {
    /// `list`: query the connected users
    List,
    /// `reqs`: query the pending requests addressed to this user
    Reqs,
    /// `glide`: offer the file at `path` to user `to`
    Glide {
        /// Path of the offered file (an opaque string to the server)
        path: String,
        /// Target username
        to: String,
    },
    /// `ok`: accept the pending request from `from`
    Accept {
        /// Username whose request is being accepted
        from: String,
    },
    /// `no`: decline the pending request from `from`
    Reject {
        /// Username whose request is being declined
        from: String,
    },
}

impl Command {
    const LIST: u8 = 1;
    const REQS: u8 = 2;
    const GLIDE: u8 = 3;
    const ACCEPT: u8 = 4;
    const REJECT: u8 = 5;
}

/// The full message catalog.
///
/// Type codes are given in brackets. Codes 1, 5, 6 and 9 travel client to
/// server; the rest are server to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// \[1\] Proposed username (client to server, first message of a session)
    Username(String),
    /// \[2\] Registration succeeded
    UsernameOk,
    /// \[3\] Username failed validation; try another
    UsernameInvalid,
    /// \[4\] Username is held by another live connection; try another
    UsernameTaken,
    /// \[5\] File metadata: name and total size, sent before the chunks
    FileMetadata {
        /// File being transferred, as named in the originating request
        filename: String,
        /// Declared total size in bytes
        size: u32,
    },
    /// \[6\] One chunk of file data, at most [`CHUNK_DATA_LIMIT`] bytes
    FileChunk {
        /// File being transferred, as named in the originating request
        filename: String,
        /// Raw chunk payload
        data: Bytes,
    },
    /// \[7\] Listing of connected users (reply to `list`)
    ConnectedUsers(Vec<String>),
    /// \[8\] Listing of unresolved requests (reply to `reqs`)
    IncomingRequests(Vec<RequestEntry>),
    /// \[9\] A client command
    Command(Command),
    /// \[10\] The command (or the request it referred to) failed
    CommandFailed,
    /// \[11\] The command succeeded
    CommandOk,
    /// \[12\] A peer this connection had pending state with has disconnected;
    /// also sent by clients as an explicit goodbye
    PeerDisconnected,
}

impl Message {
    const USERNAME: u8 = 1;
    const USERNAME_OK: u8 = 2;
    const USERNAME_INVALID: u8 = 3;
    const USERNAME_TAKEN: u8 = 4;
    const FILE_METADATA: u8 = 5;
    const FILE_CHUNK: u8 = 6;
    const CONNECTED_USERS: u8 = 7;
    const INCOMING_REQUESTS: u8 = 8;
    const COMMAND: u8 = 9;
    const COMMAND_FAILED: u8 = 10;
    const COMMAND_OK: u8 = 11;
    const PEER_DISCONNECTED: u8 = 12;

    /// Encodes this message onto the end of `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        match self {
            Message::Username(name) => {
                buf.put_u8(Self::USERNAME);
                put_str(buf, name)?;
            }
            Message::UsernameOk => buf.put_u8(Self::USERNAME_OK),
            Message::UsernameInvalid => buf.put_u8(Self::USERNAME_INVALID),
            Message::UsernameTaken => buf.put_u8(Self::USERNAME_TAKEN),
            Message::FileMetadata { filename, size } => {
                buf.put_u8(Self::FILE_METADATA);
                put_str(buf, filename)?;
                buf.put_u32(*size);
            }
            Message::FileChunk { filename, data } => {
                if data.len() > CHUNK_DATA_LIMIT {
                    return Err(WireError::OversizeChunk);
                }
                buf.put_u8(Self::FILE_CHUNK);
                put_str(buf, filename)?;
                #[allow(clippy::cast_possible_truncation)] // just checked
                buf.put_u16(data.len() as u16);
                buf.put_slice(data);
            }
            Message::ConnectedUsers(users) => {
                buf.put_u8(Self::CONNECTED_USERS);
                put_u16_count(buf, users.len())?;
                for u in users {
                    put_str(buf, u)?;
                }
            }
            Message::IncomingRequests(reqs) => {
                buf.put_u8(Self::INCOMING_REQUESTS);
                put_u16_count(buf, reqs.len())?;
                for r in reqs {
                    put_str(buf, &r.from)?;
                    put_str(buf, &r.filename)?;
                }
            }
            Message::Command(cmd) => {
                buf.put_u8(Self::COMMAND);
                match cmd {
                    Command::List => buf.put_u8(Command::LIST),
                    Command::Reqs => buf.put_u8(Command::REQS),
                    Command::Glide { path, to } => {
                        buf.put_u8(Command::GLIDE);
                        put_str(buf, path)?;
                        put_str(buf, to)?;
                    }
                    Command::Accept { from } => {
                        buf.put_u8(Command::ACCEPT);
                        put_str(buf, from)?;
                    }
                    Command::Reject { from } => {
                        buf.put_u8(Command::REJECT);
                        put_str(buf, from)?;
                    }
                }
            }
            Message::CommandFailed => buf.put_u8(Self::COMMAND_FAILED),
            Message::CommandOk => buf.put_u8(Self::COMMAND_OK),
            Message::PeerDisconnected => buf.put_u8(Self::PEER_DISCONNECTED),
        }
        Ok(())
    }

    /// Encodes this message into a fresh byte vector.
    pub fn to_vec(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.to_vec())
    }

    /// Attempts to decode one frame from the front of `buf`.
    ///
    /// On success the frame's bytes are consumed from `buf`.
    /// `Ok(None)` means the buffer holds only part of a frame; call again
    /// once more bytes have arrived, noting that a frame still incomplete
    /// past [`FRAME_LIMIT`] is rejected instead. Errors are not recoverable.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Message>, WireError> {
        let (msg, consumed) = {
            let mut reader = Reader {
                buf: &buf[..],
                pos: 0,
            };
            match reader.read_message()? {
                Some(msg) => (msg, reader.pos),
                None => {
                    if buf.len() > FRAME_LIMIT {
                        return Err(WireError::OversizeFrame);
                    }
                    return Ok(None);
                }
            }
        };
        buf.advance(consumed);
        Ok(Some(msg))
    }
}

fn put_str(buf: &mut BytesMut, s: &str) -> Result<(), WireError> {
    if s.as_bytes().contains(&0) {
        return Err(WireError::EmbeddedNul);
    }
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
    Ok(())
}

fn put_u16_count(buf: &mut BytesMut, n: usize) -> Result<(), WireError> {
    let n = u16::try_from(n).map_err(|_| WireError::OversizeList)?;
    buf.put_u16(n);
    Ok(())
}

/// Bails out of a decode function with "need more data".
macro_rules! need {
    ($e:expr) => {
        match $e {
            Some(v) => v,
            None => return Ok(None),
        }
    };
}

/// Non-consuming cursor over the undecoded buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn u8(&mut self) -> Option<u8> {
        let b = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn u16(&mut self) -> Option<u16> {
        let raw = self.buf.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some(u16::from_be_bytes([raw[0], raw[1]]))
    }

    fn u32(&mut self) -> Option<u32> {
        let raw = self.buf.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn bytes(&mut self, n: usize) -> Option<Bytes> {
        let raw = self.buf.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(Bytes::copy_from_slice(raw))
    }

    /// Reads up to the next zero byte. `Ok(None)` if no terminator is
    /// buffered yet.
    fn str(&mut self) -> Result<Option<String>, WireError> {
        let rest = &self.buf[self.pos..];
        let end = need!(rest.iter().position(|&b| b == 0));
        let s = std::str::from_utf8(&rest[..end]).map_err(|_| WireError::BadUtf8)?;
        self.pos += end + 1;
        Ok(Some(s.to_string()))
    }

    fn read_message(&mut self) -> Result<Option<Message>, WireError> {
        let code = need!(self.u8());
        let msg = match code {
            Message::USERNAME => Message::Username(need!(self.str()?)),
            Message::USERNAME_OK => Message::UsernameOk,
            Message::USERNAME_INVALID => Message::UsernameInvalid,
            Message::USERNAME_TAKEN => Message::UsernameTaken,
            Message::FILE_METADATA => Message::FileMetadata {
                filename: need!(self.str()?),
                size: need!(self.u32()),
            },
            Message::FILE_CHUNK => {
                let filename = need!(self.str()?);
                let len = need!(self.u16()) as usize;
                let data = need!(self.bytes(len));
                Message::FileChunk { filename, data }
            }
            Message::CONNECTED_USERS => {
                let count = need!(self.u16());
                let mut users = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    users.push(need!(self.str()?));
                }
                Message::ConnectedUsers(users)
            }
            Message::INCOMING_REQUESTS => {
                let count = need!(self.u16());
                let mut reqs = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    reqs.push(RequestEntry {
                        from: need!(self.str()?),
                        filename: need!(self.str()?),
                    });
                }
                Message::IncomingRequests(reqs)
            }
            Message::COMMAND => {
                let cmd = match need!(self.u8()) {
                    Command::LIST => Command::List,
                    Command::REQS => Command::Reqs,
                    Command::GLIDE => Command::Glide {
                        path: need!(self.str()?),
                        to: need!(self.str()?),
                    },
                    Command::ACCEPT => Command::Accept {
                        from: need!(self.str()?),
                    },
                    Command::REJECT => Command::Reject {
                        from: need!(self.str()?),
                    },
                    other => return Err(WireError::UnknownCommand(other)),
                };
                Message::Command(cmd)
            }
            Message::COMMAND_FAILED => Message::CommandFailed,
            Message::COMMAND_OK => Message::CommandOk,
            Message::PEER_DISCONNECTED => Message::PeerDisconnected,
            other => return Err(WireError::UnknownType(other)),
        };
        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::{Command, Message, RequestEntry, WireError, CHUNK_DATA_LIMIT, FRAME_LIMIT};
    use bytes::{BufMut as _, Bytes, BytesMut};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn roundtrip(msg: &Message) -> Message {
        let mut buf = BytesMut::from(&msg.to_vec().unwrap()[..]);
        let out = Message::decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty(), "decode must consume the whole frame");
        out
    }

    #[rstest]
    #[case(Message::Username("alice".into()))]
    #[case(Message::UsernameOk)]
    #[case(Message::UsernameInvalid)]
    #[case(Message::UsernameTaken)]
    #[case(Message::FileMetadata { filename: "/x.txt".into(), size: 10 })]
    #[case(Message::FileChunk { filename: "/x.txt".into(), data: Bytes::from_static(b"0123456789") })]
    #[case(Message::ConnectedUsers(vec!["alice".into(), "bob".into()]))]
    #[case(Message::ConnectedUsers(vec![]))]
    #[case(Message::IncomingRequests(vec![RequestEntry { from: "alice".into(), filename: "/x.txt".into() }]))]
    #[case(Message::IncomingRequests(vec![]))]
    #[case(Message::Command(Command::List))]
    #[case(Message::Command(Command::Reqs))]
    #[case(Message::Command(Command::Glide { path: "/x.txt".into(), to: "bob".into() }))]
    #[case(Message::Command(Command::Accept { from: "alice".into() }))]
    #[case(Message::Command(Command::Reject { from: "alice".into() }))]
    #[case(Message::CommandFailed)]
    #[case(Message::CommandOk)]
    #[case(Message::PeerDisconnected)]
    fn catalog_roundtrip(#[case] msg: Message) {
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn exact_layout_username() {
        let wire = Message::Username("alice".into()).to_vec().unwrap();
        assert_eq!(wire, b"\x01alice\0");
    }

    #[test]
    fn exact_layout_metadata() {
        let wire = Message::FileMetadata {
            filename: "/x.txt".into(),
            size: 10,
        }
        .to_vec()
        .unwrap();
        assert_eq!(wire, b"\x05/x.txt\0\x00\x00\x00\x0a");
    }

    #[test]
    fn exact_layout_chunk() {
        let wire = Message::FileChunk {
            filename: "f".into(),
            data: Bytes::from_static(b"ab"),
        }
        .to_vec()
        .unwrap();
        assert_eq!(wire, b"\x06f\0\x00\x02ab");
    }

    #[test]
    fn exact_layout_glide() {
        let wire = Message::Command(Command::Glide {
            path: "/x.txt".into(),
            to: "bob".into(),
        })
        .to_vec()
        .unwrap();
        assert_eq!(wire, b"\x09\x03/x.txt\0bob\0");
    }

    #[test]
    fn exact_layout_reject_uses_code_5() {
        let wire = Message::Command(Command::Reject {
            from: "alice".into(),
        })
        .to_vec()
        .unwrap();
        assert_eq!(wire, b"\x09\x05alice\0");
    }

    #[test]
    fn exact_layout_users() {
        let wire = Message::ConnectedUsers(vec!["a".into(), "b".into()])
            .to_vec()
            .unwrap();
        assert_eq!(wire, b"\x07\x00\x02a\0b\0");
    }

    #[test]
    fn decode_is_incremental() {
        // Feed a multi-frame stream one byte at a time; every prefix must
        // yield NeedMoreData, never an error.
        let mut wire = Message::Command(Command::Glide {
            path: "/x.txt".into(),
            to: "bob".into(),
        })
        .to_vec()
        .unwrap();
        wire.extend_from_slice(
            &Message::FileMetadata {
                filename: "/x.txt".into(),
                size: 3,
            }
            .to_vec()
            .unwrap(),
        );

        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for b in &wire {
            buf.extend_from_slice(&[*b]);
            while let Some(msg) = Message::decode(&mut buf).unwrap() {
                decoded.push(msg);
            }
        }
        assert_eq!(decoded.len(), 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_leaves_following_frame_in_place() {
        let mut buf = BytesMut::new();
        Message::UsernameOk.encode(&mut buf).unwrap();
        Message::CommandOk.encode(&mut buf).unwrap();
        assert_eq!(Message::decode(&mut buf).unwrap(), Some(Message::UsernameOk));
        assert_eq!(Message::decode(&mut buf).unwrap(), Some(Message::CommandOk));
        assert_eq!(Message::decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn max_size_chunk() {
        let msg = Message::FileChunk {
            filename: "big".into(),
            data: Bytes::from(vec![0x5a; CHUNK_DATA_LIMIT]),
        };
        assert!(msg.to_vec().unwrap().len() < FRAME_LIMIT);
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn unterminated_string_is_rejected_at_the_frame_ceiling() {
        // A type code followed by an endless NUL-free string must not be
        // buffered forever.
        let mut buf = BytesMut::new();
        buf.put_u8(super::Message::USERNAME);
        buf.put_slice(&vec![b'a'; FRAME_LIMIT / 2]);
        assert_eq!(Message::decode(&mut buf).unwrap(), None);
        buf.put_slice(&vec![b'a'; FRAME_LIMIT / 2 + 2]);
        assert_eq!(Message::decode(&mut buf), Err(WireError::OversizeFrame));
    }

    #[test]
    fn oversize_chunk_rejected() {
        let msg = Message::FileChunk {
            filename: "big".into(),
            data: Bytes::from(vec![0; CHUNK_DATA_LIMIT + 1]),
        };
        assert_eq!(msg.to_vec(), Err(WireError::OversizeChunk));
    }

    #[test]
    fn embedded_nul_rejected() {
        let msg = Message::Username("al\0ice".into());
        assert_eq!(msg.to_vec(), Err(WireError::EmbeddedNul));
        let msg = Message::Command(Command::Glide {
            path: "/x\0.txt".into(),
            to: "bob".into(),
        });
        assert_eq!(msg.to_vec(), Err(WireError::EmbeddedNul));
    }

    #[test]
    fn empty_string_is_encodable() {
        // An empty username is syntactically fine on the wire; rejecting it
        // is the registry's job.
        let msg = Message::Username(String::new());
        assert_eq!(msg.to_vec().unwrap(), b"\x01\0");
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn unknown_type_code() {
        let mut buf = BytesMut::from(&b"\x63"[..]);
        assert_eq!(Message::decode(&mut buf), Err(WireError::UnknownType(0x63)));
    }

    #[test]
    fn unknown_command_code() {
        let mut buf = BytesMut::from(&b"\x09\x0c"[..]);
        assert_eq!(
            Message::decode(&mut buf),
            Err(WireError::UnknownCommand(0x0c))
        );
    }

    #[test]
    fn non_utf8_string_rejected() {
        let mut buf = BytesMut::from(&b"\x01\xff\xfe\0"[..]);
        assert_eq!(Message::decode(&mut buf), Err(WireError::BadUtf8));
    }

    #[test]
    fn truncated_chunk_needs_more() {
        let full = Message::FileChunk {
            filename: "f".into(),
            data: Bytes::from_static(b"abcdef"),
        }
        .to_vec()
        .unwrap();
        for cut in 0..full.len() {
            let mut buf = BytesMut::from(&full[..cut]);
            assert_eq!(Message::decode(&mut buf).unwrap(), None, "cut at {cut}");
        }
    }
}
