//! Per-connection session: decode loop, state machine, outbound queue
// (c) 2025 The glided developers

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, ensure, Context as _};
use bytes::BytesMut;
use human_repr::HumanCount as _;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::hub::{FrameOutcome, Hub, Notice};
use super::registry::RegisterOutcome;
use crate::protocol::wire::{Command, Message};
use crate::protocol::{ReceivingStream, SendReceivePair, SendingStream};

/// Depth of each connection's outbound queue. When a receiver's queue is
/// full, forwarding to it waits; that wait propagates back to the sending
/// connection's read loop, which is the backpressure we want.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Initial capacity of the inbound decode buffer.
const READ_BUFFER_SIZE: usize = 16_384;

/// Identifies one connection for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ConnId(u64);

impl ConnId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle for queueing messages to one connection's writer task.
///
/// Cloned into the registry so the hub can hand it to other connections'
/// tasks; the session and writer own the underlying channel.
#[derive(Debug, Clone)]
pub(crate) struct OutboundQueue {
    tx: mpsc::Sender<Message>,
}

impl OutboundQueue {
    fn new() -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        (Self { tx }, rx)
    }

    #[cfg(test)]
    pub(crate) fn new_for_test() -> (Self, mpsc::Receiver<Message>) {
        Self::new()
    }

    /// Queues a message, waiting for room if the queue is full.
    /// False means the connection is gone; callers treat that as best-effort.
    pub(crate) async fn send(&self, message: Message) -> bool {
        self.tx.send(message).await.is_ok()
    }

    /// Queues a message only if there is room right now. Used on teardown
    /// paths, which must not stall behind a slow peer.
    pub(crate) fn send_or_drop(&self, message: Message) -> bool {
        self.tx.try_send(message).is_ok()
    }
}

/// Runs one client connection to completion.
///
/// Spawns the writer task, drives the read/dispatch loop, and tears the
/// connection down from the shared tables exactly once on the way out,
/// whatever the cause of death.
pub(crate) async fn run<S, R>(
    conn: ConnId,
    sp: SendReceivePair<S, R>,
    hub: Arc<Hub>,
) -> anyhow::Result<()>
where
    S: SendingStream + 'static,
    R: ReceivingStream + 'static,
{
    let (queue, rx) = OutboundQueue::new();
    let writer = tokio::spawn(write_loop(sp.send, rx));

    let result = read_loop(conn, sp.recv, &hub, queue).await;

    for notice in hub.disconnect(conn) {
        // Best-effort: a stalled peer must not hold up our teardown.
        let _ = notice.queue.send_or_drop(notice.message);
    }
    // The session's own queue handle is dropped with read_loop's stack;
    // once the registry copy is gone too, the writer drains and exits.
    let _ = writer.await;
    result
}

async fn write_loop<S: SendingStream>(mut send: S, mut rx: mpsc::Receiver<Message>) {
    let mut buf = BytesMut::new();
    while let Some(msg) = rx.recv().await {
        buf.clear();
        if let Err(e) = msg.encode(&mut buf) {
            // Messages built by the server are always encodable; chunks were
            // validated when decoded.
            warn!("dropping unencodable outbound message: {e}");
            continue;
        }
        if let Err(e) = send.write_all(&buf).await {
            debug!("outbound write failed: {e}");
            break;
        }
    }
    let _ = send.shutdown().await;
}

async fn read_loop<R: ReceivingStream>(
    conn: ConnId,
    mut recv: R,
    hub: &Hub,
    queue: OutboundQueue,
) -> anyhow::Result<()> {
    let mut session = Session {
        conn,
        hub,
        queue,
        username: None,
    };
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        while let Some(msg) = Message::decode(&mut buf).context("malformed frame")? {
            match session.dispatch(msg).await? {
                Flow::Continue => (),
                Flow::Close => {
                    debug!("graceful close");
                    return Ok(());
                }
            }
        }
        if recv.read_buf(&mut buf).await.context("transport error")? == 0 {
            ensure!(
                buf.is_empty(),
                "connection closed mid-frame ({} bytes undecoded)",
                buf.len()
            );
            debug!("end of stream");
            return Ok(());
        }
    }
}

enum Flow {
    Continue,
    Close,
}

/// Session state: `username` is None until registration succeeds
/// (the AwaitingUsername state), then holds the bound name (Active).
struct Session<'a> {
    conn: ConnId,
    hub: &'a Hub,
    queue: OutboundQueue,
    username: Option<String>,
}

impl Session<'_> {
    async fn dispatch(&mut self, msg: Message) -> anyhow::Result<Flow> {
        // An explicit goodbye is honoured in any state.
        if msg == Message::PeerDisconnected {
            return Ok(Flow::Close);
        }
        match self.username.clone() {
            None => self.await_username(msg).await,
            Some(username) => self.active(&username, msg).await,
        }
    }

    /// AwaitingUsername: nothing but a username frame is acceptable.
    async fn await_username(&mut self, msg: Message) -> anyhow::Result<Flow> {
        let Message::Username(name) = msg else {
            bail!("protocol violation: expected a username, got {msg:?}");
        };
        let outcome = self.hub.register(self.conn, &name, self.queue.clone());
        let reply = match outcome {
            RegisterOutcome::Ok => {
                info!("registered as {name}");
                self.username = Some(name);
                Message::UsernameOk
            }
            RegisterOutcome::Invalid => {
                debug!("rejected invalid username {name:?}");
                Message::UsernameInvalid
            }
            RegisterOutcome::Taken => {
                debug!("username {name:?} already taken");
                Message::UsernameTaken
            }
        };
        self.reply(reply).await?;
        Ok(Flow::Continue)
    }

    async fn active(&mut self, username: &str, msg: Message) -> anyhow::Result<Flow> {
        match msg {
            Message::Command(cmd) => self.command(username, cmd).await?,
            Message::FileMetadata { filename, size } => {
                let frame = Message::FileMetadata {
                    filename: filename.clone(),
                    size,
                };
                let outcome = self.hub.relay_metadata(username, &filename, size, frame);
                self.relayed(username, &filename, outcome).await?;
            }
            Message::FileChunk { filename, data } => {
                let len = data.len();
                let frame = Message::FileChunk {
                    filename: filename.clone(),
                    data,
                };
                let outcome = self.hub.relay_chunk(username, &filename, len, frame);
                self.relayed(username, &filename, outcome).await?;
            }
            other => bail!("protocol violation: client sent {other:?}"),
        }
        Ok(Flow::Continue)
    }

    async fn command(&mut self, username: &str, cmd: Command) -> anyhow::Result<()> {
        debug!("command: {cmd}");
        let reply = match cmd {
            Command::List => Message::ConnectedUsers(self.hub.list_users(username)),
            Command::Reqs => Message::IncomingRequests(self.hub.pending_for(username)),
            Command::Glide { path, to } => match self.hub.glide(username, &to, &path) {
                Ok(()) => Message::CommandOk,
                Err(e) => {
                    debug!("glide {path} -> {to} failed: {e}");
                    Message::CommandFailed
                }
            },
            Command::Accept { from } => self.resolve(username, &from, true).await,
            Command::Reject { from } => self.resolve(username, &from, false).await,
        };
        self.reply(reply).await
    }

    async fn resolve(&mut self, username: &str, from: &str, accept: bool) -> Message {
        match self.hub.resolve(username, from, accept) {
            Ok(notices) => {
                self.deliver(notices).await;
                Message::CommandOk
            }
            Err(e) => {
                debug!("resolve from {from} failed: {e}");
                Message::CommandFailed
            }
        }
    }

    /// Acts on the hub's verdict for a relayed metadata/chunk frame.
    async fn relayed(
        &mut self,
        username: &str,
        filename: &str,
        outcome: Result<FrameOutcome, super::hub::HubError>,
    ) -> anyhow::Result<()> {
        match outcome {
            Ok(FrameOutcome::Forward { notice, completed }) => {
                if !notice.queue.send(notice.message).await {
                    // Receiver went away; its own teardown has already
                    // invalidated the transfer.
                    debug!("receiver of {filename} is gone");
                }
                if let Some(total) = completed {
                    info!(
                        "transfer of {filename} from {username} complete ({})",
                        total.human_count_bytes()
                    );
                }
                Ok(())
            }
            Ok(FrameOutcome::Aborted { notices }) => {
                warn!("transfer of {filename} from {username} overflowed its declared size; aborted");
                self.deliver(notices).await;
                self.reply(Message::CommandFailed).await
            }
            Err(e) => bail!("protocol violation: {e}"),
        }
    }

    async fn deliver(&self, notices: Vec<Notice>) {
        for n in notices {
            if !n.queue.send(n.message).await {
                debug!("peer disappeared before notification");
            }
        }
    }

    async fn reply(&self, msg: Message) -> anyhow::Result<()> {
        ensure!(
            self.queue.send(msg).await,
            "outbound queue closed; writer has gone"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{run, ConnId, OutboundQueue, OUTBOUND_QUEUE_DEPTH};
    use crate::protocol::wire::{Command, Message, FRAME_LIMIT};
    use crate::protocol::SendReceivePair;
    use crate::server::hub::Hub;
    use crate::server::registry::RegisterOutcome;
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _, DuplexStream};
    use tokio::time::timeout;

    /// Test client half: raw duplex stream plus a decode buffer.
    struct Client {
        stream: DuplexStream,
        buf: BytesMut,
    }

    impl Client {
        fn spawn(hub: &Arc<Hub>) -> Self {
            let (client, server) = tokio::io::duplex(65_536 * 4);
            let (recv, send) = tokio::io::split(server);
            let hub = Arc::clone(hub);
            let _ = tokio::spawn(async move {
                let _ = run(ConnId::next(), SendReceivePair::from((send, recv)), hub).await;
            });
            Self {
                stream: client,
                buf: BytesMut::new(),
            }
        }

        async fn send(&mut self, msg: &Message) {
            self.stream.write_all(&msg.to_vec().unwrap()).await.unwrap();
        }

        async fn recv(&mut self) -> Message {
            loop {
                if let Some(msg) = Message::decode(&mut self.buf).unwrap() {
                    return msg;
                }
                let n = self.stream.read_buf(&mut self.buf).await.unwrap();
                assert!(n > 0, "server closed the stream unexpectedly");
            }
        }

        async fn login(&mut self, name: &str) {
            self.send(&Message::Username(name.into())).await;
            assert_eq!(self.recv().await, Message::UsernameOk);
        }
    }

    #[tokio::test]
    async fn write_loop_encodes_and_flushes() {
        let expected = Message::UsernameOk.to_vec().unwrap();
        let mock = tokio_test::io::Builder::new().write(&expected).build();
        let (queue, rx) = super::OutboundQueue::new_for_test();
        let handle = tokio::spawn(super::write_loop(mock, rx));
        assert!(queue.send(Message::UsernameOk).await);
        drop(queue);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn username_retry_after_invalid_and_taken() {
        let hub = Arc::new(Hub::new());
        let mut a = Client::spawn(&hub);
        a.send(&Message::Username(String::new())).await;
        assert_eq!(a.recv().await, Message::UsernameInvalid);
        a.login("alice").await;

        let mut b = Client::spawn(&hub);
        b.send(&Message::Username("alice".into())).await;
        assert_eq!(b.recv().await, Message::UsernameTaken);
        b.login("bob").await;

        b.send(&Message::Command(Command::List)).await;
        assert_eq!(
            b.recv().await,
            Message::ConnectedUsers(vec!["alice".into()])
        );
    }

    #[tokio::test]
    async fn command_before_username_kills_the_connection() {
        let hub = Arc::new(Hub::new());
        let mut a = Client::spawn(&hub);
        a.send(&Message::Command(Command::List)).await;
        // The server aborts; the stream reaches EOF.
        let mut sink = Vec::new();
        let _ = a.stream.read_to_end(&mut sink).await.unwrap();
    }

    #[tokio::test]
    async fn glide_to_nobody_fails_politely() {
        let hub = Arc::new(Hub::new());
        let mut a = Client::spawn(&hub);
        a.login("alice").await;
        a.send(&Message::Command(Command::Glide {
            path: "/x.txt".into(),
            to: "nobody".into(),
        }))
        .await;
        assert_eq!(a.recv().await, Message::CommandFailed);
        // still alive
        a.send(&Message::Command(Command::List)).await;
        assert_eq!(a.recv().await, Message::ConnectedUsers(vec![]));
    }

    #[tokio::test]
    async fn accept_with_nothing_pending_fails_politely() {
        let hub = Arc::new(Hub::new());
        let mut a = Client::spawn(&hub);
        a.login("alice").await;
        a.send(&Message::Command(Command::Accept {
            from: "nobody".into(),
        }))
        .await;
        assert_eq!(a.recv().await, Message::CommandFailed);
    }

    #[tokio::test]
    async fn stray_chunk_kills_the_connection() {
        let hub = Arc::new(Hub::new());
        let mut a = Client::spawn(&hub);
        a.login("alice").await;
        a.send(&Message::FileChunk {
            filename: "/x.txt".into(),
            data: b"boo".as_ref().into(),
        })
        .await;
        let mut sink = Vec::new();
        let _ = a.stream.read_to_end(&mut sink).await.unwrap();
    }

    #[tokio::test]
    async fn endless_unterminated_frame_kills_the_connection() {
        let hub = Arc::new(Hub::new());
        let mut a = Client::spawn(&hub);
        // A username type code, then a stream of letters with no terminator.
        let mut garbage = vec![0u8; FRAME_LIMIT + 2];
        garbage.fill(b'a');
        garbage[0] = 1;
        let _ = a.stream.write_all(&garbage).await;
        let mut sink = Vec::new();
        let _ = a.stream.read_to_end(&mut sink).await.unwrap();
    }

    #[tokio::test]
    async fn full_receiver_queue_stalls_the_sender() {
        let hub = Arc::new(Hub::new());
        let mut a = Client::spawn(&hub);
        a.login("alice").await;

        // A receiver that never reads: registered directly with a queue the
        // test controls and initially does not drain.
        let (queue, mut bob_rx) = OutboundQueue::new_for_test();
        assert_eq!(hub.register(ConnId::next(), "bob", queue), RegisterOutcome::Ok);

        a.send(&Message::Command(Command::Glide {
            path: "/big.bin".into(),
            to: "bob".into(),
        }))
        .await;
        assert_eq!(a.recv().await, Message::CommandOk);
        let _ = hub.resolve("bob", "alice", true).unwrap();

        a.send(&Message::FileMetadata {
            filename: "/big.bin".into(),
            size: 1_000,
        })
        .await;
        for _ in 0..OUTBOUND_QUEUE_DEPTH {
            a.send(&Message::FileChunk {
                filename: "/big.bin".into(),
                data: b"x".as_ref().into(),
            })
            .await;
        }
        // The metadata and the first 63 chunks fill bob's queue; the last
        // chunk is waiting for room, so alice's read loop is stalled and
        // this query goes unanswered.
        a.send(&Message::Command(Command::List)).await;
        assert!(timeout(Duration::from_millis(200), a.recv()).await.is_err());

        // Draining the receiver lets the relay proceed and the session
        // answer again.
        for _ in 0..=OUTBOUND_QUEUE_DEPTH {
            assert!(bob_rx.recv().await.is_some());
        }
        assert_eq!(a.recv().await, Message::ConnectedUsers(vec!["bob".into()]));
    }

    #[tokio::test]
    async fn teardown_notice_is_dropped_rather_than_waiting_for_queue_room() {
        let hub = Arc::new(Hub::new());
        let mut a = Client::spawn(&hub);
        a.login("alice").await;

        let (queue, mut bob_rx) = OutboundQueue::new_for_test();
        assert_eq!(
            hub.register(ConnId::next(), "bob", queue.clone()),
            RegisterOutcome::Ok
        );
        // Cram bob's queue full so nothing more fits.
        for _ in 0..OUTBOUND_QUEUE_DEPTH {
            assert!(queue.send(Message::CommandOk).await);
        }

        a.send(&Message::Command(Command::Glide {
            path: "/x.txt".into(),
            to: "bob".into(),
        }))
        .await;
        assert_eq!(a.recv().await, Message::CommandOk);

        // Alice leaves; her teardown owes bob a notice but must not wait
        // for room. EOF confirms teardown ran to completion.
        a.send(&Message::PeerDisconnected).await;
        let mut sink = Vec::new();
        let _ = a.stream.read_to_end(&mut sink).await.unwrap();

        // The name is already free again.
        let mut a2 = Client::spawn(&hub);
        a2.login("alice").await;

        // Bob's queue holds only the filler; the notice was dropped.
        for _ in 0..OUTBOUND_QUEUE_DEPTH {
            assert_eq!(bob_rx.recv().await, Some(Message::CommandOk));
        }
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn goodbye_is_a_graceful_close_that_frees_the_name() {
        let hub = Arc::new(Hub::new());
        let mut a = Client::spawn(&hub);
        a.login("alice").await;
        a.send(&Message::PeerDisconnected).await;
        let mut sink = Vec::new();
        let _ = a.stream.read_to_end(&mut sink).await.unwrap();

        let mut b = Client::spawn(&hub);
        b.login("alice").await;
    }

    #[tokio::test]
    async fn disconnect_notifies_peer_with_pending_request() {
        let hub = Arc::new(Hub::new());
        let mut a = Client::spawn(&hub);
        a.login("alice").await;
        let mut b = Client::spawn(&hub);
        b.login("bob").await;

        a.send(&Message::Command(Command::Glide {
            path: "/x.txt".into(),
            to: "bob".into(),
        }))
        .await;
        assert_eq!(a.recv().await, Message::CommandOk);

        drop(a); // transport failure from the server's point of view
        assert_eq!(b.recv().await, Message::PeerDisconnected);
        b.send(&Message::Command(Command::Reqs)).await;
        assert_eq!(b.recv().await, Message::IncomingRequests(vec![]));
    }
}
