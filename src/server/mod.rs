//! Rendezvous server event loop
// (c) 2025 The glided developers

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, info_span, Instrument as _};

mod broker;
mod hub;
mod registry;
mod relay;
mod session;

pub use registry::MAX_USERNAME_LEN;

use crate::protocol::SendReceivePair;
use hub::Hub;
use session::ConnId;

/// Binds the rendezvous listener.
pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;
    info!("listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accepts and serves connections forever.
///
/// Each connection gets its own task (and its own writer task); they run
/// in parallel on the runtime and only meet inside the hub.
pub async fn serve(listener: TcpListener) -> anyhow::Result<()> {
    let hub = Arc::new(Hub::new());
    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;
        spawn_connection(stream, peer, &hub);
    }
}

fn spawn_connection(stream: TcpStream, peer: SocketAddr, hub: &Arc<Hub>) {
    let conn = ConnId::next();
    debug!("new connection {conn} from {peer}");
    let (recv, send) = stream.into_split();
    let sp = SendReceivePair::from((send, recv));
    let hub = Arc::clone(hub);
    let span = info_span!("conn", id = %conn, %peer);
    let _ = tokio::spawn(
        async move {
            match session::run(conn, sp, hub).await {
                Ok(()) => debug!("connection finished"),
                Err(e) => error!("connection aborted: {e:#}"),
            }
        }
        .instrument(span),
    );
}
