//! TCP connector: one framed stream per link, and a relay that serves a
//! [`MemoryHub`] to TCP clients.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::framing::{FrameConfig, FrameError, read_envelope, write_envelope};
use crate::link::{Connector, Link};
use crate::memory::MemoryHub;

/// Connects to a pub/sub server over TCP.
///
/// Each link spawns a reader and a writer task. The reader ends when the peer
/// closes or the adapter drops the link; the writer ends when the adapter
/// drops its outbound sender.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    endpoint: String,
    frames: FrameConfig,
}

impl TcpConnector {
    pub fn new(endpoint: impl Into<String>, frames: FrameConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            frames,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        let stream = TcpStream::connect(&self.endpoint).await.map_err(|e| {
            TransportError::ConnectFailed {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            }
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "could not set TCP_NODELAY");
        }
        let peer = stream.peer_addr().ok();
        tracing::info!(endpoint = %self.endpoint, "tcp link established");

        let (reader, writer) = stream.into_split();
        let (link, outbound, inbound) = Link::pair();
        tokio::spawn(read_loop(reader, inbound, self.frames.clone(), peer));
        tokio::spawn(write_loop(writer, outbound, self.frames.clone()));
        Ok(link)
    }
}

/// Relay every client accepted on `listener` through `hub`.
///
/// Each stream becomes one hub client; a stream that closes is forgotten by
/// the hub like any dropped link. Returns only when accepting fails.
pub async fn serve_hub(
    listener: TcpListener,
    hub: MemoryHub,
    frames: FrameConfig,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "relay listening");
    }
    loop {
        let (stream, peer) = listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "could not set TCP_NODELAY");
        }
        let link = match hub.accept() {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "relay refused client");
                continue;
            }
        };
        tracing::info!(%peer, "relay accepted client");

        let (reader, writer) = stream.into_split();
        tokio::spawn(read_loop(reader, link.outbound, frames.clone(), Some(peer)));
        tokio::spawn(write_loop(writer, link.inbound, frames.clone()));
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    inbound: mpsc::Sender<String>,
    frames: FrameConfig,
    peer: Option<SocketAddr>,
) {
    loop {
        tokio::select! {
            result = read_envelope(&mut reader, &frames) => match result {
                Ok(text) => {
                    if inbound.send(text).await.is_err() {
                        break;
                    }
                }
                Err(FrameError::NotUtf8(e)) => {
                    tracing::warn!(error = %e, "dropping non-UTF-8 frame");
                }
                Err(FrameError::ConnectionClosed) => {
                    tracing::info!(?peer, "tcp link closed by peer");
                    break;
                }
                Err(e) => {
                    tracing::warn!(?peer, error = %e, "tcp read failed");
                    break;
                }
            },
            _ = inbound.closed() => break,
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<String>,
    frames: FrameConfig,
) {
    while let Some(text) = outbound.recv().await {
        match write_envelope(&mut writer, &text, &frames).await {
            Ok(()) => {}
            Err(FrameError::PayloadTooLarge { size, max }) => {
                tracing::warn!(size, max, "dropping oversized outbound envelope");
            }
            Err(e) => {
                tracing::warn!(error = %e, "tcp write failed");
                break;
            }
        }
    }
}
