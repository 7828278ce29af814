//! A single established connection, as seen by the adapter.

use std::future::Future;

use tokio::sync::mpsc;

use crate::error::TransportError;

/// Buffered messages per link direction.
pub const LINK_CAPACITY: usize = 1024;

/// Both directions of one connection, carrying encoded envelopes.
///
/// The link is gone when `inbound` yields `None`. Dropping `outbound` closes
/// the connection from the client side.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

impl Link {
    /// A fresh channel pair: the link itself plus the far ends a connector
    /// pumps (`outbound` receiver, `inbound` sender).
    pub fn pair() -> (Link, mpsc::Receiver<String>, mpsc::Sender<String>) {
        let (out_tx, out_rx) = mpsc::channel(LINK_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(LINK_CAPACITY);
        (
            Link {
                outbound: out_tx,
                inbound: in_rx,
            },
            out_rx,
            in_tx,
        )
    }
}

/// Opens links to a pub/sub server.
///
/// The adapter calls [`Connector::connect`] once per attempt, the first time
/// and after every drop.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<Link, TransportError>> + Send;
}
