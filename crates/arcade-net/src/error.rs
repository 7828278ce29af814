//! Transport and codec errors.

/// Errors raised while establishing or keeping a link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connector could not reach the server.
    #[error("connect to {endpoint} failed: {reason}")]
    ConnectFailed {
        /// Address or name of the server.
        endpoint: String,
        /// Human-readable cause.
        reason: String,
    },

    /// The link closed underneath the adapter.
    #[error("link closed")]
    LinkClosed,

    /// Every configured reconnection attempt failed.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// A message that failed strict decoding at the adapter boundary.
///
/// Never reaches handlers; logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum MalformedEventError {
    /// Not a JSON envelope with `event`, `roomId` and `payload`.
    #[error("invalid envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// The envelope names an event this client does not know.
    #[error("unknown event `{0}`")]
    UnknownEvent(String),

    /// The payload does not match the shape of its event.
    #[error("invalid `{event}` payload: {source}")]
    Payload {
        /// Wire name of the event.
        event: &'static str,
        source: serde_json::Error,
    },
}
