//! Pub/sub transport: event codec, links, reconnection and the adapter that
//! keeps room subscriptions alive across reconnects.

pub mod adapter;
pub mod connection;
pub mod error;
pub mod events;
pub mod framing;
pub mod link;
pub mod memory;
pub mod reconnection;
pub mod routing;
pub mod tcp;

pub use adapter::TransportAdapter;
pub use connection::{ConnectionState, ConnectionStateWatch};
pub use error::{MalformedEventError, TransportError};
pub use events::{
    Envelope, EventKind, MatchFinish, RoomEvent, RoomJoin, RoomUpdate, RoundComplete, RoundOpen,
    RoundResults, WheelSpin,
};
pub use framing::{FrameConfig, FrameError, read_envelope, read_frame, write_envelope, write_frame};
pub use link::{Connector, LINK_CAPACITY, Link};
pub use memory::{MemoryConnector, MemoryHub};
pub use reconnection::{ReconnectConfig, ReconnectState};
pub use routing::{EventHandler, HandlerId, HandlerRegistry};
pub use tcp::{TcpConnector, serve_hub};
