//! udpnotify - connection-oriented messaging over UDP
//!
//! A [`Peer`] owns one UDP socket and any number of connections. It offers
//! unreliable datagrams and "notify" datagrams, whose delivery or loss is
//! reported back to the sender exactly once. Nothing is retransmitted by the
//! transport itself.
//!
//! The peer is single threaded and driven by the caller: call
//! [`Peer::update`] periodically, then drain the resulting [`PeerEvent`]s.

pub use udpnotify_io as io;
pub use udpnotify_protocol as protocol;

mod error;
mod event;
mod peer;

pub use error::PeerError;
pub use event::{PeerEvent, PeerHandler};
pub use peer::Peer;

// Re-export commonly used types
pub use protocol::{
    Config, ConfigError, Connection, ConnectionError, ConnectionFailedReason, ConnectionState,
    ConnectionStats, DisconnectReason,
};
