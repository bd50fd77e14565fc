use std::net::SocketAddr;
use thiserror::Error;
use udpnotify_io::SocketError;
use udpnotify_protocol::{ConfigError, ConnectionError};

/// Errors returned by [`crate::Peer`] operations
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("No connection to {0}")]
    UnknownConnection(SocketAddr),

    #[error("Connection to {0} already exists")]
    ConnectionExists(SocketAddr),

    #[error("Payload of {size} bytes exceeds the maximum of {max}")]
    PayloadTooLarge { size: usize, max: usize },
}
