//! udpnotify Protocol Core
//!
//! This crate implements the socket-free parts of the notify transport:
//! sequence arithmetic, the wire format, the send window, ack reconciliation
//! and the per-connection state machine.

pub mod ack;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod connection;
pub mod packet;
pub mod sequence;

pub use ack::{AckOutcome, AckedPacket, RttEstimator};
pub use buffer::{BufferError, RingBuffer, SendEnvelope};
pub use config::{Config, ConfigError};
pub use connection::{
    CommandOutcome, Connection, ConnectionError, ConnectionState, ConnectionStats,
    NotifyReceive, TimerAction,
};
pub use packet::{
    notify_header_size, Command, CommandPacket, ConnectionFailedReason, DisconnectReason,
    NotifyHeader, Packet, PacketError, PacketType,
};
pub use sequence::Sequencer;
