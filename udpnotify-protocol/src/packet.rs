//! Packet Structures and Serialization
//!
//! Every datagram starts with a one-byte packet type tag:
//!
//! | Type            | Layout                                                   |
//! |-----------------|----------------------------------------------------------|
//! | `Command` (0)   | `[type][command][optional reason]`                       |
//! | `Unreliable` (1)| `[type][payload]`                                        |
//! | `KeepAlive` (2) | `[type]`                                                 |
//! | `Notify` (3)    | `[type][sequence N][recv sequence N][recv mask 8][payload]` |
//!
//! `N` is the configured sequence width. All integers are little-endian.

use crate::codec::{read_uint, write_uint};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Size of the packet type tag
pub const TYPE_SIZE: usize = 1;

/// Size of the receive ack mask in bytes
pub const ACK_MASK_BYTES: usize = 8;

/// Number of packets one ack mask can describe
pub const ACK_MASK_BITS: i64 = (ACK_MASK_BYTES * 8) as i64;

/// Size of the notify header for a given sequence width
#[inline]
pub const fn notify_header_size(sequence_bytes: usize) -> usize {
    TYPE_SIZE + ACK_MASK_BYTES + sequence_bytes * 2
}

/// Packet parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Empty datagram")]
    Empty,

    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("Unknown command: {0}")]
    UnknownCommand(u8),


    #[error("Invalid integer width: {0}")]
    InvalidWidth(usize),
}

/// Packet type tag (byte 0 of every datagram)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Command = 0,
    Unreliable = 1,
    KeepAlive = 2,
    Notify = 3,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PacketType::Command),
            1 => Some(PacketType::Unreliable),
            2 => Some(PacketType::KeepAlive),
            3 => Some(PacketType::Notify),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Connection control commands (byte 1 of a command packet)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    ConnectRequest = 1,
    ConnectionAccepted = 2,
    ConnectionRefused = 3,
    Disconnect = 4,
}

impl Command {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Command::ConnectRequest),
            2 => Some(Command::ConnectionAccepted),
            3 => Some(Command::ConnectionRefused),
            4 => Some(Command::Disconnect),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why an outgoing connection attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnectionFailedReason {
    /// Remote refused without a reason we recognise
    #[default]
    Unspecified = 0,
    /// No answer after the configured number of attempts
    Timeout = 1,
    /// Remote refused because its connection table is full
    ServerFull = 2,
}

impl ConnectionFailedReason {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ConnectionFailedReason::Timeout),
            2 => Some(ConnectionFailedReason::ServerFull),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Why an established connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DisconnectReason {
    /// Nothing heard from the remote within the connection timeout
    Timeout = 1,
    /// One side asked to close the connection
    #[default]
    Requested = 2,
    /// Notify sequence numbers drifted further apart than the send window
    SequenceOutOfBounds = 3,
}

impl DisconnectReason {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(DisconnectReason::Timeout),
            2 => Some(DisconnectReason::Requested),
            3 => Some(DisconnectReason::SequenceOutOfBounds),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Parsed command packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPacket {
    ConnectRequest,
    ConnectionAccepted,
    ConnectionRefused(ConnectionFailedReason),
    Disconnect(DisconnectReason),
}

impl CommandPacket {
    pub fn command(&self) -> Command {
        match self {
            CommandPacket::ConnectRequest => Command::ConnectRequest,
            CommandPacket::ConnectionAccepted => Command::ConnectionAccepted,
            CommandPacket::ConnectionRefused(_) => Command::ConnectionRefused,
            CommandPacket::Disconnect(_) => Command::Disconnect,
        }
    }

    /// Parse the bytes following the type tag
    pub fn from_bytes(body: &[u8]) -> Result<Self, PacketError> {
        let (&code, rest) = body.split_first().ok_or(PacketError::InsufficientData {
            expected: 1,
            actual: 0,
        })?;
        let command = Command::from_u8(code).ok_or(PacketError::UnknownCommand(code))?;

        match command {
            Command::ConnectRequest => Ok(CommandPacket::ConnectRequest),
            Command::ConnectionAccepted => Ok(CommandPacket::ConnectionAccepted),
            // the reason byte is optional; a missing or unknown one still
            // carries the command
            Command::ConnectionRefused => Ok(CommandPacket::ConnectionRefused(
                rest.first()
                    .and_then(|&code| ConnectionFailedReason::from_u8(code))
                    .unwrap_or_default(),
            )),
            Command::Disconnect => Ok(CommandPacket::Disconnect(
                rest.first()
                    .and_then(|&code| DisconnectReason::from_u8(code))
                    .unwrap_or_default(),
            )),
        }
    }

    /// Serialize to a complete datagram, type tag included
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(3);
        buf.put_u8(PacketType::Command.as_u8());
        buf.put_u8(self.command().as_u8());

        match self {
            CommandPacket::ConnectionRefused(reason) => buf.put_u8(reason.as_u8()),
            CommandPacket::Disconnect(reason) => buf.put_u8(reason.as_u8()),
            CommandPacket::ConnectRequest | CommandPacket::ConnectionAccepted => {}
        }

        buf.freeze()
    }
}

/// Header carried by every notify packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyHeader {
    /// Sequence number of this packet
    pub sequence: u64,
    /// Newest sequence the sender has received from us
    pub recv_sequence: u64,
    /// Bit `k` set means `recv_sequence - k` was received
    pub recv_mask: u64,
}

impl NotifyHeader {
    /// Write the header, type tag included
    pub fn write<B: BufMut>(&self, buf: &mut B, sequence_bytes: usize) {
        buf.put_u8(PacketType::Notify.as_u8());
        write_uint(buf, self.sequence, sequence_bytes);
        write_uint(buf, self.recv_sequence, sequence_bytes);
        write_uint(buf, self.recv_mask, ACK_MASK_BYTES);
    }

    /// Parse a notify datagram, returning the header and the payload slice
    pub fn parse(datagram: &[u8], sequence_bytes: usize) -> Result<(Self, &[u8]), PacketError> {
        let header_size = notify_header_size(sequence_bytes);
        if datagram.len() < header_size {
            return Err(PacketError::InsufficientData {
                expected: header_size,
                actual: datagram.len(),
            });
        }

        let mut buf = &datagram[TYPE_SIZE..header_size];
        let header = NotifyHeader {
            sequence: read_uint(&mut buf, sequence_bytes)?,
            recv_sequence: read_uint(&mut buf, sequence_bytes)?,
            recv_mask: read_uint(&mut buf, ACK_MASK_BYTES)?,
        };

        Ok((header, &datagram[header_size..]))
    }
}

/// A parsed datagram borrowing its payload from the receive buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet<'a> {
    Command(CommandPacket),
    Unreliable(&'a [u8]),
    KeepAlive,
    Notify {
        header: NotifyHeader,
        payload: &'a [u8],
    },
}

impl<'a> Packet<'a> {
    /// Parse a datagram by its type tag
    pub fn parse(datagram: &'a [u8], sequence_bytes: usize) -> Result<Self, PacketError> {
        let (&tag, body) = datagram.split_first().ok_or(PacketError::Empty)?;

        match PacketType::from_u8(tag).ok_or(PacketError::UnknownPacketType(tag))? {
            PacketType::Command => CommandPacket::from_bytes(body).map(Packet::Command),
            PacketType::Unreliable => Ok(Packet::Unreliable(body)),
            PacketType::KeepAlive => Ok(Packet::KeepAlive),
            PacketType::Notify => {
                let (header, payload) = NotifyHeader::parse(datagram, sequence_bytes)?;
                Ok(Packet::Notify { header, payload })
            }
        }
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Command(_) => PacketType::Command,
            Packet::Unreliable(_) => PacketType::Unreliable,
            Packet::KeepAlive => PacketType::KeepAlive,
            Packet::Notify { .. } => PacketType::Notify,
        }
    }
}

/// The only datagram accepted from an endpoint without a connection
pub const CONNECT_REQUEST: [u8; 2] = [PacketType::Command as u8, Command::ConnectRequest as u8];

/// Single-byte keepalive datagram
pub const KEEP_ALIVE: [u8; 1] = [PacketType::KeepAlive as u8];
