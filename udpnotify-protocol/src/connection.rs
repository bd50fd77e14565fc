//! Connection State Machine
//!
//! One [`Connection`] exists per remote endpoint. It owns the notify send
//! window, the receive ack mask and the timestamps the peer's timer sweep
//! reads. The connection never touches a socket: every operation returns
//! what should be sent or surfaced and the peer carries it out.
//!
//! ```text
//! Created ──> Connecting ──> Connected ──> Disconnected ──> Destroyed
//!    └────────────────────────^  └─(abandoned handshake)──────^
//! ```

use crate::ack::{advance_mask, outcome_for, AckOutcome, AckedPacket, RttEstimator};
use crate::buffer::{BufferError, RingBuffer, SendEnvelope};
use crate::config::Config;
use crate::packet::{
    CommandPacket, ConnectionFailedReason, DisconnectReason, NotifyHeader,
};
use crate::sequence::Sequencer;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::trace;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    /// Allocated, no handshake traffic yet
    Created,
    /// Connect requests sent, waiting for acceptance
    Connecting,
    /// Handshake complete
    Connected,
    /// Closed, lingering so late packets are ignored
    Disconnected,
    /// Removed from the peer
    Destroyed,
}

impl ConnectionState {
    /// Whether the state machine allows `self -> to`
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, to),
            (Created, Connecting)
                | (Created, Connected)
                | (Connecting, Connected)
                | (Connecting, Destroyed)
                | (Connected, Disconnected)
                | (Disconnected, Destroyed)
        )
    }
}

/// Connection errors
///
/// Both variants mean the remote (or the caller) drove the state machine
/// somewhere it must not go. The peer treats them as fatal for the
/// connection involved only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Illegal state transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("Command {command:?} not valid in state {state:?}")]
    UnexpectedCommand {
        command: CommandPacket,
        state: ConnectionState,
    },

    #[error("Send window error: {0}")]
    Buffer(#[from] BufferError),
}

/// Connection statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionStats {
    /// Total datagrams sent
    pub packets_sent: u64,
    /// Total datagrams received
    pub packets_received: u64,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Notify packets sent
    pub notify_sent: u64,
    /// Notify packets the remote confirmed
    pub notify_delivered: u64,
    /// Notify packets the remote reported missing
    pub notify_lost: u64,
    /// Incoming notify packets dropped as duplicate or out of order
    pub notify_stale: u64,
}

/// What the peer should do after a command was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Newly connected as the accepting side; reply with acceptance
    Accepted,
    /// Already connected; the acceptance got lost, send it again
    AcceptAgain,
    /// Newly connected as the initiating side
    Established,
    /// Nothing to do
    Ignored,
    /// Remote refused; the connection is destroyed
    Refused(ConnectionFailedReason),
    /// Remote closed the connection
    Disconnected(DisconnectReason),
}

/// Result of applying an incoming notify header
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyReceive<U> {
    /// New packet; payload should be surfaced after these ack outcomes
    Accepted(Vec<AckedPacket<U>>),
    /// Duplicate or older than the newest received packet
    Stale,
    /// Sequence numbers drifted further apart than the send window
    OutOfBounds,
}

/// Work the timer sweep found due for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Send another connect request
    RetryConnect,
    /// Out of connect attempts
    ConnectFailed,
    /// Nothing heard within the connection timeout
    TimedOut,
    /// Idle long enough to need a keepalive
    KeepAlive,
    /// Disconnect grace period over; remove the connection
    Expire,
}

/// Per-remote protocol state
pub struct Connection<U> {
    state: ConnectionState,
    remote_addr: SocketAddr,
    connection_attempts: u32,
    connection_attempt_time: f64,
    last_sent_time: f64,
    last_recv_time: f64,
    disconnect_time: f64,
    rtt: RttEstimator,
    sequence_bytes: usize,
    window_size: usize,
    send_sequencer: Sequencer,
    send_window: RingBuffer<SendEnvelope<U>>,
    recv_sequence: u64,
    recv_mask: u64,
    stats: ConnectionStats,
}

impl<U> Connection<U> {
    /// Create a connection in [`ConnectionState::Created`]
    pub fn new(config: &Config, remote_addr: SocketAddr, now: f64) -> Self {
        // sequence 0 doubles as the remote's "nothing received yet" value,
        // so the first notify packet goes out as 1
        let mut send_sequencer = Sequencer::new(config.sequence_number_bytes);
        send_sequencer.next();

        Connection {
            state: ConnectionState::Created,
            remote_addr,
            connection_attempts: 0,
            connection_attempt_time: 0.0,
            last_sent_time: now,
            last_recv_time: now,
            disconnect_time: 0.0,
            rtt: RttEstimator::new(),
            sequence_bytes: config.sequence_number_bytes,
            window_size: config.send_window_size,
            send_sequencer,
            send_window: RingBuffer::new(config.send_window_size),
            recv_sequence: 0,
            recv_mask: 0,
            stats: ConnectionStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Latest RTT sample in seconds
    pub fn rtt(&self) -> f64 {
        self.rtt.latest()
    }

    pub fn rtt_estimator(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn recv_sequence(&self) -> u64 {
        self.recv_sequence
    }

    pub fn recv_mask(&self) -> u64 {
        self.recv_mask
    }

    pub fn connection_attempts(&self) -> u32 {
        self.connection_attempts
    }

    pub fn last_recv_time(&self) -> f64 {
        self.last_recv_time
    }

    pub fn last_sent_time(&self) -> f64 {
        self.last_sent_time
    }

    pub fn disconnect_time(&self) -> f64 {
        self.disconnect_time
    }

    /// Sequencer handing out notify sequence numbers
    pub fn send_sequencer(&self) -> &Sequencer {
        &self.send_sequencer
    }

    /// Unacknowledged notify packets, oldest first
    pub fn send_window(&self) -> &RingBuffer<SendEnvelope<U>> {
        &self.send_window
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Whether the connection may still put packets on the wire
    pub fn can_send(&self) -> bool {
        self.state < ConnectionState::Disconnected
    }

    /// Move to `to`, rejecting transitions the state machine forbids
    pub fn change_state(&mut self, to: ConnectionState) -> Result<(), ConnectionError> {
        if !self.state.can_transition_to(to) {
            return Err(ConnectionError::InvalidTransition {
                from: self.state,
                to,
            });
        }

        trace!(remote = %self.remote_addr, "changed state from {:?} to {:?}", self.state, to);
        self.state = to;

        if to == ConnectionState::Destroyed {
            self.send_window.clear();
        }

        Ok(())
    }

    /// Record that a connect request is going out now
    pub fn begin_connect_attempt(&mut self, now: f64) {
        self.connection_attempts += 1;
        self.connection_attempt_time = now;
    }

    /// Close the connection locally
    pub fn disconnect(&mut self, now: f64) -> Result<(), ConnectionError> {
        self.change_state(ConnectionState::Disconnected)?;
        self.disconnect_time = now;
        Ok(())
    }

    /// Account for a datagram put on the wire
    pub fn record_sent(&mut self, bytes: usize, now: f64) {
        self.last_sent_time = now;
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes as u64;
    }

    /// Account for a datagram received from the remote
    pub fn record_received(&mut self, bytes: usize, now: f64) {
        self.last_recv_time = now;
        self.stats.packets_received += 1;
        self.stats.bytes_received += bytes as u64;
    }

    /// Build a notify datagram and track it in the send window
    ///
    /// Returns `None` when the window is full or the connection is closed.
    /// The caller checks the payload against the MTU beforehand.
    pub fn prepare_notify(
        &mut self,
        payload: &[u8],
        user_data: Option<U>,
        now: f64,
    ) -> Option<Bytes> {
        if self.send_window.is_full() || !self.can_send() {
            return None;
        }

        let sequence = self.send_sequencer.next();
        let header = NotifyHeader {
            sequence,
            recv_sequence: self.recv_sequence,
            recv_mask: self.recv_mask,
        };

        let mut buf = BytesMut::with_capacity(
            crate::packet::notify_header_size(self.sequence_bytes) + payload.len(),
        );
        header.write(&mut buf, self.sequence_bytes);
        buf.put_slice(payload);

        // capacity was checked above
        self.send_window
            .push(SendEnvelope {
                sequence,
                send_time: now,
                user_data,
            })
            .ok()?;
        self.stats.notify_sent += 1;

        Some(buf.freeze())
    }

    /// Apply an incoming notify header
    pub fn receive_notify(&mut self, header: &NotifyHeader, now: f64) -> NotifyReceive<U> {
        let distance = self
            .send_sequencer
            .distance(header.sequence, self.recv_sequence);

        if distance.unsigned_abs() > self.window_size as u64 {
            return NotifyReceive::OutOfBounds;
        }

        if distance <= 0 {
            self.stats.notify_stale += 1;
            return NotifyReceive::Stale;
        }

        self.recv_sequence = header.sequence;
        self.recv_mask = advance_mask(self.recv_mask, distance);

        NotifyReceive::Accepted(self.ack_packets(header.recv_sequence, header.recv_mask, now))
    }

    /// Settle every send window entry the remote has reported past
    ///
    /// The window is in send order, so the first entry the remote has not
    /// reached yet ends the scan.
    pub fn ack_packets(
        &mut self,
        remote_recv_sequence: u64,
        remote_recv_mask: u64,
        now: f64,
    ) -> Vec<AckedPacket<U>> {
        let mut acked = Vec::new();

        while let Ok(envelope) = self.send_window.peek() {
            let distance = self
                .send_sequencer
                .distance(envelope.sequence, remote_recv_sequence);
            if distance > 0 {
                break;
            }

            let envelope = match self.send_window.pop() {
                Ok(envelope) => envelope,
                Err(_) => break,
            };

            if distance == 0 {
                self.rtt.update(now - envelope.send_time);
            }

            let outcome = outcome_for(distance, remote_recv_mask);
            match outcome {
                AckOutcome::Delivered => self.stats.notify_delivered += 1,
                AckOutcome::Lost => self.stats.notify_lost += 1,
            }

            acked.push(AckedPacket {
                sequence: envelope.sequence,
                outcome,
                user_data: envelope.user_data,
            });
        }

        acked
    }

    /// Apply a command received from the remote
    pub fn handle_command(
        &mut self,
        command: CommandPacket,
        now: f64,
    ) -> Result<CommandOutcome, ConnectionError> {
        use ConnectionState::*;

        let unexpected = ConnectionError::UnexpectedCommand {
            command,
            state: self.state,
        };

        match (command, self.state) {
            (CommandPacket::ConnectRequest, Created) => {
                self.change_state(Connected)?;
                Ok(CommandOutcome::Accepted)
            }
            (CommandPacket::ConnectRequest, Connected) => Ok(CommandOutcome::AcceptAgain),

            (CommandPacket::ConnectionAccepted, Connecting) => {
                self.change_state(Connected)?;
                Ok(CommandOutcome::Established)
            }
            (CommandPacket::ConnectionAccepted, Connected) => Ok(CommandOutcome::Ignored),

            (CommandPacket::ConnectionRefused(reason), Connecting) => {
                self.change_state(Destroyed)?;
                Ok(CommandOutcome::Refused(reason))
            }

            (CommandPacket::Disconnect(reason), Connected) => {
                self.disconnect(now)?;
                Ok(CommandOutcome::Disconnected(reason))
            }

            _ => Err(unexpected),
        }
    }

    /// Check the per-state timers
    pub fn poll_timers(&self, config: &Config, now: f64) -> Option<TimerAction> {
        match self.state {
            ConnectionState::Connecting => {
                if now - self.connection_attempt_time < config.connect_attempt_interval {
                    None
                } else if self.connection_attempts >= config.max_connect_attempts {
                    Some(TimerAction::ConnectFailed)
                } else {
                    Some(TimerAction::RetryConnect)
                }
            }
            ConnectionState::Connected => {
                if now - self.last_recv_time >= config.connection_timeout {
                    Some(TimerAction::TimedOut)
                } else if now - self.last_sent_time >= config.keep_alive_interval {
                    Some(TimerAction::KeepAlive)
                } else {
                    None
                }
            }
            ConnectionState::Disconnected => {
                if now - self.disconnect_time >= config.disconnect_idle_time {
                    Some(TimerAction::Expire)
                } else {
                    None
                }
            }
            ConnectionState::Created | ConnectionState::Destroyed => None,
        }
    }
}

impl<U> fmt::Display for Connection<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Connection remote={}]", self.remote_addr)
    }
}

impl<U> fmt::Debug for Connection<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("remote_addr", &self.remote_addr)
            .field("recv_sequence", &self.recv_sequence)
            .field("recv_mask", &format_args!("{:#b}", self.recv_mask))
            .field("in_flight", &self.send_window.len())
            .finish()
    }
}
