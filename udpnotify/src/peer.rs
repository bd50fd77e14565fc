//! Peer
//!
//! A [`Peer`] binds one UDP socket and multiplexes connections over it,
//! keyed by remote address. The same type plays client and server: any peer
//! may [`connect`](Peer::connect) out, and any peer accepts incoming connect
//! requests up to `max_connections`.
//!
//! The peer never blocks and never spawns threads. [`Peer::update`] reads
//! every pending datagram, then runs the per-connection timers once.

use crate::error::PeerError;
use crate::event::{PeerEvent, PeerHandler};
use bytes::{BufMut, Bytes, BytesMut};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use tracing::{debug, error, info, trace, warn, Dispatch};
use udpnotify_io::{Clock, NotifySocket};
use udpnotify_protocol::packet::{CONNECT_REQUEST, KEEP_ALIVE};
use udpnotify_protocol::{
    AckOutcome, CommandOutcome, CommandPacket, Config, ConfigError, Connection, ConnectionError,
    ConnectionFailedReason, ConnectionState, DisconnectReason, NotifyHeader, NotifyReceive,
    Packet, PacketError, PacketType, TimerAction,
};

/// UDP endpoint carrying any number of connections
///
/// `U` is the user data attached to notify packets and handed back with
/// their delivered/lost outcome.
pub struct Peer<U = ()> {
    config: Config,
    clock: Clock,
    socket: NotifySocket,
    local_addr: SocketAddr,
    connections: HashMap<SocketAddr, Connection<U>>,
    events: VecDeque<PeerEvent<U>>,
    recv_buffer: Vec<u8>,
    rng: StdRng,
    log_dispatch: Option<Dispatch>,
}

impl<U> Peer<U> {
    /// Validate `config` and bind a socket to its `bind_endpoint`
    pub fn bind(config: Config) -> Result<Self, PeerError> {
        config.validate()?;

        let mut socket = NotifySocket::bind(config.bind_endpoint)?;
        socket.set_ignore_connection_reset(config.ignore_connection_reset);
        let local_addr = socket.local_addr()?;
        info!("socket bound to {}", local_addr);

        Ok(Peer {
            // one spare byte to detect datagrams over the MTU
            recv_buffer: vec![0u8; config.mtu + 1],
            config,
            clock: Clock::start_new(),
            socket,
            local_addr,
            connections: HashMap::new(),
            events: VecDeque::new(),
            rng: StdRng::from_entropy(),
            log_dispatch: None,
        })
    }

    /// Like [`Peer::bind`], but every log line the peer emits goes to
    /// `dispatch` instead of the global subscriber
    pub fn with_log_dispatch(config: Config, dispatch: Dispatch) -> Result<Self, PeerError> {
        let mut peer = tracing::dispatcher::with_default(&dispatch, || Self::bind(config))?;
        peer.log_dispatch = Some(dispatch);
        Ok(peer)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Seconds since the peer was created
    pub fn now(&self) -> f64 {
        self.clock.elapsed_seconds()
    }

    pub fn connection(&self, remote: SocketAddr) -> Option<&Connection<U>> {
        self.connections.get(&remote)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection<U>> + '_ {
        self.connections.values()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn simulated_loss(&self) -> f64 {
        self.config.simulated_loss
    }

    /// Change the probability of dropping each received datagram
    pub fn set_simulated_loss(&mut self, probability: f64) -> Result<(), PeerError> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(ConfigError::SimulatedLoss(probability).into());
        }
        self.config.simulated_loss = probability;
        Ok(())
    }

    /// Start connecting to `remote`
    ///
    /// The first connect request goes out immediately; the outcome arrives
    /// as [`PeerEvent::Connected`] or [`PeerEvent::ConnectionFailed`].
    pub fn connect(&mut self, remote: SocketAddr) -> Result<(), PeerError> {
        self.in_log_scope(|peer| peer.connect_inner(remote))
    }

    /// Send a payload with no delivery tracking
    ///
    /// Returns `Ok(false)` without sending when the payload does not fit in
    /// one datagram or the connection is closing.
    pub fn send_unreliable(&mut self, remote: SocketAddr, data: &[u8]) -> Result<bool, PeerError> {
        self.in_log_scope(|peer| peer.send_unreliable_inner(remote, data))
    }

    /// Send a payload whose delivery or loss will be reported
    ///
    /// Returns `Ok(false)` when the send window is full or the connection is
    /// closing; nothing is queued in that case. Payloads that cannot fit
    /// after the notify header are an error. Once queued, a socket failure
    /// is logged and the packet is later reported as `NotifyLost`.
    pub fn send_notify(
        &mut self,
        remote: SocketAddr,
        data: &[u8],
        user_data: Option<U>,
    ) -> Result<bool, PeerError> {
        self.in_log_scope(|peer| peer.send_notify_inner(remote, data, user_data))
    }

    /// Close an established connection
    ///
    /// Returns `Ok(false)` if the connection is not in `Connected`.
    pub fn disconnect(&mut self, remote: SocketAddr) -> Result<bool, PeerError> {
        self.in_log_scope(|peer| peer.disconnect_inner(remote))
    }

    /// Send a raw datagram outside of any connection
    pub fn send_unconnected(&mut self, remote: SocketAddr, data: &[u8]) -> Result<(), PeerError> {
        if data.len() > self.config.mtu {
            return Err(PeerError::PayloadTooLarge {
                size: data.len(),
                max: self.config.mtu,
            });
        }
        self.socket.send_to(data, remote)?;
        Ok(())
    }

    /// Read all pending datagrams, then run connection timers
    ///
    /// A receive error is returned after the timers have run.
    pub fn update(&mut self) -> Result<(), PeerError> {
        self.in_log_scope(|peer| {
            let received = peer.receive_pending();
            peer.sweep_after_receive(received)
        })
    }

    /// Take the oldest queued event
    pub fn poll_event(&mut self) -> Option<PeerEvent<U>> {
        self.events.pop_front()
    }

    /// Take every queued event, oldest first
    pub fn drain_events(&mut self) -> std::collections::vec_deque::Drain<'_, PeerEvent<U>> {
        self.events.drain(..)
    }

    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Hand every queued event to `handler`
    ///
    /// Events queued by the handler itself are dispatched in the same call.
    pub fn dispatch_events<H: PeerHandler<U> + ?Sized>(&mut self, handler: &mut H) {
        while let Some(event) = self.events.pop_front() {
            event.dispatch(self, handler);
        }
    }

    /// Timers run even when reading the socket failed
    fn sweep_after_receive(&mut self, received: Result<(), PeerError>) -> Result<(), PeerError> {
        if let Err(e) = &received {
            warn!("receive failed: {}", e);
        }
        self.update_connections();
        received
    }

    fn in_log_scope<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        match self.log_dispatch.clone() {
            Some(dispatch) => tracing::dispatcher::with_default(&dispatch, || f(self)),
            None => f(self),
        }
    }

    fn connect_inner(&mut self, remote: SocketAddr) -> Result<(), PeerError> {
        if self.connections.contains_key(&remote) {
            return Err(PeerError::ConnectionExists(remote));
        }

        let now = self.now();
        let mut connection = Connection::new(&self.config, remote, now);
        connection.change_state(ConnectionState::Connecting)?;
        connection.begin_connect_attempt(now);
        self.connections.insert(remote, connection);
        debug!(remote = %remote, "connecting");

        if let Err(e) = self.send_command(remote, CommandPacket::ConnectRequest) {
            self.connections.remove(&remote);
            return Err(e);
        }
        Ok(())
    }

    fn send_unreliable_inner(&mut self, remote: SocketAddr, data: &[u8]) -> Result<bool, PeerError> {
        let max = self.config.max_unreliable_payload();
        if data.len() > max {
            error!(remote = %remote, "unreliable payload of {} bytes above maximum of {}", data.len(), max);
            return Ok(false);
        }

        let connection = self
            .connections
            .get(&remote)
            .ok_or(PeerError::UnknownConnection(remote))?;
        if !connection.can_send() {
            return Ok(false);
        }

        let mut buf = BytesMut::with_capacity(1 + data.len());
        buf.put_u8(PacketType::Unreliable.as_u8());
        buf.put_slice(data);
        self.send_to_connection(remote, &buf)?;
        Ok(true)
    }

    fn send_notify_inner(
        &mut self,
        remote: SocketAddr,
        data: &[u8],
        user_data: Option<U>,
    ) -> Result<bool, PeerError> {
        let now = self.now();
        let max = self.config.max_notify_payload();

        let connection = self
            .connections
            .get_mut(&remote)
            .ok_or(PeerError::UnknownConnection(remote))?;
        if connection.send_window().is_full() || !connection.can_send() {
            return Ok(false);
        }
        if data.len() > max {
            return Err(PeerError::PayloadTooLarge {
                size: data.len(),
                max,
            });
        }

        let datagram = match connection.prepare_notify(data, user_data, now) {
            Some(datagram) => datagram,
            None => return Ok(false),
        };
        // the packet is tracked from here on; a failed send reports it lost
        if let Err(e) = self.send_to_connection(remote, &datagram) {
            warn!(remote = %remote, "failed to send notify packet: {}", e);
        }
        Ok(true)
    }

    fn disconnect_inner(&mut self, remote: SocketAddr) -> Result<bool, PeerError> {
        let connection = self
            .connections
            .get(&remote)
            .ok_or(PeerError::UnknownConnection(remote))?;
        if !connection.is_connected() {
            error!(remote = %remote, "can't disconnect connection in state {:?}", connection.state());
            return Ok(false);
        }

        self.close_connection(remote, DisconnectReason::Requested);
        Ok(true)
    }

    /// Transition to `Disconnected`, tell the remote and surface the event
    fn close_connection(&mut self, remote: SocketAddr, reason: DisconnectReason) {
        let now = self.now();
        let connection = match self.connections.get_mut(&remote) {
            Some(connection) => connection,
            None => return,
        };

        if let Err(error) = connection.disconnect(now) {
            self.protocol_violation(remote, error);
            return;
        }

        info!(remote = %remote, "disconnected: {:?}", reason);
        self.send_command_or_log(remote, CommandPacket::Disconnect(reason));
        self.events
            .push_back(PeerEvent::Disconnected { remote, reason });
    }

    /// Remove a connection for good
    fn destroy_connection(&mut self, remote: SocketAddr) {
        if let Some(mut connection) = self.connections.remove(&remote) {
            if let Err(e) = connection.change_state(ConnectionState::Destroyed) {
                debug!(remote = %remote, "destroying connection: {}", e);
            }
        }
    }

    /// Drop a connection whose remote broke the protocol
    fn protocol_violation(&mut self, remote: SocketAddr, error: ConnectionError) {
        error!(remote = %remote, "protocol violation: {}", error);
        self.connections.remove(&remote);
        self.events
            .push_back(PeerEvent::ProtocolViolation { remote, error });
    }

    fn send_to_connection(&mut self, remote: SocketAddr, datagram: &[u8]) -> Result<(), PeerError> {
        let now = self.now();
        let connection = self
            .connections
            .get_mut(&remote)
            .ok_or(PeerError::UnknownConnection(remote))?;
        connection.record_sent(datagram.len(), now);
        self.socket.send_to(datagram, remote)?;
        Ok(())
    }

    fn send_command(&mut self, remote: SocketAddr, command: CommandPacket) -> Result<(), PeerError> {
        trace!(remote = %remote, "sending command {:?}", command);
        self.send_to_connection(remote, &command.to_bytes())
    }

    /// Timer-driven sends treat a failed send like a lost datagram
    fn send_command_or_log(&mut self, remote: SocketAddr, command: CommandPacket) {
        if let Err(e) = self.send_command(remote, command) {
            warn!(remote = %remote, "failed to send {:?}: {}", command, e);
        }
    }

    fn receive_pending(&mut self) -> Result<(), PeerError> {
        let mut buffer = std::mem::take(&mut self.recv_buffer);
        let result = self.drain_socket(&mut buffer);
        self.recv_buffer = buffer;
        result
    }

    fn drain_socket(&mut self, buffer: &mut [u8]) -> Result<(), PeerError> {
        while let Some((len, from)) = self.socket.try_recv_from(buffer)? {
            if len > self.config.mtu {
                debug!(remote = %from, "dropping datagram above the MTU of {}", self.config.mtu);
                continue;
            }

            let loss = self.config.simulated_loss;
            if loss > 0.0 && self.rng.gen::<f64>() < loss {
                trace!(remote = %from, "simulated loss of {} bytes", len);
                continue;
            }

            self.handle_datagram(from, &buffer[..len]);
        }
        Ok(())
    }

    fn handle_datagram(&mut self, from: SocketAddr, datagram: &[u8]) {
        let now = self.now();

        if !self.connections.contains_key(&from) {
            self.handle_unconnected(from, datagram, now);
            return;
        }

        if let Some(connection) = self.connections.get_mut(&from) {
            if !connection.can_send() {
                trace!(remote = %from, "ignoring datagram for closed connection");
                return;
            }
            connection.record_received(datagram.len(), now);
        }

        let packet = match Packet::parse(datagram, self.config.sequence_number_bytes) {
            Ok(packet) => packet,
            Err(PacketError::UnknownCommand(code)) => {
                info!(remote = %from, "unknown command {}", code);
                return;
            }
            Err(e) => {
                debug!(remote = %from, "dropping malformed datagram: {}", e);
                return;
            }
        };

        match packet {
            Packet::Command(command) => self.handle_command(from, command, now),
            Packet::Unreliable(payload) => self.events.push_back(PeerEvent::Unreliable {
                remote: from,
                payload: Bytes::copy_from_slice(payload),
            }),
            Packet::KeepAlive => trace!(remote = %from, "keepalive"),
            Packet::Notify { header, payload } => self.handle_notify(from, header, payload, now),
        }
    }

    fn handle_unconnected(&mut self, from: SocketAddr, datagram: &[u8], now: f64) {
        if datagram != CONNECT_REQUEST {
            trace!(remote = %from, "discarding {} bytes from unconnected endpoint", datagram.len());
            return;
        }

        if self.connections.len() >= self.config.max_connections {
            debug!(remote = %from, "refusing connection, server full");
            let refusal =
                CommandPacket::ConnectionRefused(ConnectionFailedReason::ServerFull).to_bytes();
            if let Err(e) = self.socket.send_to(&refusal, from) {
                warn!(remote = %from, "failed to send refusal: {}", e);
            }
            return;
        }

        let mut connection = Connection::new(&self.config, from, now);
        connection.record_received(datagram.len(), now);
        self.connections.insert(from, connection);
        trace!(remote = %from, "created connection");

        self.handle_command(from, CommandPacket::ConnectRequest, now);
    }

    fn handle_command(&mut self, remote: SocketAddr, command: CommandPacket, now: f64) {
        trace!(remote = %remote, "received command {:?}", command);

        let outcome = match self.connections.get_mut(&remote) {
            Some(connection) => connection.handle_command(command, now),
            None => return,
        };

        match outcome {
            Ok(CommandOutcome::Accepted) => {
                debug!(remote = %remote, "accepted connection");
                self.events.push_back(PeerEvent::Connected { remote });
                self.send_command_or_log(remote, CommandPacket::ConnectionAccepted);
            }
            Ok(CommandOutcome::AcceptAgain) => {
                self.send_command_or_log(remote, CommandPacket::ConnectionAccepted);
            }
            Ok(CommandOutcome::Established) => {
                debug!(remote = %remote, "connection established");
                self.events.push_back(PeerEvent::Connected { remote });
            }
            Ok(CommandOutcome::Ignored) => {}
            Ok(CommandOutcome::Refused(reason)) => {
                info!(remote = %remote, "connection refused: {:?}", reason);
                self.connections.remove(&remote);
                self.events
                    .push_back(PeerEvent::ConnectionFailed { remote, reason });
            }
            Ok(CommandOutcome::Disconnected(reason)) => {
                info!(remote = %remote, "remote disconnected: {:?}", reason);
                self.events
                    .push_back(PeerEvent::Disconnected { remote, reason });
            }
            Err(error) => self.protocol_violation(remote, error),
        }
    }

    fn handle_notify(&mut self, remote: SocketAddr, header: NotifyHeader, payload: &[u8], now: f64) {
        let connection = match self.connections.get_mut(&remote) {
            Some(connection) => connection,
            None => return,
        };

        match connection.receive_notify(&header, now) {
            NotifyReceive::OutOfBounds => {
                warn!(
                    remote = %remote,
                    "notify sequence {} out of bounds, last received {}",
                    header.sequence,
                    connection.recv_sequence()
                );
                self.close_connection(remote, DisconnectReason::SequenceOutOfBounds);
            }
            NotifyReceive::Stale => {
                trace!(remote = %remote, "dropping stale notify {}", header.sequence);
            }
            NotifyReceive::Accepted(acked) => {
                for packet in acked {
                    let event = match packet.outcome {
                        AckOutcome::Delivered => PeerEvent::NotifyDelivered {
                            remote,
                            user_data: packet.user_data,
                        },
                        AckOutcome::Lost => PeerEvent::NotifyLost {
                            remote,
                            user_data: packet.user_data,
                        },
                    };
                    self.events.push_back(event);
                }

                self.events.push_back(PeerEvent::NotifyReceived {
                    remote,
                    payload: Bytes::copy_from_slice(payload),
                });
            }
        }
    }

    fn update_connections(&mut self) {
        let now = self.now();
        let due: Vec<(SocketAddr, TimerAction)> = self
            .connections
            .values()
            .filter_map(|c| {
                c.poll_timers(&self.config, now)
                    .map(|action| (c.remote_addr(), action))
            })
            .collect();

        for (remote, action) in due {
            self.apply_timer(remote, action, now);
        }
    }

    fn apply_timer(&mut self, remote: SocketAddr, action: TimerAction, now: f64) {
        match action {
            TimerAction::RetryConnect => {
                if let Some(connection) = self.connections.get_mut(&remote) {
                    connection.begin_connect_attempt(now);
                    trace!(remote = %remote, "connect attempt {}", connection.connection_attempts());
                }
                self.send_command_or_log(remote, CommandPacket::ConnectRequest);
            }
            TimerAction::ConnectFailed => {
                info!(remote = %remote, "giving up connecting");
                self.destroy_connection(remote);
                self.events.push_back(PeerEvent::ConnectionFailed {
                    remote,
                    reason: ConnectionFailedReason::Timeout,
                });
            }
            TimerAction::TimedOut => {
                self.close_connection(remote, DisconnectReason::Timeout);
            }
            TimerAction::KeepAlive => {
                trace!(remote = %remote, "sending keepalive");
                if let Err(e) = self.send_to_connection(remote, &KEEP_ALIVE) {
                    warn!(remote = %remote, "failed to send keepalive: {}", e);
                }
            }
            TimerAction::Expire => {
                trace!(remote = %remote, "removing connection");
                self.destroy_connection(remote);
            }
        }
    }
}

impl<U> fmt::Debug for Peer<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("local_addr", &self.local_addr)
            .field("connections", &self.connections.len())
            .field("pending_events", &self.events.len())
            .finish()
    }
}
