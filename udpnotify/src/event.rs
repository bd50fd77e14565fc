//! Peer events
//!
//! Everything the peer has to report (state changes, received payloads and
//! notify outcomes) is queued as a [`PeerEvent`] in the order it happened.
//! Callers either drain the queue themselves or hand it to a
//! [`PeerHandler`] through [`Peer::dispatch_events`].

use crate::peer::Peer;
use bytes::Bytes;
use std::net::SocketAddr;
use udpnotify_protocol::{ConnectionError, ConnectionFailedReason, DisconnectReason};

/// Something that happened on a peer
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent<U> {
    /// Handshake completed, on either side
    Connected { remote: SocketAddr },

    /// Outbound connect abandoned or refused
    ConnectionFailed {
        remote: SocketAddr,
        reason: ConnectionFailedReason,
    },

    /// Connection closed, locally or by the remote
    Disconnected {
        remote: SocketAddr,
        reason: DisconnectReason,
    },

    /// Unreliable payload received
    Unreliable { remote: SocketAddr, payload: Bytes },

    /// Notify payload received
    NotifyReceived { remote: SocketAddr, payload: Bytes },

    /// The remote confirmed receipt of a notify packet
    NotifyDelivered {
        remote: SocketAddr,
        user_data: Option<U>,
    },

    /// The remote reported a notify packet missing
    NotifyLost {
        remote: SocketAddr,
        user_data: Option<U>,
    },

    /// The remote broke the protocol; its connection was dropped
    ProtocolViolation {
        remote: SocketAddr,
        error: ConnectionError,
    },
}

impl<U> PeerEvent<U> {
    /// Remote endpoint the event concerns
    pub fn remote(&self) -> SocketAddr {
        match self {
            PeerEvent::Connected { remote }
            | PeerEvent::ConnectionFailed { remote, .. }
            | PeerEvent::Disconnected { remote, .. }
            | PeerEvent::Unreliable { remote, .. }
            | PeerEvent::NotifyReceived { remote, .. }
            | PeerEvent::NotifyDelivered { remote, .. }
            | PeerEvent::NotifyLost { remote, .. }
            | PeerEvent::ProtocolViolation { remote, .. } => *remote,
        }
    }
}

/// Callback-style consumer of peer events
///
/// Every method defaults to doing nothing. Handlers get the peer back so
/// they can react in place, for example by resending a lost message.
#[allow(unused_variables)]
pub trait PeerHandler<U> {
    fn on_connected(&mut self, peer: &mut Peer<U>, remote: SocketAddr) {}

    fn on_connection_failed(
        &mut self,
        peer: &mut Peer<U>,
        remote: SocketAddr,
        reason: ConnectionFailedReason,
    ) {
    }

    fn on_disconnected(&mut self, peer: &mut Peer<U>, remote: SocketAddr, reason: DisconnectReason) {
    }

    fn on_unreliable(&mut self, peer: &mut Peer<U>, remote: SocketAddr, payload: Bytes) {}

    fn on_notify_received(&mut self, peer: &mut Peer<U>, remote: SocketAddr, payload: Bytes) {}

    fn on_notify_delivered(&mut self, peer: &mut Peer<U>, remote: SocketAddr, user_data: Option<U>) {
    }

    fn on_notify_lost(&mut self, peer: &mut Peer<U>, remote: SocketAddr, user_data: Option<U>) {}

    fn on_protocol_violation(
        &mut self,
        peer: &mut Peer<U>,
        remote: SocketAddr,
        error: ConnectionError,
    ) {
    }
}

impl<U> PeerEvent<U> {
    /// Route the event to the matching handler method
    pub fn dispatch<H: PeerHandler<U> + ?Sized>(self, peer: &mut Peer<U>, handler: &mut H) {
        match self {
            PeerEvent::Connected { remote } => handler.on_connected(peer, remote),
            PeerEvent::ConnectionFailed { remote, reason } => {
                handler.on_connection_failed(peer, remote, reason)
            }
            PeerEvent::Disconnected { remote, reason } => {
                handler.on_disconnected(peer, remote, reason)
            }
            PeerEvent::Unreliable { remote, payload } => {
                handler.on_unreliable(peer, remote, payload)
            }
            PeerEvent::NotifyReceived { remote, payload } => {
                handler.on_notify_received(peer, remote, payload)
            }
            PeerEvent::NotifyDelivered { remote, user_data } => {
                handler.on_notify_delivered(peer, remote, user_data)
            }
            PeerEvent::NotifyLost { remote, user_data } => {
                handler.on_notify_lost(peer, remote, user_data)
            }
            PeerEvent::ProtocolViolation { remote, error } => {
                handler.on_protocol_violation(peer, remote, error)
            }
        }
    }
}
