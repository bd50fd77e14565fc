//! Notify demo
//!
//! The client sends numbered notify messages, one per tick, and sends a
//! message again whenever it is reported lost. Once everything is out, and
//! on the server side always, each tick carries an empty notify packet so
//! acknowledgements keep flowing in both directions.

use bytes::Bytes;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use tracing::{debug, info, warn};
use udpnotify::{
    Config, ConnectionFailedReason, DisconnectReason, Peer, PeerError, PeerHandler,
};

/// Which side of the demo a peer plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Event-side state of a demo peer
#[derive(Debug)]
struct DemoState {
    role: Role,
    remote: Option<SocketAddr>,
    delivered: BTreeSet<u32>,
    received: BTreeSet<u32>,
    resent: u64,
    failed: bool,
}

impl DemoState {
    fn new(role: Role) -> Self {
        DemoState {
            role,
            remote: None,
            delivered: BTreeSet::new(),
            received: BTreeSet::new(),
            resent: 0,
            failed: false,
        }
    }
}

impl PeerHandler<u32> for DemoState {
    fn on_connected(&mut self, _peer: &mut Peer<u32>, remote: SocketAddr) {
        info!("{:?} connected to {}", self.role, remote);
        self.remote = Some(remote);
    }

    fn on_connection_failed(
        &mut self,
        _peer: &mut Peer<u32>,
        remote: SocketAddr,
        reason: ConnectionFailedReason,
    ) {
        warn!("connection to {} failed: {:?}", remote, reason);
        self.failed = true;
    }

    fn on_disconnected(&mut self, _peer: &mut Peer<u32>, remote: SocketAddr, reason: DisconnectReason) {
        info!("disconnected from {}: {:?}", remote, reason);
        if self.remote == Some(remote) {
            self.remote = None;
        }
    }

    fn on_notify_received(&mut self, _peer: &mut Peer<u32>, _remote: SocketAddr, payload: Bytes) {
        if let Ok(bytes) = <[u8; 4]>::try_from(payload.as_ref()) {
            let number = u32::from_le_bytes(bytes);
            info!("got data: {}", number);
            self.received.insert(number);
        }
    }

    fn on_notify_delivered(&mut self, _peer: &mut Peer<u32>, _remote: SocketAddr, user_data: Option<u32>) {
        if let Some(number) = user_data {
            info!("delivered: {}", number);
            self.delivered.insert(number);
        }
    }

    fn on_notify_lost(&mut self, peer: &mut Peer<u32>, remote: SocketAddr, user_data: Option<u32>) {
        if let Some(number) = user_data {
            info!("resend: {}", number);
            self.resent += 1;
            match peer.send_notify(remote, &number.to_le_bytes(), Some(number)) {
                Ok(true) => {}
                Ok(false) => warn!("send window full, could not resend {}", number),
                Err(e) => warn!("resend of {} failed: {}", number, e),
            }
        }
    }
}

/// One side of the demo
#[derive(Debug)]
pub struct DemoPeer {
    peer: Peer<u32>,
    state: DemoState,
    message_count: u32,
    next_number: u32,
}

impl DemoPeer {
    /// Bind a server
    pub fn server(config: Config, message_count: u32) -> Result<Self, PeerError> {
        Ok(DemoPeer {
            peer: Peer::bind(config)?,
            state: DemoState::new(Role::Server),
            message_count,
            next_number: 0,
        })
    }

    /// Bind a client and start connecting to `server`
    pub fn client(config: Config, server: SocketAddr, message_count: u32) -> Result<Self, PeerError> {
        let mut peer = Peer::bind(config)?;
        peer.connect(server)?;

        Ok(DemoPeer {
            peer,
            state: DemoState::new(Role::Client),
            message_count,
            next_number: 0,
        })
    }

    pub fn role(&self) -> Role {
        self.state.role
    }

    pub fn peer(&self) -> &Peer<u32> {
        &self.peer
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.state.remote
    }

    /// Numbers the remote confirmed
    pub fn delivered(&self) -> &BTreeSet<u32> {
        &self.state.delivered
    }

    /// Numbers received from the remote
    pub fn received(&self) -> &BTreeSet<u32> {
        &self.state.received
    }

    /// Resends triggered by loss reports
    pub fn resent(&self) -> u64 {
        self.state.resent
    }

    /// Whether the connect attempt was abandoned or refused
    pub fn failed(&self) -> bool {
        self.state.failed
    }

    /// Client: every message confirmed. Server: every message received.
    pub fn is_complete(&self) -> bool {
        let done = match self.state.role {
            Role::Client => &self.state.delivered,
            Role::Server => &self.state.received,
        };
        done.len() as u32 >= self.message_count
    }

    /// Update the peer, react to its events and send this tick's notify
    pub fn tick(&mut self) -> Result<(), PeerError> {
        self.peer.update()?;
        self.peer.dispatch_events(&mut self.state);

        let remote = match self.state.remote {
            Some(remote) => remote,
            None => return Ok(()),
        };

        let sent = if self.state.role == Role::Client && self.next_number < self.message_count {
            self.next_number += 1;
            let number = self.next_number;
            self.peer
                .send_notify(remote, &number.to_le_bytes(), Some(number))?
        } else {
            self.peer.send_notify(remote, &[], None)?
        };

        if !sent {
            debug!("send window full");
        }
        Ok(())
    }
}
