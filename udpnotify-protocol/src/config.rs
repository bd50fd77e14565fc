//! Peer configuration
//!
//! All intervals are in seconds, matching the clock the peer runs on.

use crate::packet::notify_header_size;
use crate::sequence::{MAX_SEQUENCE_BYTES, MIN_SEQUENCE_BYTES};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Sequence width {0} outside 1..=8 bytes")]
    SequenceBytes(usize),

    #[error("MTU {mtu} leaves no room for a notify header of {header} bytes")]
    MtuTooSmall { mtu: usize, header: usize },

    #[error("Send window must hold at least one packet")]
    EmptySendWindow,

    #[error("Send window {window} too large for {bytes}-byte sequence numbers")]
    SendWindowTooLarge { window: usize, bytes: usize },

    #[error("Simulated loss {0} outside 0.0..=1.0")]
    SimulatedLoss(f64),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Immutable per-peer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Largest datagram the peer sends or receives
    pub mtu: usize,
    /// Width of notify sequence numbers on the wire (1 to 8)
    pub sequence_number_bytes: usize,
    /// Maximum unacknowledged notify packets per connection
    pub send_window_size: usize,
    /// Silence (seconds) after which a connection times out
    pub connection_timeout: f64,
    /// Send a keepalive after this long (seconds) without sending anything
    pub keep_alive_interval: f64,
    /// Delay (seconds) between connect requests
    pub connect_attempt_interval: f64,
    /// Connect requests sent before the attempt is abandoned
    pub max_connect_attempts: u32,
    /// Connection table size
    pub max_connections: usize,
    /// Time (seconds) a disconnected connection lingers before removal
    pub disconnect_idle_time: f64,
    /// Probability of dropping each received datagram (testing only)
    pub simulated_loss: f64,
    /// Local address to bind
    pub bind_endpoint: SocketAddr,
    /// Skip ICMP-driven connection reset errors on receive
    pub ignore_connection_reset: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mtu: 1200,
            sequence_number_bytes: 2,
            send_window_size: 512,
            connection_timeout: 5.0,
            keep_alive_interval: 1.0,
            connect_attempt_interval: 0.25,
            max_connect_attempts: 10,
            max_connections: 64,
            disconnect_idle_time: 2.0,
            simulated_loss: 0.0,
            bind_endpoint: SocketAddr::from(([0, 0, 0, 0], 0)),
            ignore_connection_reset: true,
        }
    }
}

impl Config {
    /// Default configuration bound to `addr`
    pub fn bound_to(addr: SocketAddr) -> Self {
        Config {
            bind_endpoint: addr,
            ..Config::default()
        }
    }

    pub fn with_bind_endpoint(mut self, addr: SocketAddr) -> Self {
        self.bind_endpoint = addr;
        self
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_sequence_number_bytes(mut self, bytes: usize) -> Self {
        self.sequence_number_bytes = bytes;
        self
    }

    pub fn with_send_window_size(mut self, size: usize) -> Self {
        self.send_window_size = size;
        self
    }

    pub fn with_connection_timeout(mut self, seconds: f64) -> Self {
        self.connection_timeout = seconds;
        self
    }

    pub fn with_keep_alive_interval(mut self, seconds: f64) -> Self {
        self.keep_alive_interval = seconds;
        self
    }

    pub fn with_connect_attempt_interval(mut self, seconds: f64) -> Self {
        self.connect_attempt_interval = seconds;
        self
    }

    pub fn with_max_connect_attempts(mut self, attempts: u32) -> Self {
        self.max_connect_attempts = attempts;
        self
    }

    pub fn with_max_connections(mut self, connections: usize) -> Self {
        self.max_connections = connections;
        self
    }

    pub fn with_disconnect_idle_time(mut self, seconds: f64) -> Self {
        self.disconnect_idle_time = seconds;
        self
    }

    pub fn with_simulated_loss(mut self, probability: f64) -> Self {
        self.simulated_loss = probability;
        self
    }

    /// Size of the notify header under this configuration
    #[inline]
    pub fn notify_header_size(&self) -> usize {
        notify_header_size(self.sequence_number_bytes)
    }

    /// Largest payload a notify packet can carry
    #[inline]
    pub fn max_notify_payload(&self) -> usize {
        self.mtu.saturating_sub(self.notify_header_size())
    }

    /// Largest payload an unreliable packet can carry
    #[inline]
    pub fn max_unreliable_payload(&self) -> usize {
        self.mtu.saturating_sub(1)
    }

    /// Check the settings are internally consistent
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bytes = self.sequence_number_bytes;
        if !(MIN_SEQUENCE_BYTES..=MAX_SEQUENCE_BYTES).contains(&bytes) {
            return Err(ConfigError::SequenceBytes(bytes));
        }

        let header = self.notify_header_size();
        if self.mtu <= header {
            return Err(ConfigError::MtuTooSmall {
                mtu: self.mtu,
                header,
            });
        }

        if self.send_window_size == 0 {
            return Err(ConfigError::EmptySendWindow);
        }

        // the window must stay inside half the sequence ring for distances
        // to stay unambiguous
        let half_ring = 1u128 << (bytes * 8 - 1);
        if self.send_window_size as u128 >= half_ring {
            return Err(ConfigError::SendWindowTooLarge {
                window: self.send_window_size,
                bytes,
            });
        }

        if !(0.0..=1.0).contains(&self.simulated_loss) {
            return Err(ConfigError::SimulatedLoss(self.simulated_loss));
        }

        for (name, value) in [
            ("connection_timeout", self.connection_timeout),
            ("keep_alive_interval", self.keep_alive_interval),
            ("connect_attempt_interval", self.connect_attempt_interval),
            ("disconnect_idle_time", self.disconnect_idle_time),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a non-negative number of seconds",
                    name
                )));
            }
        }

        if self.max_connect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_connect_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn test_payload_limits() {
        let config = Config::default().with_mtu(100).with_sequence_number_bytes(2);
        assert_eq!(config.notify_header_size(), 13);
        assert_eq!(config.max_notify_payload(), 87);
        assert_eq!(config.max_unreliable_payload(), 99);
    }

    #[test]
    fn test_invalid_sequence_bytes() {
        let config = Config::default().with_sequence_number_bytes(9);
        assert_eq!(config.validate(), Err(ConfigError::SequenceBytes(9)));
    }

    #[test]
    fn test_window_must_fit_half_ring() {
        let config = Config::default()
            .with_sequence_number_bytes(1)
            .with_send_window_size(128);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SendWindowTooLarge { .. })
        ));

        let config = config.with_send_window_size(127);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_mtu_too_small() {
        let config = Config::default().with_mtu(13);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MtuTooSmall { mtu: 13, header: 13 })
        ));
    }

    #[test]
    fn test_bad_loss() {
        let config = Config::default().with_simulated_loss(1.5);
        assert_eq!(config.validate(), Err(ConfigError::SimulatedLoss(1.5)));
    }
}
