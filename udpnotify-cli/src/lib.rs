//! udpnotify CLI Library
//!
//! Shared functionality for the `notify-peer` demo host.

pub mod config;
pub mod demo;
pub mod stats;

pub use config::{ConfigError, DemoSettings, HostConfig};
pub use demo::{DemoPeer, Role};
pub use stats::{display_connection_stats, format_rtt, format_traffic};
