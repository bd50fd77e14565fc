//! udpnotify I/O and Platform Abstraction
//!
//! This crate provides the non-blocking UDP socket and the monotonic clock
//! the peer runs on.

pub mod socket;
pub mod time;

pub use socket::{NotifySocket, SocketError};
pub use time::Clock;
