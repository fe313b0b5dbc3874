//! Server and session configuration
//!
//! Plain configuration structs with sensible defaults. There is no file or
//! environment loading here; whoever bootstraps the process owns that and
//! passes a finished config in.
//!
//! # Examples
//!
//! ```rust
//! use audiosock_server::ServerConfig;
//! use std::time::Duration;
//!
//! let config = ServerConfig::new()
//!     .with_port(0) // let the OS pick; read it back via local_addr()
//!     .with_accept_timeout(Some(Duration::from_secs(30)));
//!
//! assert_eq!(config.port, 0);
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Configuration for one [`crate::Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity, in frames, of the inbound and outbound audio queues.
    pub queue_capacity: usize,
    /// How long `close()` waits for the outbound queue to drain before
    /// tearing the connection down anyway.
    pub drain_timeout: Duration,
    /// Pause after sending the hangup sequence, giving it time to reach the
    /// PBX before the socket is released.
    pub hangup_grace: Duration,
    /// When set, the inbound queue holds delivery after an underrun until
    /// this many frames have accumulated again. Smooths jittery producers at
    /// the cost of added latency. Off by default.
    pub prebuffer_frames: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 500,
            drain_timeout: Duration::from_secs(5),
            hangup_grace: Duration::from_millis(200),
            prebuffer_frames: None,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_hangup_grace(mut self, grace: Duration) -> Self {
        self.hangup_grace = grace;
        self
    }

    pub fn with_prebuffer_frames(mut self, frames: Option<usize>) -> Self {
        self.prebuffer_frames = frames;
        self
    }
}

/// Configuration for an [`crate::AudioSocketServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listening socket on.
    pub bind_addr: IpAddr,
    /// Port to bind; 0 asks the OS for an ephemeral port, discoverable
    /// afterwards through `local_addr()` so the PBX can be told where to
    /// connect.
    pub port: u16,
    /// First sleep of the `accept(stream_id)` poll loop.
    pub accept_poll_initial: Duration,
    /// Backoff cap for the `accept(stream_id)` poll loop.
    pub accept_poll_max: Duration,
    /// How long `accept(stream_id)` waits for the stream to register before
    /// giving up. `None` waits indefinitely.
    pub accept_timeout: Option<Duration>,
    /// Configuration applied to every accepted session.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            accept_poll_initial: Duration::from_millis(25),
            accept_poll_max: Duration::from_millis(250),
            accept_timeout: None,
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_accept_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.accept_timeout = timeout;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 0);
        assert!(config.accept_timeout.is_none());
        assert_eq!(config.session.queue_capacity, 500);
        assert!(config.session.prebuffer_frames.is_none());
    }

    #[test]
    fn test_builders() {
        let config = ServerConfig::new()
            .with_port(9092)
            .with_accept_timeout(Some(Duration::from_secs(1)))
            .with_session(SessionConfig::new().with_queue_capacity(0));
        assert_eq!(config.port, 9092);
        // Capacity is clamped to at least one frame.
        assert_eq!(config.session.queue_capacity, 1);
    }
}
