//! Listener and connection settings.

use crate::error::{Error, Result};

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

/// Pending-connection queue length passed to `listen(2)` by default.
pub const DEFAULT_BACKLOG: i32 = 5;

/// Default size of the receive and send buffers, in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 65_535;

/// How long a send waits for a full socket buffer to drain by default.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Where and how the connection manager listens.
///
/// # Example
/// ```
/// use uaio::NetworkConfig;
/// use std::net::Ipv4Addr;
///
/// let config = NetworkConfig::new(4840)
///     .with_address(Ipv4Addr::LOCALHOST)
///     .with_backlog(16);
/// assert_eq!(config.socket_addr().to_string(), "127.0.0.1:4840");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Local address to bind. Defaults to all interfaces.
    pub address: Ipv4Addr,
    /// Local port. `0` picks an ephemeral port.
    pub port: u16,
    pub backlog: i32,
    /// Longest a single send may wait for the socket to become writable.
    pub send_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

impl NetworkConfig {
    pub fn new(port: u16) -> Self {
        Self {
            address: Ipv4Addr::UNSPECIFIED,
            port,
            backlog: DEFAULT_BACKLOG,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_address(mut self, address: Ipv4Addr) -> Self {
        self.address = address;
        self
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.address, self.port)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.backlog <= 0 {
            return Err(Error::InvalidConfig("backlog must be positive"));
        }

        Ok(())
    }
}

/// Transport limits negotiated with the remote side.
///
/// Every accepted connection starts with a copy of the manager's base
/// configuration. A limit of `0` means "no limit".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub protocol_version: u32,
    /// Size of the buffer each receive reads into.
    pub recv_buffer_size: usize,
    /// Largest buffer handed out for a single send.
    pub send_buffer_size: usize,
    pub local_max_message_size: usize,
    pub remote_max_message_size: usize,
    pub local_max_chunk_count: usize,
    pub remote_max_chunk_count: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            protocol_version: 0,
            recv_buffer_size: DEFAULT_BUFFER_SIZE,
            send_buffer_size: DEFAULT_BUFFER_SIZE,
            local_max_message_size: 0,
            remote_max_message_size: 0,
            local_max_chunk_count: 0,
            remote_max_chunk_count: 0,
        }
    }
}

impl ConnectionConfig {
    /// Rejects zero-sized transport buffers.
    pub fn validate(&self) -> Result<()> {
        if self.recv_buffer_size == 0 {
            return Err(Error::InvalidConfig("receive buffer size must be non-zero"));
        }
        if self.send_buffer_size == 0 {
            return Err(Error::InvalidConfig("send buffer size must be non-zero"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_listen_on_all_interfaces() {
        let config = NetworkConfig::default();
        assert_eq!(config.address, Ipv4Addr::UNSPECIFIED);
        assert_eq!(config.backlog, DEFAULT_BACKLOG);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_buffers_are_rejected() {
        let config = ConnectionConfig {
            recv_buffer_size: 0,
            ..ConnectionConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = ConnectionConfig {
            send_buffer_size: 0,
            ..ConnectionConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
