//! Connections handed to the protocol server.
//!
//! The server only ever sees a `Box<dyn Connection>`; [`SocketConnection`] is
//! the TCP-backed implementation produced by the connection manager.

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::net::socket::{SEND_FLAGS, wait_ready, would_block};
use crate::reactor::interest::Interest;

use libc::{c_void, recv, send};
use std::io;
use std::net::SocketAddrV4;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;
use tracing::debug;

/// Bidirectional byte stream exposed to the protocol server.
pub trait Connection: Send {
    /// Underlying descriptor, or `None` once closed.
    fn handle(&self) -> Option<RawFd>;

    /// Limits negotiated for this connection.
    fn config(&self) -> &ConnectionConfig;

    /// Updates the negotiated limits, e.g. after a protocol handshake.
    ///
    /// Fails with [`Error::InvalidConfig`] and keeps the current limits if
    /// `config` has a zero-sized buffer.
    fn set_config(&mut self, config: ConnectionConfig) -> Result<()>;

    /// Transmits all of `payload`.
    ///
    /// Either every byte is sent or the call fails with
    /// [`Error::ConnectionClosed`]; partial success is never reported.
    fn send(&mut self, payload: &[u8]) -> Result<()>;

    /// Waits up to `timeout` for data and returns what one read produced.
    ///
    /// # Errors
    /// - [`Error::ConnectionClosed`] when the peer closed the stream or the
    ///   socket failed.
    /// - [`Error::Communication`] when nothing arrived in time; retry later.
    /// - [`Error::OutOfMemory`] if the receive buffer could not be allocated.
    fn receive(&mut self, timeout: Duration) -> Result<&[u8]>;

    /// Closes the stream. Further calls are no-ops.
    fn close(&mut self);

    /// Allocates a zeroed buffer of `len` bytes for an outgoing message.
    ///
    /// Fails with [`Error::Communication`] if `len` exceeds the negotiated
    /// send buffer size. The buffer is released by dropping it.
    fn send_buffer(&self, len: usize) -> Result<Vec<u8>> {
        if len > self.config().send_buffer_size {
            return Err(Error::Communication(io::Error::new(
                io::ErrorKind::InvalidInput,
                "requested send buffer exceeds the negotiated size",
            )));
        }

        zeroed_buffer(len)
    }
}

fn zeroed_buffer(len: usize) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(len)?;
    buffer.resize(len, 0);

    Ok(buffer)
}

/// TCP-backed [`Connection`].
#[derive(Debug)]
pub struct SocketConnection {
    socket: Option<OwnedFd>,
    config: ConnectionConfig,
    peer: Option<SocketAddrV4>,
    send_timeout: Duration,
    // Allocated on the first receive.
    recv_buffer: Vec<u8>,
}

impl SocketConnection {
    /// Wraps an already non-blocking, connected socket.
    pub fn new(socket: OwnedFd, config: ConnectionConfig, send_timeout: Duration) -> Self {
        Self {
            socket: Some(socket),
            config,
            peer: None,
            send_timeout,
            recv_buffer: Vec::new(),
        }
    }

    pub(crate) fn with_peer(mut self, peer: SocketAddrV4) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn peer_addr(&self) -> Option<SocketAddrV4> {
        self.peer
    }

    fn fd(&self) -> Result<RawFd> {
        self.socket
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or(Error::ConnectionClosed)
    }

    fn ensure_recv_buffer(&mut self) -> Result<()> {
        // A zero-length read would be indistinguishable from end of stream.
        if self.config.recv_buffer_size == 0 {
            return Err(Error::InvalidConfig("receive buffer size must be non-zero"));
        }
        if self.recv_buffer.len() != self.config.recv_buffer_size {
            self.recv_buffer = zeroed_buffer(self.config.recv_buffer_size)?;
        }

        Ok(())
    }
}

impl Connection for SocketConnection {
    fn handle(&self) -> Option<RawFd> {
        self.socket.as_ref().map(AsRawFd::as_raw_fd)
    }

    fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn set_config(&mut self, config: ConnectionConfig) -> Result<()> {
        config.validate()?;
        self.config = config;

        Ok(())
    }

    fn send(&mut self, payload: &[u8]) -> Result<()> {
        let fd = self.fd()?;
        let mut sent = 0;

        while sent < payload.len() {
            let remaining = &payload[sent..];
            let ret = unsafe {
                send(
                    fd,
                    remaining.as_ptr() as *const c_void,
                    remaining.len(),
                    SEND_FLAGS,
                )
            };

            if ret > 0 {
                sent += ret as usize;
                continue;
            }

            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                if would_block(&err)
                    && matches!(
                        wait_ready(fd, Interest::WRITABLE, self.send_timeout),
                        Ok(true)
                    )
                {
                    continue;
                }

                debug!(fd, sent, error = %err, "send failed");
            }

            return Err(Error::ConnectionClosed);
        }

        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<&[u8]> {
        let fd = self.fd()?;
        self.ensure_recv_buffer()?;

        if !wait_ready(fd, Interest::READABLE, timeout)? {
            return Err(Error::timed_out("no data received before the timeout"));
        }

        let ret = unsafe {
            recv(
                fd,
                self.recv_buffer.as_mut_ptr() as *mut c_void,
                self.recv_buffer.len(),
                0,
            )
        };

        if ret == 0 {
            return Err(Error::ConnectionClosed);
        }

        if ret < 0 {
            let err = io::Error::last_os_error();
            if would_block(&err) || err.kind() == io::ErrorKind::Interrupted {
                return Err(Error::Communication(err));
            }

            debug!(fd, error = %err, "receive failed");
            return Err(Error::ConnectionClosed);
        }

        Ok(&self.recv_buffer[..ret as usize])
    }

    fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            debug!(fd = socket.as_raw_fd(), peer = ?self.peer, "closing connection");
            drop(socket);
        }
    }
}
