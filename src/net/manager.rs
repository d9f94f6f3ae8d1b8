//! TCP connection manager.
//!
//! Owns one non-blocking listening socket and turns every pending inbound
//! connection into a [`Connection`] for the protocol server.
//!
//! # Usage
//!
//! ```no_run
//! use uaio::{Connection, ConnectionConfig, ConnectionManager, EventLoopBuilder, NetworkConfig};
//! use uaio::clock::TICKS_PER_MILLISECOND;
//! use std::sync::Arc;
//!
//! let event_loop = EventLoopBuilder::new().build()?;
//! let manager = Arc::new(ConnectionManager::open(
//!     &NetworkConfig::new(4840),
//!     ConnectionConfig::default(),
//! )?);
//!
//! manager.attach(&event_loop, |connection| {
//!     println!("new connection on fd {:?}", connection.handle());
//! })?;
//!
//! loop {
//!     event_loop.run(100 * TICKS_PER_MILLISECOND)?;
//! }
//! # Ok::<(), uaio::Error>(())
//! ```

use crate::config::{ConnectionConfig, NetworkConfig};
use crate::error::{Error, Result};
use crate::net::connection::{Connection, SocketConnection};
use crate::net::socket::{
    from_sockaddr, set_no_sigpipe, set_nonblocking, set_reusable, to_sockaddr, would_block,
};
use crate::reactor::core::{EventLoop, FdHandler};
use crate::reactor::interest::Interest;
use crate::reactor::lock::LockMode;

use libc::{
    AF_INET, SOCK_STREAM, accept, bind, getsockname, listen, sockaddr, sockaddr_in, socket,
    socklen_t,
};
use std::io;
use std::mem;
use std::net::SocketAddrV4;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Listening socket plus the base configuration given to each connection.
///
/// The socket is closed when the manager is dropped.
#[derive(Debug)]
pub struct ConnectionManager {
    listener: OwnedFd,
    local_addr: SocketAddrV4,
    connection_config: ConnectionConfig,
    send_timeout: Duration,
}

impl ConnectionManager {
    /// Creates, binds and listens on a non-blocking TCP socket.
    ///
    /// Address reuse is enabled and the backlog comes from `network`. Any
    /// failure closes the partially set up socket before returning.
    ///
    /// # Errors
    /// - [`Error::InvalidConfig`] for a non-positive backlog or zero-sized
    ///   buffers.
    /// - [`Error::Communication`] if a socket call fails.
    pub fn open(network: &NetworkConfig, connection_config: ConnectionConfig) -> Result<Self> {
        network.validate()?;
        connection_config.validate()?;

        let fd = unsafe { socket(AF_INET, SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(Error::last_os_error());
        }
        // Closed on every early return below.
        let listener = unsafe { OwnedFd::from_raw_fd(fd) };

        set_reusable(fd)?;
        set_nonblocking(fd)?;

        let address = to_sockaddr(network.socket_addr());
        let ret = unsafe {
            bind(
                fd,
                &address as *const sockaddr_in as *const sockaddr,
                mem::size_of::<sockaddr_in>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(Error::last_os_error());
        }

        if unsafe { listen(fd, network.backlog) } < 0 {
            return Err(Error::last_os_error());
        }

        let local_addr = bound_address(fd)?;
        info!(%local_addr, backlog = network.backlog, "listening");

        Ok(Self {
            listener,
            local_addr,
            connection_config,
            send_timeout: network.send_timeout,
        })
    }

    /// Address the listener is bound to, with the real port when an
    /// ephemeral one was requested.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    pub fn listener_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    pub fn connection_config(&self) -> &ConnectionConfig {
        &self.connection_config
    }

    /// Accepts every connection that is already waiting, without blocking.
    ///
    /// Each accepted socket is made non-blocking, wrapped in a
    /// [`SocketConnection`] and passed to `on_new_connection`, which takes
    /// ownership of it. Returns how many connections were accepted. Running out
    /// of pending connections ends the loop normally.
    ///
    /// # Errors
    /// [`Error::Communication`] for any accept failure other than "would
    /// block". Connections accepted before the failure have already been
    /// handed over.
    pub fn accept_pending(
        &self,
        mut on_new_connection: impl FnMut(Box<dyn Connection>),
    ) -> Result<usize> {
        let mut accepted = 0;

        loop {
            let mut peer: sockaddr_in = unsafe { mem::zeroed() };
            let mut peer_len = mem::size_of::<sockaddr_in>() as socklen_t;

            let fd = unsafe {
                accept(
                    self.listener.as_raw_fd(),
                    &mut peer as *mut sockaddr_in as *mut sockaddr,
                    &mut peer_len,
                )
            };

            if fd < 0 {
                let err = io::Error::last_os_error();
                if would_block(&err) {
                    return Ok(accepted);
                }
                // The peer gave up before we got to it; keep draining.
                if matches!(
                    err.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                ) {
                    continue;
                }

                return Err(Error::Communication(err));
            }

            let socket = unsafe { OwnedFd::from_raw_fd(fd) };
            set_nonblocking(fd)?;
            set_no_sigpipe(fd)?;

            let peer = from_sockaddr(&peer);
            debug!(fd, %peer, "accepted connection");

            let connection = SocketConnection::new(
                socket,
                self.connection_config.clone(),
                self.send_timeout,
            )
            .with_peer(peer);

            on_new_connection(Box::new(connection));
            accepted += 1;
        }
    }

    /// Registers the listening socket with `event_loop` so every dispatch
    /// step that finds it readable accepts the pending connections.
    ///
    /// Accept failures are logged and retried on the next readiness event.
    pub fn attach<M: LockMode>(
        self: &Arc<Self>,
        event_loop: &EventLoop<M>,
        on_new_connection: impl FnMut(Box<dyn Connection>) + Send + 'static,
    ) -> Result<()> {
        let acceptor = Acceptor {
            manager: Arc::clone(self),
            on_new_connection,
        };

        event_loop.register_handler(self.listener_fd(), Interest::READABLE, acceptor)
    }

    /// Removes the listening socket from `event_loop`.
    pub fn detach<M: LockMode>(&self, event_loop: &EventLoop<M>) {
        event_loop.deregister(self.listener_fd());
    }
}

fn bound_address(fd: RawFd) -> Result<SocketAddrV4> {
    let mut address: sockaddr_in = unsafe { mem::zeroed() };
    let mut length = mem::size_of::<sockaddr_in>() as socklen_t;

    let ret = unsafe {
        getsockname(
            fd,
            &mut address as *mut sockaddr_in as *mut sockaddr,
            &mut length,
        )
    };
    if ret < 0 {
        return Err(Error::last_os_error());
    }

    Ok(from_sockaddr(&address))
}

// Registry entry for an attached listener.
struct Acceptor<F> {
    manager: Arc<ConnectionManager>,
    on_new_connection: F,
}

impl<M, F> FdHandler<M> for Acceptor<F>
where
    M: LockMode,
    F: FnMut(Box<dyn Connection>) + Send + 'static,
{
    fn on_ready(&mut self, _event_loop: &EventLoop<M>, fd: RawFd, events: Interest) {
        if !events.is_readable() {
            if events.is_error() {
                warn!(fd, ?events, "listening socket reported an error");
            }
            return;
        }

        if let Err(err) = self.manager.accept_pending(&mut self.on_new_connection) {
            warn!(fd, error = %err, "accepting connections failed");
        }
    }
}
