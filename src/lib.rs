//! Minimal event-driven I/O multiplexer for resource-constrained devices.
//!
//! This crate provides the transport core a protocol server runs on: a
//! delayed-callback queue ordered by deadline, a fixed-capacity table of
//! watched descriptors, and a TCP connection manager that turns accepted
//! sockets into [`Connection`]s. Nothing runs in the background; the caller
//! drives progress by calling [`EventLoop::run`] from its own loop.
//!
//! # Architecture
//!
//! - **Clock**: Monotonic and wall-clock time in 100 ns [`Tick`]s
//! - **DelayedQueue**: Callbacks ordered by due tick, fired once due
//! - **EventLoop**: Descriptor registry plus the poll/dispatch step
//! - **EventLoopBuilder**: Fluent construction, picks the locking mode
//! - **ConnectionManager**: Listening socket that hands out connections
//! - **Connection**: Send/receive/close bound to one accepted socket
//!
//! # Example
//!
//! ```no_run
//! use uaio::{Connection, ConnectionConfig, ConnectionManager, EventLoopBuilder, NetworkConfig};
//! use uaio::clock::TICKS_PER_MILLISECOND;
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//!
//! let event_loop = EventLoopBuilder::new().build()?;
//! let manager = Arc::new(ConnectionManager::open(
//!     &NetworkConfig::new(4840),
//!     ConnectionConfig::default(),
//! )?);
//!
//! let connections = Arc::new(Mutex::new(Vec::new()));
//! let sink = connections.clone();
//! manager.attach(&event_loop, move |connection| sink.lock().unwrap().push(connection))?;
//!
//! loop {
//!     event_loop.run(50 * TICKS_PER_MILLISECOND)?;
//!
//!     for connection in connections.lock().unwrap().iter_mut() {
//!         if let Ok(request) = connection.receive(Duration::ZERO) {
//!             let reply = request.to_vec();
//!             connection.send(&reply)?;
//!         }
//!     }
//! }
//! # Ok::<(), uaio::Error>(())
//! ```

mod builder;
pub mod clock;
mod config;
mod error;
pub mod net;
pub mod reactor;
pub mod timer;

pub use builder::{DEFAULT_CAPACITY, EventLoopBuilder};
pub use clock::{Clock, ManualClock, SystemClock, Tick};
pub use config::{
    ConnectionConfig, DEFAULT_BACKLOG, DEFAULT_BUFFER_SIZE, DEFAULT_SEND_TIMEOUT, NetworkConfig,
};
pub use error::{Error, Result};
pub use net::connection::{Connection, SocketConnection};
pub use net::manager::ConnectionManager;
pub use reactor::core::{EventLoop, FdHandler, LoopState};
pub use reactor::interest::Interest;
pub use reactor::lock::{LockMode, MultiThreaded, SingleThreaded};
pub use timer::DelayedQueue;
