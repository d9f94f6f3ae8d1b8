//! TCP networking primitives.
//!
//! This module provides the non-blocking TCP side of the event loop:
//! - [`manager`]: [`ConnectionManager`](manager::ConnectionManager) owning the listening socket
//! - [`connection`]: the [`Connection`](connection::Connection) capability and its socket-backed implementation
//! - [`socket`]: socket option helpers

pub mod connection;
pub mod manager;
pub mod socket;
