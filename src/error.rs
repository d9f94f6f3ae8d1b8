//! Error type shared by the event loop, the descriptor registry and the
//! connection layer.
//!
//! Every failing operation reports one of the kinds below. The only local
//! recovery the crate performs is turning repeated closes and repeated
//! deregistrations into no-ops.

use std::io;

/// Failure reasons surfaced by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The descriptor table already holds `capacity` live entries.
    #[error("descriptor table is full (capacity {capacity})")]
    TableFull { capacity: usize },

    /// A transient I/O failure or timeout. The caller may retry.
    #[error("communication error: {0}")]
    Communication(#[source] io::Error),

    /// The peer closed the connection or the socket is unusable.
    #[error("connection closed")]
    ConnectionClosed,

    /// A buffer could not be allocated.
    #[error("out of memory")]
    OutOfMemory,

    /// `run` was called while a dispatch step was already executing.
    #[error("event loop is already dispatching")]
    Busy,

    /// A construction parameter was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl Error {
    /// Wraps the calling thread's last OS error as a communication error.
    pub(crate) fn last_os_error() -> Self {
        Error::Communication(io::Error::last_os_error())
    }

    /// Builds a communication error for an operation that ran out of time.
    pub(crate) fn timed_out(what: &'static str) -> Self {
        Error::Communication(io::Error::new(io::ErrorKind::TimedOut, what))
    }

    /// Returns `true` when calling the failed operation again may succeed.
    ///
    /// # Example
    /// ```
    /// use uaio::Error;
    ///
    /// assert!(!Error::ConnectionClosed.is_retryable());
    /// assert!(!Error::Busy.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Communication(_))
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Error::OutOfMemory
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
