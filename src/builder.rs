//! Fluent builder for EventLoop construction.
//!
//! Provides a builder pattern interface for creating and configuring
//! [`EventLoop`] instances. The concurrency mode is chosen by the final call:
//! [`build`](EventLoopBuilder::build) for a loop that stays on one thread,
//! [`build_concurrent`](EventLoopBuilder::build_concurrent) for one that other
//! threads may register descriptors and schedule callbacks on.

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::reactor::core::EventLoop;
use crate::reactor::lock::{LockMode, MultiThreaded, SingleThreaded};

use std::sync::Arc;

/// Descriptor table size used when none is configured.
pub const DEFAULT_CAPACITY: usize = 10;

/// Builder for constructing EventLoop instances with fluent API.
///
/// # Example
/// ```
/// use uaio::EventLoopBuilder;
///
/// let event_loop = EventLoopBuilder::new().capacity(16).build().unwrap();
/// assert_eq!(event_loop.capacity(), 16);
/// ```
pub struct EventLoopBuilder {
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl Default for EventLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoopBuilder {
    /// Creates a builder with [`DEFAULT_CAPACITY`] slots and the
    /// [`SystemClock`].
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the fixed number of descriptors the loop can watch.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Replaces the time source used for delayed callbacks.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds a loop without any locking.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if the capacity is zero.
    pub fn build(self) -> Result<EventLoop<SingleThreaded>> {
        self.build_with()
    }

    /// Builds a loop whose registry and delayed-callback queue sit behind a
    /// mutex. The loop is `Sync` and is usually shared through an `Arc`.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if the capacity is zero.
    pub fn build_concurrent(self) -> Result<EventLoop<MultiThreaded>> {
        self.build_with()
    }

    /// Builds a loop for an explicitly named [`LockMode`].
    pub fn build_with<M: LockMode>(self) -> Result<EventLoop<M>> {
        if self.capacity == 0 {
            return Err(Error::InvalidConfig("descriptor capacity must be non-zero"));
        }

        tracing::debug!(
            capacity = self.capacity,
            concurrent = M::CONCURRENT,
            "building event loop"
        );

        Ok(EventLoop::new(self.capacity, self.clock))
    }
}
