//! The event loop: descriptor registry, delayed callbacks and the dispatch
//! step that drives both.
//!
//! Nothing here spawns a thread. The owner calls [`EventLoop::run`] again and
//! again from its own loop; each call waits for readiness at most once, runs
//! the callbacks of every ready descriptor and then fires due delayed
//! callbacks.

use crate::clock::{Clock, Tick, ticks_from_duration};
use crate::error::{Error, Result};
use crate::reactor::interest::Interest;
use crate::reactor::lock::{LockMode, LoopLock, SingleThreaded};
use crate::reactor::poller;
use crate::reactor::registry::{FdRegistry, SlotKey};
use crate::timer::DelayedQueue;

use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// Receives readiness events for a registered descriptor.
///
/// Implemented for every `FnMut(&EventLoop<M>, RawFd, Interest)` closure. An
/// event source that needs to own state while registered implements it on
/// its own type. The handler must check `events` before acting: it may be
/// called with error conditions it never asked for.
pub trait FdHandler<M: LockMode>: Send + 'static {
    fn on_ready(&mut self, event_loop: &EventLoop<M>, fd: RawFd, events: Interest);
}

impl<M, F> FdHandler<M> for F
where
    M: LockMode,
    F: FnMut(&EventLoop<M>, RawFd, Interest) + Send + 'static,
{
    fn on_ready(&mut self, event_loop: &EventLoop<M>, fd: RawFd, events: Interest) {
        self(event_loop, fd, events)
    }
}

type BoxedHandler<M> = Box<dyn FdHandler<M>>;
type DelayedCallback<M> = Box<dyn FnOnce(&EventLoop<M>) + Send + 'static>;

/// Whether a dispatch step is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Idle = 0,
    Dispatching = 1,
}

// Moves the loop to `Dispatching` and back to `Idle` on every exit path.
struct DispatchGuard<'a> {
    state: &'a AtomicU8,
}

impl<'a> DispatchGuard<'a> {
    fn enter(state: &'a AtomicU8) -> Result<Self> {
        state
            .compare_exchange(
                LoopState::Idle as u8,
                LoopState::Dispatching as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| Error::Busy)?;

        Ok(Self { state })
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.state.store(LoopState::Idle as u8, Ordering::Release);
    }
}

/// Single-threaded, level-triggered I/O multiplexer with a timer queue.
///
/// Built with [`EventLoopBuilder`](crate::EventLoopBuilder). Every method
/// takes `&self`, so callbacks receive the loop and may register, deregister
/// and schedule from inside a dispatch step. Calling [`run`](Self::run) from a
/// callback fails with [`Error::Busy`].
///
/// # Example
/// ```
/// use uaio::EventLoopBuilder;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// let event_loop = EventLoopBuilder::new().build().unwrap();
/// let fired = Arc::new(AtomicBool::new(false));
/// let flag = fired.clone();
///
/// event_loop.schedule(0, move |_| flag.store(true, Ordering::SeqCst));
/// event_loop.run(0).unwrap();
///
/// assert!(fired.load(Ordering::SeqCst));
/// ```
pub struct EventLoop<M: LockMode = SingleThreaded> {
    shared: M::Lock<Shared<M>>,
    state: AtomicU8,
    clock: Arc<dyn Clock>,
}

// Everything a registration or a schedule call mutates, guarded as one unit.
struct Shared<M: LockMode> {
    registry: FdRegistry<BoxedHandler<M>>,
    delayed: DelayedQueue<DelayedCallback<M>>,
}

impl<M: LockMode> EventLoop<M> {
    pub(crate) fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: LoopLock::new(Shared {
                registry: FdRegistry::with_capacity(capacity),
                delayed: DelayedQueue::new(),
            }),
            state: AtomicU8::new(LoopState::Idle as u8),
            clock,
        }
    }

    fn with_registry<R>(&self, f: impl FnOnce(&mut FdRegistry<BoxedHandler<M>>) -> R) -> R {
        self.shared.with(|shared| f(&mut shared.registry))
    }

    fn with_delayed<R>(&self, f: impl FnOnce(&mut DelayedQueue<DelayedCallback<M>>) -> R) -> R {
        self.shared.with(|shared| f(&mut shared.delayed))
    }

    /// Watches `fd` for `interest` and calls `handler` when it becomes ready.
    ///
    /// Fails with [`Error::TableFull`] once the table holds as many
    /// descriptors as its capacity. Registering a descriptor twice replaces
    /// the earlier registration.
    ///
    /// # Example
    /// ```
    /// use uaio::{EventLoopBuilder, Interest};
    ///
    /// let event_loop = EventLoopBuilder::new().capacity(1).build().unwrap();
    /// let mut fds = [0; 2];
    /// assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    ///
    /// event_loop.register(fds[0], Interest::READABLE, |_, _, _| {}).unwrap();
    /// assert!(event_loop.register(fds[1], Interest::WRITABLE, |_, _, _| {}).is_err());
    /// # unsafe { libc::close(fds[0]); libc::close(fds[1]); }
    /// ```
    pub fn register(
        &self,
        fd: RawFd,
        interest: Interest,
        handler: impl FnMut(&EventLoop<M>, RawFd, Interest) + Send + 'static,
    ) -> Result<()> {
        self.register_handler(fd, interest, handler)
    }

    /// Like [`register`](Self::register), for event sources that implement
    /// [`FdHandler`] on their own type.
    pub fn register_handler(
        &self,
        fd: RawFd,
        interest: Interest,
        handler: impl FdHandler<M>,
    ) -> Result<()> {
        let handler: BoxedHandler<M> = Box::new(handler);
        let (_, previous) =
            self.with_registry(|registry| registry.register(fd, interest, handler))?;

        debug!(fd, ?interest, replaced = previous.is_some(), "registered descriptor");
        drop(previous);

        Ok(())
    }

    /// Changes the events `fd` is watched for. Unknown descriptors are ignored.
    pub fn modify(&self, fd: RawFd, interest: Interest) -> Result<()> {
        if self.with_registry(|registry| registry.modify(fd, interest)) {
            trace!(fd, ?interest, "modified descriptor");
        }

        Ok(())
    }

    /// Stops watching `fd`. Safe to call for descriptors that were never
    /// registered or are already gone.
    pub fn deregister(&self, fd: RawFd) {
        let removed = self.with_registry(|registry| registry.deregister(fd));

        if let Some(handler) = removed {
            debug!(fd, "deregistered descriptor");
            drop(handler);
        }
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.with_registry(|registry| registry.contains(fd))
    }

    /// Interest mask currently recorded for `fd`.
    pub fn interest(&self, fd: RawFd) -> Option<Interest> {
        self.with_registry(|registry| registry.interest(fd))
    }

    pub fn registered_count(&self) -> usize {
        self.with_registry(|registry| registry.len())
    }

    pub fn capacity(&self) -> usize {
        self.with_registry(|registry| registry.capacity())
    }

    /// Runs `callback` at the end of the first dispatch step that finds `due`
    /// has passed.
    ///
    /// There is no cancellation: a caller that changes its mind keeps its own
    /// flag and makes the callback a no-op.
    pub fn schedule(&self, due: Tick, callback: impl FnOnce(&EventLoop<M>) + Send + 'static) {
        let callback: DelayedCallback<M> = Box::new(callback);
        self.with_delayed(|queue| queue.schedule(due, callback));

        trace!(due, "scheduled delayed callback");
    }

    /// Schedules `callback` to run `delay` from now.
    pub fn schedule_in(
        &self,
        delay: Duration,
        callback: impl FnOnce(&EventLoop<M>) + Send + 'static,
    ) {
        let due = self.now().saturating_add(ticks_from_duration(delay));
        self.schedule(due, callback);
    }

    pub fn pending_callbacks(&self) -> usize {
        self.with_delayed(|queue| queue.len())
    }

    /// Deadline of the earliest pending delayed callback.
    pub fn next_due(&self) -> Option<Tick> {
        self.with_delayed(|queue| queue.next_due())
    }

    /// Current monotonic time according to the loop's clock.
    pub fn now(&self) -> Tick {
        self.clock.now_monotonic()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn state(&self) -> LoopState {
        if self.state.load(Ordering::Acquire) == LoopState::Dispatching as u8 {
            LoopState::Dispatching
        } else {
            LoopState::Idle
        }
    }

    /// Executes one dispatch step, blocking for at most `max_wait` ticks.
    ///
    /// 1. Waits until a registered descriptor is ready, the nearest delayed
    ///    callback is due, or `max_wait` has passed, whichever comes first.
    /// 2. Calls the handler of every ready descriptor, in slot order.
    /// 3. Fires every delayed callback that is due.
    ///
    /// A failed readiness wait returns [`Error::Communication`] before any
    /// callback runs; the next call may simply retry. A wait cut short by a
    /// signal counts as a step in which nothing became ready. The time is sampled once
    /// before waiting, so a timer that becomes due during a long stall fires at
    /// the end of that same step rather than earlier.
    pub fn run(&self, max_wait: Tick) -> Result<()> {
        let _guard = DispatchGuard::enter(&self.state)?;

        let now = self.clock.now_monotonic();
        let (next_due, mut set) = self
            .shared
            .with(|shared| (shared.delayed.next_due(), shared.registry.poll_set()));
        let wait = match next_due {
            Some(due) => max_wait.min(due.saturating_sub(now)),
            None => max_wait,
        };

        trace!(descriptors = set.fds.len(), wait, "waiting for readiness");

        let ready = poller::wait(&mut set.fds, wait)?;

        if ready > 0 {
            for (key, fd) in set.keys.iter().zip(set.fds.iter()) {
                if fd.revents != 0 {
                    self.dispatch(*key, Interest::from_poll_revents(fd.revents));
                }
            }
        }

        self.process_delayed();

        Ok(())
    }

    fn dispatch(&self, key: SlotKey, events: Interest) {
        // Deregistered (or replaced) since the wait set was built.
        let Some((fd, mut handler)) = self.with_registry(|registry| registry.checkout(key))
        else {
            return;
        };

        trace!(fd, ?events, "descriptor ready");
        handler.on_ready(self, fd, events);

        let orphaned = self.with_registry(|registry| registry.restore(key, handler));
        drop(orphaned);
    }

    fn process_delayed(&self) {
        let now = self.clock.now_monotonic();
        let due = self.with_delayed(|queue| queue.drain_due(now));

        if due.is_empty() {
            return;
        }

        trace!(count = due.len(), now, "firing delayed callbacks");
        for callback in due {
            callback(self);
        }
    }
}
