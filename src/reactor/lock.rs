//! Locking used for the event loop's shared structures.
//!
//! The concurrency mode is picked once, when the loop is built. In
//! [`SingleThreaded`] mode the structures sit in a `RefCell` and the loop is
//! `!Sync`, so no synchronisation is ever paid for. In [`MultiThreaded`] mode
//! they sit behind a `Mutex`, which lets other threads register, deregister
//! and schedule while the dispatch thread is blocked in its readiness wait.
//!
//! Closures passed to [`LoopLock::with`] must not call back into the loop.

use std::cell::RefCell;
use std::sync::{Mutex, PoisonError};

/// Interior-mutable container guarding one structure.
pub trait LoopLock<T> {
    fn new(value: T) -> Self;

    /// Runs `f` with exclusive access to the value.
    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R;
}

/// Selects the container type used by an event loop.
pub trait LockMode: Sized + 'static {
    type Lock<T>: LoopLock<T>;

    /// `true` when the loop may be shared across threads.
    const CONCURRENT: bool;
}

/// No locking. The resulting event loop cannot leave its thread.
#[derive(Debug)]
pub enum SingleThreaded {}

/// A mutex guards registry and queue mutation.
#[derive(Debug)]
pub enum MultiThreaded {}

impl LockMode for SingleThreaded {
    type Lock<T> = Unlocked<T>;
    const CONCURRENT: bool = false;
}

impl LockMode for MultiThreaded {
    type Lock<T> = Locked<T>;
    const CONCURRENT: bool = true;
}

pub struct Unlocked<T>(RefCell<T>);

impl<T> LoopLock<T> for Unlocked<T> {
    fn new(value: T) -> Self {
        Unlocked(RefCell::new(value))
    }

    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }
}

pub struct Locked<T>(Mutex<T>);

impl<T> LoopLock<T> for Locked<T> {
    fn new(value: T) -> Self {
        Locked(Mutex::new(value))
    }

    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        // User code never runs under this lock, so a poisoned guard still
        // holds consistent data.
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}
