//! Event-driven I/O reactor module.
//!
//! This module provides readiness polling over a fixed table of descriptors,
//! driven one step at a time by the caller. It includes:
//! - [`core`]: The [`EventLoop`](core::EventLoop) and its dispatch step
//! - [`interest`]: The readiness event bitset
//! - [`lock`]: Single- and multi-threaded locking modes
//! - `registry`: The fixed-capacity descriptor table
//! - `poller`: The `poll(2)` readiness wait

pub mod core;
pub mod interest;
pub mod lock;
mod poller;
mod registry;
