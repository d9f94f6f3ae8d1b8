//! Delayed callbacks ordered by their due tick.
//!
//! The queue stores entries until their deadline has passed and hands them
//! back in ascending due order. Entries with the same due tick come back in
//! insertion order.

use crate::clock::Tick;

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

struct Entry<T> {
    due: Tick,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Holds items with an execution deadline.
///
/// The queue never drops an entry on its own: every scheduled item is either
/// still pending or has been returned by [`drain_due`](Self::drain_due) /
/// [`process`](Self::process).
///
/// # Example
/// ```
/// use uaio::timer::DelayedQueue;
///
/// let mut queue = DelayedQueue::new();
/// queue.schedule(20, "late");
/// queue.schedule(10, "early");
///
/// let mut fired = Vec::new();
/// let next = queue.process(15, |item| fired.push(item));
///
/// assert_eq!(fired, vec!["early"]);
/// assert_eq!(next, Some(20));
/// ```
pub struct DelayedQueue<T> {
    heap: BinaryHeap<Reverse<Entry<T>>>,
    next_seq: u64,
}

impl<T> Default for DelayedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DelayedQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Inserts `item` to fire once `due` has passed.
    ///
    /// A due tick in the past fires on the next processing pass.
    pub fn schedule(&mut self, due: Tick, item: T) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        self.heap.push(Reverse(Entry { due, seq, item }));
    }

    /// Smallest due tick among pending entries.
    pub fn next_due(&self) -> Option<Tick> {
        self.heap.peek().map(|Reverse(entry)| entry.due)
    }

    /// Removes every entry with `due <= now`, earliest first.
    ///
    /// All due entries leave the queue before the caller sees any of them, so
    /// an entry scheduled while the batch is being handled waits for the next
    /// pass even if it is already due.
    pub fn drain_due(&mut self, now: Tick) -> Vec<T> {
        let mut due = Vec::new();

        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.due > now {
                break;
            }

            if let Some(Reverse(entry)) = self.heap.pop() {
                due.push(entry.item);
            }
        }

        due
    }

    /// Hands every due entry to `fire` and returns the next pending deadline.
    pub fn process(&mut self, now: Tick, mut fire: impl FnMut(T)) -> Option<Tick> {
        for item in self.drain_due(now) {
            fire(item);
        }

        self.next_due()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
