//! Fixed-capacity table of registered descriptors.
//!
//! Slots live in a vector sized once at construction. A side map from
//! descriptor to slot index keeps lookups O(1), and freed indices go back to a
//! min-heap so registration always takes the lowest free slot. Each
//! registration stamps its slot with a fresh generation so a stale
//! [`SlotKey`] never matches a later occupant of the same index.

use crate::error::{Error, Result};
use crate::reactor::interest::Interest;

use libc::pollfd;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::os::unix::io::RawFd;

/// Stable reference to one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotKey {
    index: usize,
    generation: u64,
}

struct Slot<H> {
    fd: RawFd,
    interest: Interest,
    generation: u64,
    // `None` while the handler is checked out for dispatch.
    handler: Option<H>,
}

/// Descriptors selected for one readiness wait, in slot order.
pub(crate) struct PollSet {
    pub(crate) keys: Vec<SlotKey>,
    pub(crate) fds: Vec<pollfd>,
}

pub(crate) struct FdRegistry<H> {
    slots: Vec<Option<Slot<H>>>,
    free: BinaryHeap<Reverse<usize>>,
    index: HashMap<RawFd, usize>,
    next_generation: u64,
}

impl<H> FdRegistry<H> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            free: (0..capacity).map(Reverse).collect(),
            index: HashMap::with_capacity(capacity),
            next_generation: 1,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn contains(&self, fd: RawFd) -> bool {
        self.index.contains_key(&fd)
    }

    pub(crate) fn interest(&self, fd: RawFd) -> Option<Interest> {
        let index = *self.index.get(&fd)?;
        self.slots[index].as_ref().map(|slot| slot.interest)
    }

    /// Occupies the lowest free slot.
    ///
    /// Registering a descriptor that is already present replaces its interest
    /// and handler in place and hands the previous handler back.
    pub(crate) fn register(
        &mut self,
        fd: RawFd,
        interest: Interest,
        handler: H,
    ) -> Result<(SlotKey, Option<H>)> {
        let generation = self.next_generation;
        self.next_generation += 1;

        if let Some(&index) = self.index.get(&fd)
            && let Some(slot) = self.slots[index].as_mut()
        {
            slot.interest = interest;
            slot.generation = generation;
            let previous = slot.handler.replace(handler);

            return Ok((SlotKey { index, generation }, previous));
        }

        let Some(Reverse(index)) = self.free.pop() else {
            return Err(Error::TableFull {
                capacity: self.capacity(),
            });
        };

        self.slots[index] = Some(Slot {
            fd,
            interest,
            generation,
            handler: Some(handler),
        });
        self.index.insert(fd, index);

        Ok((SlotKey { index, generation }, None))
    }

    /// Vacates the descriptor's slot. Unknown descriptors are ignored.
    ///
    /// Returns `None` for unknown descriptors. Otherwise returns the slot's
    /// handler, which is itself `None` while checked out; the dispatcher then
    /// gets it back from [`restore`](Self::restore) and drops it.
    pub(crate) fn deregister(&mut self, fd: RawFd) -> Option<Option<H>> {
        let index = self.index.remove(&fd)?;
        let slot = self.slots[index].take()?;
        self.free.push(Reverse(index));

        Some(slot.handler)
    }

    /// Updates the interest mask in place. Returns `false` for unknown
    /// descriptors.
    pub(crate) fn modify(&mut self, fd: RawFd, interest: Interest) -> bool {
        let Some(&index) = self.index.get(&fd) else {
            return false;
        };

        match self.slots[index].as_mut() {
            Some(slot) => {
                slot.interest = interest;
                true
            }
            None => false,
        }
    }

    /// Builds the readiness-wait set from every occupied slot.
    pub(crate) fn poll_set(&self) -> PollSet {
        let mut set = PollSet {
            keys: Vec::with_capacity(self.len()),
            fds: Vec::with_capacity(self.len()),
        };

        for (index, slot) in self.slots.iter().enumerate() {
            let Some(slot) = slot else { continue };

            set.keys.push(SlotKey {
                index,
                generation: slot.generation,
            });
            set.fds.push(pollfd {
                fd: slot.fd,
                events: slot.interest.to_poll_events(),
                revents: 0,
            });
        }

        set
    }

    /// Takes the handler out of a still-live registration.
    pub(crate) fn checkout(&mut self, key: SlotKey) -> Option<(RawFd, H)> {
        let slot = self.slots.get_mut(key.index)?.as_mut()?;
        if slot.generation != key.generation {
            return None;
        }

        let handler = slot.handler.take()?;
        Some((slot.fd, handler))
    }

    /// Puts a handler back after dispatch.
    ///
    /// If the registration was removed or replaced meanwhile, the handler is
    /// handed back so the caller can drop it.
    pub(crate) fn restore(&mut self, key: SlotKey, handler: H) -> Option<H> {
        let Some(Some(slot)) = self.slots.get_mut(key.index) else {
            return Some(handler);
        };

        if slot.generation != key.generation || slot.handler.is_some() {
            return Some(handler);
        }

        slot.handler = Some(handler);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowest_free_slot_is_reused() {
        let mut registry = FdRegistry::with_capacity(3);
        registry.register(10, Interest::READABLE, "a").unwrap();
        registry.register(11, Interest::READABLE, "b").unwrap();
        registry.register(12, Interest::READABLE, "c").unwrap();

        assert_eq!(registry.deregister(10), Some(Some("a")));
        registry.register(13, Interest::READABLE, "d").unwrap();

        let set = registry.poll_set();
        let fds: Vec<RawFd> = set.fds.iter().map(|p| p.fd).collect();
        assert_eq!(fds, vec![13, 11, 12]);
    }

    #[test]
    fn test_stale_key_does_not_match_new_occupant() {
        let mut registry = FdRegistry::with_capacity(1);
        let (old_key, _) = registry.register(5, Interest::READABLE, 1).unwrap();
        registry.deregister(5);
        let (new_key, _) = registry.register(6, Interest::READABLE, 2).unwrap();

        assert!(registry.checkout(old_key).is_none());
        assert_eq!(registry.checkout(new_key), Some((6, 2)));
    }

    #[test]
    fn test_restore_after_deregister_returns_handler() {
        let mut registry = FdRegistry::with_capacity(2);
        let (key, _) = registry.register(7, Interest::READABLE, "h").unwrap();

        let (_, handler) = registry.checkout(key).unwrap();
        assert_eq!(registry.deregister(7), Some(None));
        assert_eq!(registry.deregister(7), None);
        assert_eq!(registry.restore(key, handler), Some("h"));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_reregister_replaces_in_place() {
        let mut registry = FdRegistry::with_capacity(1);
        registry.register(3, Interest::READABLE, "first").unwrap();
        let (_, previous) = registry.register(3, Interest::WRITABLE, "second").unwrap();

        assert_eq!(previous, Some("first"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.interest(3), Some(Interest::WRITABLE));
    }

    #[test]
    fn test_modify_updates_poll_events() {
        let mut registry = FdRegistry::with_capacity(1);
        registry.register(4, Interest::READABLE, ()).unwrap();

        assert!(registry.modify(4, Interest::READABLE | Interest::WRITABLE));
        assert!(!registry.modify(99, Interest::READABLE));

        let set = registry.poll_set();
        assert_eq!(set.fds[0].events, libc::POLLIN | libc::POLLOUT);
    }
}
