//! Readiness interest and event masks, and their `poll(2)` encoding.
//!
//! Error conditions are always reported, whether or not they were asked for.

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, c_short};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Set of readiness events a descriptor is watched for, or was reported with.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READABLE: Interest = Interest(1);
    pub const WRITABLE: Interest = Interest(2);
    pub const ERROR: Interest = Interest(4);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn is_readable(self) -> bool {
        self.contains(Interest::READABLE)
    }

    pub const fn is_writable(self) -> bool {
        self.contains(Interest::WRITABLE)
    }

    pub const fn is_error(self) -> bool {
        self.contains(Interest::ERROR)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Flags for `pollfd::events`. Error conditions are always reported by
    /// `poll(2)`, so `ERROR` has no flag of its own.
    pub(crate) fn to_poll_events(self) -> c_short {
        let mut events = 0;
        if self.is_readable() {
            events |= POLLIN;
        }
        if self.is_writable() {
            events |= POLLOUT;
        }
        events
    }

    /// Translates `pollfd::revents`.
    pub(crate) fn from_poll_revents(revents: c_short) -> Interest {
        let mut interest = Interest::NONE;
        if revents & POLLIN != 0 {
            interest |= Interest::READABLE;
        }
        if revents & POLLOUT != 0 {
            interest |= Interest::WRITABLE;
        }
        if revents & (POLLERR | POLLHUP | POLLNVAL) != 0 {
            interest |= Interest::ERROR;
        }
        interest
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Interest {
    type Output = Interest;

    fn bitand(self, rhs: Interest) -> Interest {
        Interest(self.0 & rhs.0)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Interest::READABLE, "READABLE"),
            (Interest::WRITABLE, "WRITABLE"),
            (Interest::ERROR, "ERROR"),
        ];

        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }

        if first {
            f.write_str("NONE")?;
        }
        Ok(())
    }
}
