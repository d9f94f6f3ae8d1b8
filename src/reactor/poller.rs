//! Readiness wait over `poll(2)`.

use crate::clock::{TICKS_PER_MILLISECOND, Tick};
use crate::error::{Error, Result};

use libc::{c_int, nfds_t, poll, pollfd};
use std::io;

/// Converts a wait in ticks to a `poll(2)` timeout.
///
/// Rounds up so a wait never ends before the deadline it was computed from.
pub(crate) fn timeout_ms(wait: Tick) -> c_int {
    let ms = wait.div_ceil(TICKS_PER_MILLISECOND);
    ms.min(c_int::MAX as u64) as c_int
}

/// Blocks until a descriptor in `fds` is ready or `wait` ticks have passed.
///
/// Fills in `revents` and returns the number of ready descriptors. An empty
/// set simply sleeps for the timeout. A wait interrupted by a signal returns
/// `Ok(0)` with every `revents` cleared.
pub(crate) fn wait(fds: &mut [pollfd], wait: Tick) -> Result<usize> {
    let ret = unsafe { poll(fds.as_mut_ptr(), fds.len() as nfds_t, timeout_ms(wait)) };

    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            fds.iter_mut().for_each(|fd| fd.revents = 0);
            return Ok(0);
        }

        return Err(Error::Communication(err));
    }

    Ok(ret as usize)
}
