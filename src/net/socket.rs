//! Socket option helpers shared by the listener and its connections.

use crate::error::{Error, Result};
use crate::reactor::interest::Interest;

use libc::{
    AF_INET, F_GETFL, F_SETFL, O_NONBLOCK, SO_REUSEADDR, SOL_SOCKET, c_int, c_void, fcntl, in_addr,
    pollfd, setsockopt, sockaddr_in, socklen_t,
};
use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Flags passed to every `send(2)` so a vanished peer yields `EPIPE` instead
/// of killing the process.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) const SEND_FLAGS: c_int = 0;

/// Puts `fd` into non-blocking mode.
pub fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(Error::last_os_error());
    }

    if unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) } < 0 {
        return Err(Error::last_os_error());
    }

    Ok(())
}

fn set_flag(fd: RawFd, level: c_int, name: c_int) -> Result<()> {
    let enable: c_int = 1;
    let ret = unsafe {
        setsockopt(
            fd,
            level,
            name,
            &enable as *const c_int as *const c_void,
            mem::size_of::<c_int>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(Error::last_os_error());
    }

    Ok(())
}

/// Allows rebinding the address while old connections linger in TIME_WAIT.
pub fn set_reusable(fd: RawFd) -> Result<()> {
    set_flag(fd, SOL_SOCKET, SO_REUSEADDR)
}

/// Stops writes to a closed peer from raising `SIGPIPE`.
///
/// Linux gets the same effect per call from `MSG_NOSIGNAL`, so this is a
/// no-op there.
pub fn set_no_sigpipe(fd: RawFd) -> Result<()> {
    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd"
    ))]
    {
        set_flag(fd, SOL_SOCKET, libc::SO_NOSIGPIPE)
    }

    #[cfg(not(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd"
    )))]
    {
        let _ = fd;
        Ok(())
    }
}

/// Waits up to `timeout` for `fd` to report `interest`.
///
/// Returns `Ok(false)` on timeout. Error and hang-up conditions count as
/// ready so the following I/O call can report them.
pub(crate) fn wait_ready(fd: RawFd, interest: Interest, timeout: Duration) -> Result<bool> {
    let mut entry = pollfd {
        fd,
        events: interest.to_poll_events(),
        revents: 0,
    };
    let timeout_ms = poll_timeout(timeout);

    loop {
        let ret = unsafe { libc::poll(&mut entry, 1, timeout_ms) };

        if ret > 0 {
            return Ok(true);
        }
        if ret == 0 {
            return Ok(false);
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(Error::Communication(err));
        }
    }
}

// Rounded up so the wait never ends before `timeout` has elapsed.
fn poll_timeout(timeout: Duration) -> c_int {
    timeout
        .as_nanos()
        .div_ceil(1_000_000)
        .min(c_int::MAX as u128) as c_int
}

/// Returns `true` for the errors a non-blocking call reports when it would
/// have to wait.
pub(crate) fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

pub(crate) fn to_sockaddr(address: SocketAddrV4) -> sockaddr_in {
    let mut raw: sockaddr_in = unsafe { mem::zeroed() };

    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd"
    ))]
    {
        raw.sin_len = mem::size_of::<sockaddr_in>() as u8;
    }

    raw.sin_family = AF_INET as libc::sa_family_t;
    raw.sin_port = address.port().to_be();
    raw.sin_addr = in_addr {
        s_addr: u32::from(*address.ip()).to_be(),
    };

    raw
}

pub(crate) fn from_sockaddr(raw: &sockaddr_in) -> SocketAddrV4 {
    let ip = Ipv4Addr::from(u32::from_be(raw.sin_addr.s_addr));
    SocketAddrV4::new(ip, u16::from_be(raw.sin_port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sockaddr_conversion_keeps_address() {
        let address = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 4840);
        assert_eq!(from_sockaddr(&to_sockaddr(address)), address);
    }

    #[test]
    fn test_wait_ready_times_out_on_idle_pipe() {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);

        let ready = wait_ready(fds[0], Interest::READABLE, Duration::from_millis(5)).unwrap();
        assert!(!ready);

        let byte = [1u8];
        assert_eq!(unsafe { libc::write(fds[1], byte.as_ptr() as *const _, 1) }, 1);
        let ready = wait_ready(fds[0], Interest::READABLE, Duration::from_millis(5)).unwrap();
        assert!(ready);

        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }

    #[test]
    fn test_poll_timeout_rounds_up() {
        assert_eq!(poll_timeout(Duration::ZERO), 0);
        assert_eq!(poll_timeout(Duration::from_micros(900)), 1);
        assert_eq!(poll_timeout(Duration::from_millis(1)), 1);
        assert_eq!(poll_timeout(Duration::from_micros(1_001)), 2);
        assert_eq!(poll_timeout(Duration::MAX), c_int::MAX);
    }

    #[test]
    fn test_sub_millisecond_wait_is_not_cut_short() {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);

        let timeout = Duration::from_micros(900);
        let start = std::time::Instant::now();
        let ready = wait_ready(fds[0], Interest::READABLE, timeout).unwrap();
        assert!(!ready);
        assert!(start.elapsed() >= timeout);

        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}
