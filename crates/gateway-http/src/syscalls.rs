// src/syscalls.rs
use std::io;
use std::os::fd::RawFd;

pub use libc::pollfd;

/// Readable, hung up or in error: every case the reactor must look at.
pub const READY_EVENTS: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR;

pub fn poll_entry(fd: RawFd) -> pollfd {
    pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

#[inline]
pub fn is_ready(entry: &pollfd) -> bool {
    entry.revents & READY_EVENTS != 0
}

/// Blocks until at least one descriptor is ready or the timeout expires.
/// A negative timeout waits forever. Returns the number of ready entries.
pub fn poll(fds: &mut [pollfd], timeout_ms: i32) -> io::Result<usize> {
    // SAFETY: the pointer and length describe a live, exclusively borrowed
    // slice of `pollfd` for the duration of the call.
    let res = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(res as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_poll_reports_readable() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let mut fds = [poll_entry(b.as_raw_fd())];

        assert_eq!(poll(&mut fds, 0).unwrap(), 0);
        assert!(!is_ready(&fds[0]));

        a.write_all(b"x").unwrap();
        assert_eq!(poll(&mut fds, 1000).unwrap(), 1);
        assert!(is_ready(&fds[0]));
    }

    #[test]
    fn test_poll_reports_hangup() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(a);
        let mut fds = [poll_entry(b.as_raw_fd())];
        assert_eq!(poll(&mut fds, 1000).unwrap(), 1);
        assert!(is_ready(&fds[0]));
    }
}
