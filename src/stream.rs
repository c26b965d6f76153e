//! Connected byte transports the channel can own.
//!
//! The channel never dials or authenticates; callers hand it a stream that is already
//! connected. Readiness waits need the raw descriptor, so every stream exposes one.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

const READY_EVENTS: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

/// An already-connected, readable, writable, closable byte channel.
pub trait ByteStream: Read + Write + AsRawFd {
    /// Switch the descriptor between blocking and non-blocking reads.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the descriptor flags cannot be changed.
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Close both directions of the stream.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the peer is already gone or the shutdown fails.
    fn close(&mut self) -> io::Result<()>;
}

impl ByteStream for TcpStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn close(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

impl ByteStream for UnixStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        UnixStream::set_nonblocking(self, nonblocking)
    }

    fn close(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

/// Block until `fd` is readable or `timeout_ms` elapses (`-1` waits forever).
///
/// Returns `Ok(true)` when the descriptor is readable, hung up, or invalid (the next
/// read reports which), and `Ok(false)` on timeout.
pub(crate) fn wait_readable(fd: RawFd, timeout_ms: i32) -> io::Result<bool> {
    let ready = wait_any_readable(&[fd], timeout_ms)?;
    Ok(ready.first().copied().unwrap_or(false))
}

/// Poll several descriptors at once and report which of them are ready to read.
pub(crate) fn wait_any_readable(fds: &[RawFd], timeout_ms: i32) -> io::Result<Vec<bool>> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    loop {
        // SAFETY: pollfds is a live, correctly sized array for the duration of the call.
        let ready = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(pollfds
            .iter()
            .map(|entry| entry.revents & READY_EVENTS != 0)
            .collect());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_readable_times_out_on_idle_socket() {
        let (left, _right) = UnixStream::pair().expect("socket pair");
        assert!(!wait_readable(left.as_raw_fd(), 0).expect("poll"));
    }

    #[test]
    fn wait_readable_reports_pending_bytes() {
        let (left, mut right) = UnixStream::pair().expect("socket pair");
        right.write_all(b"x").expect("write");
        assert!(wait_readable(left.as_raw_fd(), 1_000).expect("poll"));
    }

    #[test]
    fn wait_readable_reports_hangup_as_ready() {
        let (left, right) = UnixStream::pair().expect("socket pair");
        drop(right);
        assert!(wait_readable(left.as_raw_fd(), 1_000).expect("poll"));
    }

    #[test]
    fn wait_any_readable_reports_each_descriptor() {
        let (idle, _idle_peer) = UnixStream::pair().expect("socket pair");
        let (busy, mut busy_peer) = UnixStream::pair().expect("socket pair");
        busy_peer.write_all(b"x").expect("write");
        let ready = wait_any_readable(&[idle.as_raw_fd(), busy.as_raw_fd()], 1_000).expect("poll");
        assert_eq!(ready, vec![false, true]);
    }

    #[test]
    fn close_shuts_down_unix_stream() {
        let (mut left, mut right) = UnixStream::pair().expect("socket pair");
        ByteStream::close(&mut left).expect("close");
        let mut buf = [0u8; 4];
        assert_eq!(right.read(&mut buf).expect("read"), 0);
    }
}
