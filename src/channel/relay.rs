//! Live two-way terminal session between the channel's stream and a local line source.
//!
//! Single-threaded: each iteration blocks in `poll(2)` on exactly two descriptors, the
//! stream and the local input. When both report ready in the same wakeup both are
//! serviced before the next wait; the order between them is not part of the contract.

use super::StreamChannel;
use crate::stream::{wait_any_readable, ByteStream};
use std::io::{self, ErrorKind};
use std::os::unix::io::{AsRawFd, RawFd};

/// Local input line that ends an interactive session.
pub const QUIT_SENTINEL: &str = "quit";

const INPUT_READ_CHUNK: usize = 4096;

/// `true` when `line`, with surrounding whitespace removed, is exactly the sentinel.
#[must_use]
pub fn is_quit_sentinel(line: &str) -> bool {
    line.trim() == QUIT_SENTINEL
}

/// Why an interactive session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// The local user typed the sentinel.
    Quit,
    /// Local input reached end-of-file without the sentinel.
    InputClosed,
    /// The stream closed or failed; the channel is terminated.
    StreamClosed,
}

impl RelayExit {
    /// Only the sentinel counts as a successful close.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Quit)
    }
}

/// Line-oriented reader over a raw descriptor (stdin, a pipe, a socket).
///
/// Reads go straight to the descriptor so nothing hides in a userspace buffer that
/// `poll` cannot see. Partial lines are kept until their newline arrives.
#[derive(Debug)]
pub struct LineInput<F: AsRawFd> {
    source: F,
    pending: Vec<u8>,
    eof: bool,
}

impl LineInput<io::Stdin> {
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(io::stdin())
    }
}

impl<F: AsRawFd> LineInput<F> {
    pub fn new(source: F) -> Self {
        Self {
            source,
            pending: Vec::new(),
            eof: false,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Pop the next complete line without its line ending.
    ///
    /// After end-of-file a trailing unterminated line is returned as well.
    pub fn next_line(&mut self) -> Option<String> {
        let end = match self.pending.iter().position(|b| *b == b'\n') {
            Some(idx) => idx + 1,
            None if self.eof && !self.pending.is_empty() => self.pending.len(),
            None => return None,
        };
        let raw: Vec<u8> = self.pending.drain(..end).collect();
        let text = String::from_utf8_lossy(&raw);
        Some(text.trim_end_matches(['\n', '\r']).to_string())
    }

    /// One read from the descriptor. Returns the number of bytes added; zero means EOF.
    pub fn fill(&mut self) -> io::Result<usize> {
        let mut buffer = [0u8; INPUT_READ_CHUNK];
        loop {
            // SAFETY: the descriptor is owned by `source` for our lifetime and buffer is writable.
            let n = unsafe {
                libc::read(
                    self.source.as_raw_fd(),
                    buffer.as_mut_ptr() as *mut libc::c_void,
                    buffer.len(),
                )
            };
            if n > 0 {
                let n = n as usize;
                self.pending.extend_from_slice(&buffer[..n]);
                return Ok(n);
            }
            if n == 0 {
                self.eof = true;
                return Ok(0);
            }
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
    }

    fn raw_fd(&self) -> RawFd {
        self.source.as_raw_fd()
    }
}

/// Owns terminal control for the length of one interactive session.
pub struct InteractiveRelay<'a, S: ByteStream, F: AsRawFd> {
    channel: &'a mut StreamChannel<S>,
    input: &'a mut LineInput<F>,
    terminator: String,
}

impl<'a, S: ByteStream, F: AsRawFd> InteractiveRelay<'a, S, F> {
    /// Relay using the channel's configured line terminator.
    pub fn new(channel: &'a mut StreamChannel<S>, input: &'a mut LineInput<F>) -> Self {
        let terminator = channel.config.terminator.clone();
        Self {
            channel,
            input,
            terminator,
        }
    }

    #[must_use]
    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }

    /// Run until the sentinel, local EOF, or a stream failure.
    pub fn run(mut self) -> RelayExit {
        let Some(stream_fd) = self.channel.stream.as_ref().map(AsRawFd::as_raw_fd) else {
            return RelayExit::StreamClosed;
        };
        self.channel.flush_stash_to_reporter();
        if !self.channel.set_blocking(false) {
            return RelayExit::StreamClosed;
        }
        tracing::debug!("interactive relay started");

        let exit = self.relay_loop(stream_fd);

        if self.channel.is_connected() {
            self.channel.set_blocking(true);
        }
        tracing::debug!(?exit, "interactive relay finished");
        exit
    }

    fn relay_loop(&mut self, stream_fd: RawFd) -> RelayExit {
        let input_fd = self.input.raw_fd();
        loop {
            if let Some(exit) = self.forward_pending_lines() {
                return exit;
            }
            if self.input.is_eof() {
                return RelayExit::InputClosed;
            }

            let ready = match wait_any_readable(&[stream_fd, input_fd], -1) {
                Ok(ready) => ready,
                Err(err) => {
                    self.channel
                        .terminate(&format!("relay readiness wait failed: {err}"));
                    return RelayExit::StreamClosed;
                }
            };
            let stream_ready = ready.first().copied().unwrap_or(false);
            let input_ready = ready.get(1).copied().unwrap_or(false);

            if stream_ready && !self.channel.pump_to_reporter() {
                return RelayExit::StreamClosed;
            }
            if input_ready {
                match self.input.fill() {
                    Ok(_) => {}
                    Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                    Err(err) => {
                        tracing::debug!(error = %err, "local input read failed");
                        return RelayExit::InputClosed;
                    }
                }
            }
        }
    }

    fn forward_pending_lines(&mut self) -> Option<RelayExit> {
        while let Some(line) = self.input.next_line() {
            if is_quit_sentinel(&line) {
                return Some(RelayExit::Quit);
            }
            let mut payload = line.trim().as_bytes().to_vec();
            payload.extend_from_slice(self.terminator.as_bytes());
            if !self.channel.send(&payload) {
                return Some(RelayExit::StreamClosed);
            }
        }
        None
    }
}

impl<S: ByteStream> StreamChannel<S> {
    /// Hand the terminal to an interactive session fed by `input`.
    ///
    /// [`RelayExit::is_success`] holds only when the user typed the sentinel; local EOF
    /// and stream failure are reported as their own exits.
    pub fn run_interactive<F: AsRawFd>(&mut self, input: &mut LineInput<F>) -> RelayExit {
        InteractiveRelay::new(self, input).run()
    }
}
