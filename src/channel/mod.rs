//! Command/response channel over an already-connected byte stream.
//!
//! The channel owns a "stash" of bytes that were pulled off the stream but not yet handed
//! to a caller. Token-framed reads split their input at the delimiter and keep whatever
//! followed it in the stash, so the next call starts exactly where the previous one ended.
//! Transport failures never escape as errors: they mark the channel terminated, close the
//! stream, and every later call returns its no-stream sentinel.

mod io;
mod relay;
pub mod scan;


use crate::clock::{Clock, SystemClock};
use crate::config::ChannelConfig;
use crate::reporter::{Reporter, StdoutReporter};
use crate::stream::{wait_readable, ByteStream};
use std::borrow::Cow;
use std::io::{self as stdio, Read};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use self::io::{
    decode_lossy, is_would_block, should_retry_read_error, split_incomplete_utf8, write_all,
};
use self::scan::{find_token_from, rescan_start, settled_len};

pub use relay::{is_quit_sentinel, InteractiveRelay, LineInput, RelayExit, QUIT_SENTINEL};

/// Output of a command, decoded to text or left as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    Text(String),
    Bytes(Vec<u8>),
}

impl CommandOutput {
    fn from_bytes(bytes: Vec<u8>, decode: bool) -> Self {
        if decode {
            Self::Text(decode_lossy(&bytes))
        } else {
            Self::Bytes(bytes)
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Bytes(_) => None,
        }
    }

    #[must_use]
    pub fn to_text_lossy(&self) -> Cow<'_, str> {
        match self {
            Self::Text(text) => Cow::Borrowed(text),
            Self::Bytes(bytes) => String::from_utf8_lossy(bytes),
        }
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }
}

/// Options for [`StreamChannel::send_command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOptions {
    /// Drain the burst that follows the command and return it.
    pub want_output: bool,
    /// Decode output as lossy UTF-8.
    pub decode: bool,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            want_output: true,
            decode: true,
        }
    }
}

/// Options for [`StreamChannel::send_token_command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenCommandOptions {
    pub want_output: bool,
    pub decode: bool,
    /// Echo the response to the reporter as it arrives instead of returning it.
    pub live_display: bool,
    /// Overrides the channel's configured token deadline for this call.
    pub deadline: Option<Duration>,
}

impl Default for TokenCommandOptions {
    fn default() -> Self {
        Self {
            want_output: true,
            decode: true,
            live_display: false,
            deadline: None,
        }
    }
}

enum ChunkRead {
    Data(Vec<u8>),
    Eof,
    TimedOut,
    Failed(stdio::Error),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Collect,
    Display,
}

/// Buffered, token-framed command channel over a [`ByteStream`].
pub struct StreamChannel<S: ByteStream> {
    stream: Option<S>,
    stash: Vec<u8>,
    terminated: bool,
    config: ChannelConfig,
    scratch: Vec<u8>,
    reporter: Box<dyn Reporter>,
    clock: Arc<dyn Clock>,
}

/// Wrap an already-connected stream with the default configuration.
pub fn open_channel<S: ByteStream>(stream: S) -> StreamChannel<S> {
    StreamChannel::open(stream)
}

impl<S: ByteStream> StreamChannel<S> {
    /// Wrap `stream` using `config`, echoing to stdout and using the system clock.
    pub fn new(stream: S, config: ChannelConfig) -> Self {
        Self {
            stream: Some(stream),
            ..Self::detached(config)
        }
    }

    pub fn open(stream: S) -> Self {
        Self::new(stream, ChannelConfig::default())
    }

    /// A channel with no stream; every operation returns its no-stream sentinel.
    pub fn detached(config: ChannelConfig) -> Self {
        Self {
            stream: None,
            stash: Vec::new(),
            terminated: false,
            config,
            scratch: Vec::new(),
            reporter: Box::new(StdoutReporter),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stash_len(&self) -> usize {
        self.stash.len()
    }

    /// Hand the stashed bytes to the caller and clear the stash.
    pub fn take_stash(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.stash)
    }

    /// Close the stream. Returns `true` if a stream was open and closed cleanly.
    pub fn disconnect(&mut self) -> bool {
        let Some(mut stream) = self.stream.take() else {
            return false;
        };
        self.terminated = true;
        match stream.close() {
            Ok(()) => {
                tracing::debug!("channel disconnected");
                true
            }
            Err(err) => {
                tracing::debug!(error = %err, "channel close failed");
                false
            }
        }
    }

    /// Switch the stream between blocking and non-blocking reads for [`Self::read`].
    pub fn set_blocking(&mut self, blocking: bool) -> bool {
        let Some(stream) = self.stream.as_ref() else {
            return false;
        };
        match stream.set_nonblocking(!blocking) {
            Ok(()) => true,
            Err(err) => {
                self.terminate(&format!("set_nonblocking failed: {err}"));
                false
            }
        }
    }

    /// Write raw bytes. Returns `false` if there is no stream or the write failed.
    pub fn send(&mut self, data: &[u8]) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        match write_all(stream, data) {
            Ok(()) => {
                tracing::debug!(bytes = data.len(), "sent");
                true
            }
            Err(err) => {
                self.terminate(&format!("{err:#}"));
                false
            }
        }
    }

    /// Single read of up to `max_size` bytes, honoring the current blocking mode.
    ///
    /// Returns `None` without a stream, an empty buffer if the peer closed (which also
    /// terminates the channel) or a non-blocking read found nothing.
    pub fn read(&mut self, max_size: usize) -> Option<Vec<u8>> {
        let stream = self.stream.as_mut()?;
        let mut buffer = vec![0u8; max_size];
        let outcome = loop {
            match stream.read(&mut buffer) {
                Err(err) if should_retry_read_error(&err) => continue,
                other => break other,
            }
        };
        match outcome {
            Ok(0) if max_size > 0 => {
                self.terminate("peer closed the stream");
                Some(Vec::new())
            }
            Ok(n) => {
                buffer.truncate(n);
                Some(buffer)
            }
            Err(err) if is_would_block(&err) => Some(Vec::new()),
            Err(err) => {
                self.terminate(&format!("read failed: {err}"));
                None
            }
        }
    }

    /// Return the stash plus everything the stream delivers until it stays silent for one
    /// quiet interval.
    ///
    /// The stream is polled in non-blocking mode every `poll_interval` and put back into
    /// blocking mode afterwards. If the peer closes mid-burst the collected bytes are still
    /// returned and the channel is terminated.
    pub fn drain_burst(&mut self) -> Option<Vec<u8>> {
        let chunk_size = self.config.read_chunk_size.max(1);
        let quiet = self.config.quiet_interval;
        let poll = self.config.poll_interval;
        let clock = Arc::clone(&self.clock);
        let stream = self.stream.as_mut()?;
        let mut result = std::mem::take(&mut self.stash);

        if let Err(err) = stream.set_nonblocking(true) {
            self.terminate(&format!("set_nonblocking failed: {err}"));
            return None;
        }
        self.scratch.resize(chunk_size, 0);

        let mut last_activity = clock.now();
        let mut failure = None;
        let mut peer_closed = false;
        loop {
            match stream.read(&mut self.scratch) {
                Ok(0) => {
                    peer_closed = true;
                    break;
                }
                Ok(n) => {
                    result.extend_from_slice(&self.scratch[..n]);
                    last_activity = clock.now();
                }
                Err(err) if should_retry_read_error(&err) => {}
                Err(err) if is_would_block(&err) => {
                    if clock.now().saturating_duration_since(last_activity) >= quiet {
                        break;
                    }
                    clock.sleep(poll);
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            self.terminate(&format!("read failed while draining: {err}"));
            return None;
        }
        if peer_closed {
            self.terminate("peer closed the stream while draining");
            return Some(result);
        }
        if let Err(err) = stream.set_nonblocking(false) {
            self.terminate(&format!("restoring blocking mode failed: {err}"));
            return Some(result);
        }
        tracing::debug!(bytes = result.len(), "burst drained");
        Some(result)
    }

    /// Read until `token` appears and return the bytes before it.
    ///
    /// Bytes after the token stay stashed for the next call. Waits as long as the
    /// configured `token_deadline` allows (forever by default).
    pub fn read_until_token(&mut self, token: impl AsRef<[u8]>) -> Option<Vec<u8>> {
        let deadline = self.config.token_deadline;
        self.read_until_token_within(token, deadline)
    }

    /// [`Self::read_until_token`] with an explicit deadline.
    ///
    /// On timeout everything read so far goes back to the stash, the channel stays open,
    /// and `None` is returned.
    pub fn read_until_token_within(
        &mut self,
        token: impl AsRef<[u8]>,
        deadline: Option<Duration>,
    ) -> Option<Vec<u8>> {
        self.frame_until_token(token.as_ref(), deadline, Delivery::Collect)
    }

    /// Echo everything up to `token` to the reporter as it arrives.
    ///
    /// Returns `true` once the token was seen. Bytes that might still turn out to be part
    /// of the token, or of a split UTF-8 character, are held back until resolved.
    pub fn print_until_token(&mut self, token: impl AsRef<[u8]>) -> bool {
        let deadline = self.config.token_deadline;
        self.print_until_token_within(token, deadline)
    }

    pub fn print_until_token_within(
        &mut self,
        token: impl AsRef<[u8]>,
        deadline: Option<Duration>,
    ) -> bool {
        self.frame_until_token(token.as_ref(), deadline, Delivery::Display)
            .is_some()
    }

    /// Write `command` and, if asked, return the burst of output that follows it.
    ///
    /// Returns `None` when no output was requested, so callers that need to tell success
    /// from failure check [`Self::is_terminated`].
    pub fn send_command(
        &mut self,
        command: impl AsRef<[u8]>,
        options: CommandOptions,
    ) -> Option<CommandOutput> {
        if !self.send(command.as_ref()) {
            return None;
        }
        if !options.want_output {
            return None;
        }
        let data = self.drain_burst()?;
        Some(CommandOutput::from_bytes(data, options.decode))
    }

    /// Write `command` and read (or live-display) its response up to `token`.
    ///
    /// The response is consumed even when `want_output` is false. Live display always
    /// returns `None`.
    pub fn send_token_command(
        &mut self,
        command: impl AsRef<[u8]>,
        token: impl AsRef<[u8]>,
        options: TokenCommandOptions,
    ) -> Option<CommandOutput> {
        if !self.send(command.as_ref()) {
            return None;
        }
        let deadline = options.deadline.or(self.config.token_deadline);
        if options.live_display {
            self.print_until_token_within(token, deadline);
            return None;
        }
        let data = self.read_until_token_within(token, deadline)?;
        if !options.want_output {
            return None;
        }
        Some(CommandOutput::from_bytes(data, options.decode))
    }

    fn frame_until_token(
        &mut self,
        token: &[u8],
        deadline: Option<Duration>,
        delivery: Delivery,
    ) -> Option<Vec<u8>> {
        if self.stream.is_none() {
            return None;
        }
        let deadline_at = deadline.map(|limit| Instant::now() + limit);
        let mut buffer = std::mem::take(&mut self.stash);
        let mut search_from = 0;
        loop {
            if let Some(idx) = find_token_from(&buffer, token, search_from) {
                self.stash = buffer.split_off(idx + token.len());
                buffer.truncate(idx);
                tracing::debug!(bytes = buffer.len(), stashed = self.stash.len(), "token found");
                if delivery == Delivery::Display {
                    self.display(&buffer);
                    return Some(Vec::new());
                }
                return Some(buffer);
            }

            search_from = rescan_start(buffer.len(), token.len());
            if delivery == Delivery::Display {
                let settled = settled_len(&buffer, token);
                let mut shown: Vec<u8> = buffer.drain(..settled).collect();
                if let Some(mut tail) = split_incomplete_utf8(&mut shown) {
                    tail.append(&mut buffer);
                    buffer = tail;
                }
                self.display(&shown);
                search_from = 0;
            }

            match self.read_chunk(deadline_at) {
                ChunkRead::Data(chunk) => buffer.extend_from_slice(&chunk),
                ChunkRead::TimedOut => {
                    tracing::debug!(pending = buffer.len(), "token wait deadline expired");
                    self.stash = buffer;
                    return None;
                }
                ChunkRead::Eof => {
                    self.terminate("peer closed the stream before the token arrived");
                    return None;
                }
                ChunkRead::Failed(err) => {
                    self.terminate(&format!("read failed while waiting for token: {err}"));
                    return None;
                }
            }
        }
    }

    /// Wait for readability (bounded by `deadline_at`) and read one chunk.
    fn read_chunk(&mut self, deadline_at: Option<Instant>) -> ChunkRead {
        let chunk_size = self.config.read_chunk_size.max(1);
        let Some(stream) = self.stream.as_mut() else {
            return ChunkRead::Eof;
        };
        let fd = stream.as_raw_fd();
        self.scratch.resize(chunk_size, 0);
        loop {
            let timeout_ms = match deadline_at {
                None => -1,
                Some(at) => {
                    let remaining = at.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return ChunkRead::TimedOut;
                    }
                    poll_timeout_ms(remaining)
                }
            };
            match wait_readable(fd, timeout_ms) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => return ChunkRead::Failed(err),
            }
            match stream.read(&mut self.scratch) {
                Ok(0) => return ChunkRead::Eof,
                Ok(n) => return ChunkRead::Data(self.scratch[..n].to_vec()),
                Err(err) if should_retry_read_error(&err) || is_would_block(&err) => {}
                Err(err) => return ChunkRead::Failed(err),
            }
        }
    }

    /// Pull whatever is immediately readable and echo it after the stash.
    ///
    /// Used by the relay once the stream polled readable. Returns `false` if the peer
    /// closed or the read failed; the channel is terminated in that case.
    fn pump_to_reporter(&mut self) -> bool {
        let chunk_size = self.config.read_chunk_size.max(1);
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        let mut pending = std::mem::take(&mut self.stash);
        self.scratch.resize(chunk_size, 0);
        let mut failure = None;
        loop {
            match stream.read(&mut self.scratch) {
                Ok(0) => {
                    failure = Some("peer closed the stream".to_string());
                    break;
                }
                Ok(n) => {
                    pending.extend_from_slice(&self.scratch[..n]);
                    if n < self.scratch.len() {
                        break;
                    }
                }
                Err(err) if should_retry_read_error(&err) => {}
                Err(err) if is_would_block(&err) => break,
                Err(err) => {
                    failure = Some(format!("read failed: {err}"));
                    break;
                }
            }
        }

        if let Some(reason) = failure {
            self.display(&pending);
            self.terminate(&reason);
            return false;
        }
        if let Some(tail) = split_incomplete_utf8(&mut pending) {
            self.stash = tail;
        }
        self.display(&pending);
        true
    }

    /// Echo and clear the stash.
    fn flush_stash_to_reporter(&mut self) {
        let stashed = std::mem::take(&mut self.stash);
        self.display(&stashed);
    }

    fn display(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.reporter.display(&decode_lossy(bytes));
    }

    fn terminate(&mut self, reason: &str) {
        if !self.terminated {
            tracing::warn!(reason, "channel terminated");
        }
        self.terminated = true;
        self.stash.clear();
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close();
        }
    }
}

impl<S: ByteStream> std::fmt::Debug for StreamChannel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamChannel")
            .field("connected", &self.stream.is_some())
            .field("stash_len", &self.stash.len())
            .field("terminated", &self.terminated)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn poll_timeout_ms(remaining: Duration) -> i32 {
    let millis = remaining.as_micros().div_ceil(1000);
    i32::try_from(millis).unwrap_or(i32::MAX)
}
