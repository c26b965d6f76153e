//! Channel tuning knobs passed at construction time instead of shared constants.

use anyhow::{bail, Result};
use clap::Args;
use std::time::Duration;

/// Largest chunk requested from the stream per read call.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024 * 1024;
/// Silence that ends a burst of output.
pub const DEFAULT_QUIET_INTERVAL: Duration = Duration::from_secs(1);
/// Delay between non-blocking polls while draining a burst.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Line ending appended to every line forwarded by the interactive relay.
pub const DEFAULT_TERMINATOR: &str = "\n";

/// Per-channel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub read_chunk_size: usize,
    pub quiet_interval: Duration,
    pub poll_interval: Duration,
    /// Upper bound for token waits. `None` waits until the token arrives or the stream fails.
    pub token_deadline: Option<Duration>,
    pub terminator: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            quiet_interval: DEFAULT_QUIET_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            token_deadline: None,
            terminator: DEFAULT_TERMINATOR.to_string(),
        }
    }
}

impl ChannelConfig {
    #[must_use]
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    #[must_use]
    pub fn with_quiet_interval(mut self, interval: Duration) -> Self {
        self.quiet_interval = interval;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_token_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.token_deadline = deadline;
        self
    }

    #[must_use]
    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }

    /// Reject values that would make reads or burst detection degenerate.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.read_chunk_size == 0 {
            bail!("read_chunk_size must be greater than zero");
        }
        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than zero");
        }
        if self.poll_interval > self.quiet_interval {
            bail!(
                "poll_interval ({:?}) must not exceed quiet_interval ({:?})",
                self.poll_interval,
                self.quiet_interval
            );
        }
        if matches!(self.token_deadline, Some(deadline) if deadline.is_zero()) {
            bail!("token_deadline must be greater than zero when set");
        }
        Ok(())
    }
}

/// Channel tuning flags. Unset flags leave the underlying value alone so file config and
/// built-in defaults can fill in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Args)]
pub struct ChannelArgs {
    /// Largest read requested from the stream, in bytes
    #[arg(long = "read-chunk-size", env = "TERMCHANNEL_READ_CHUNK_SIZE")]
    pub read_chunk_size: Option<usize>,

    /// Silence (ms) that ends a burst of command output
    #[arg(long = "quiet-ms", env = "TERMCHANNEL_QUIET_MS")]
    pub quiet_ms: Option<u64>,

    /// Delay (ms) between polls while draining a burst
    #[arg(long = "poll-ms", env = "TERMCHANNEL_POLL_MS")]
    pub poll_ms: Option<u64>,

    /// Give up waiting for a token after this many ms (default: wait forever)
    #[arg(long = "token-timeout-ms", env = "TERMCHANNEL_TOKEN_TIMEOUT_MS")]
    pub token_timeout_ms: Option<u64>,

    /// Line ending appended to interactive input (accepts \n, \r and \t escapes)
    #[arg(long = "terminator")]
    pub terminator: Option<String>,
}

impl ChannelArgs {
    /// Overlay every flag that was given onto `config`.
    pub fn apply_to(&self, config: &mut ChannelConfig) {
        if let Some(size) = self.read_chunk_size {
            config.read_chunk_size = size;
        }
        if let Some(ms) = self.quiet_ms {
            config.quiet_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.poll_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.token_timeout_ms {
            config.token_deadline = Some(Duration::from_millis(ms));
        }
        if let Some(terminator) = &self.terminator {
            config.terminator = unescape_terminator(terminator);
        }
    }
}

/// Logging flags shared by every entry point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Args)]
pub struct LogArgs {
    /// Write JSON trace logs (see TERMCHANNEL_TRACE_LOG)
    #[arg(long = "logs")]
    pub logs: bool,

    /// Disable trace logs even if --logs is set
    #[arg(long = "no-logs")]
    pub no_logs: bool,

    /// Allow command text in trace logs
    #[arg(long = "log-content")]
    pub log_content: bool,
}

/// Expand `\n`, `\r`, `\t` and `\\` so terminators can be typed on a command line.
#[must_use]
pub fn unescape_terminator(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
