//! Token-framed command channel and interactive terminal relay over connected byte streams.
//!
//! Wrap any already-connected [`ByteStream`] (TCP, Unix socket) in a [`StreamChannel`] to
//! issue commands whose replies end at a delimiter token, drain bursts of output that end
//! in silence, or hand the stream to an [`InteractiveRelay`] for a live terminal session.

pub mod channel;
pub mod clock;
pub mod config;
mod lock;
pub mod reporter;
pub mod stream;
pub mod telemetry;

pub(crate) use lock::lock_or_recover;

pub use channel::scan::{find_token, scan, TokenScan};
pub use channel::{
    is_quit_sentinel, open_channel, CommandOptions, CommandOutput, InteractiveRelay, LineInput,
    RelayExit, StreamChannel, TokenCommandOptions, QUIT_SENTINEL,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ChannelArgs, ChannelConfig, LogArgs};
pub use reporter::{BufferReporter, Reporter, StdoutReporter};
pub use stream::ByteStream;
