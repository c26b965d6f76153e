//! CLI flag schema so connection targets and channel tuning are explicit and discoverable.

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;
use termchannel::{ByteStream, ChannelArgs, ChannelConfig, LogArgs};

use crate::persistent_config;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "termchannel",
    about = "TermChannel: token-framed commands and interactive relay over a socket",
    version,
    group(ArgGroup::new("target").required(true).args(["connect", "unix"]))
)]
pub(crate) struct CliConfig {
    /// TCP address of an already-listening peer (HOST:PORT)
    #[arg(long = "connect", value_name = "HOST:PORT")]
    pub(crate) connect: Option<String>,

    /// Unix socket path of an already-listening peer
    #[arg(long = "unix", value_name = "PATH")]
    pub(crate) unix: Option<PathBuf>,

    /// Seconds to wait for the TCP connection
    #[arg(long = "connect-timeout", default_value_t = 10)]
    pub(crate) connect_timeout_secs: u64,

    /// Command to send (repeatable); the terminator is appended to each
    #[arg(long = "command", short = 'c', value_name = "TEXT")]
    pub(crate) commands: Vec<String>,

    /// Frame each command's response at this token instead of waiting for silence
    #[arg(long = "token", value_name = "TOKEN")]
    pub(crate) token: Option<String>,

    /// Echo token-framed output while it arrives
    #[arg(long = "live", requires = "token")]
    pub(crate) live: bool,

    /// Write output bytes untouched instead of decoding as UTF-8
    #[arg(long = "raw")]
    pub(crate) raw: bool,

    /// Enter the interactive relay after running commands (default when no commands are given)
    #[arg(long = "interactive", short = 'i')]
    pub(crate) interactive: bool,

    /// Config file (default: ~/.config/termchannel/config.toml)
    #[arg(long = "config", value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    /// Print the resolved channel configuration and exit
    #[arg(long = "print-config")]
    pub(crate) print_config: bool,

    #[command(flatten)]
    pub(crate) channel: ChannelArgs,

    #[command(flatten)]
    pub(crate) log: LogArgs,
}

impl CliConfig {
    /// Built-in defaults, then the config file, then CLI flags.
    pub(crate) fn resolve_channel_config(&self) -> Result<ChannelConfig> {
        let user = persistent_config::load_user_config(self.config_path.as_deref())?;
        let mut config = ChannelConfig::default();
        user.apply_to(&mut config);
        self.channel.apply_to(&mut config);
        config.validate().context("invalid channel configuration")?;
        Ok(config)
    }

    pub(crate) fn wants_interactive(&self) -> bool {
        self.interactive || self.commands.is_empty()
    }

    pub(crate) fn connect(&self) -> Result<ConnectedStream> {
        if let Some(path) = &self.unix {
            let stream = UnixStream::connect(path)
                .with_context(|| format!("failed to connect to {}", path.display()))?;
            return Ok(ConnectedStream::Unix(stream));
        }
        let address = self.connect.as_deref().context("no connection target given")?;
        let timeout = Duration::from_secs(self.connect_timeout_secs.max(1));
        let mut last_err = None;
        for addr in std::net::ToSocketAddrs::to_socket_addrs(address)
            .with_context(|| format!("failed to resolve {address}"))?
        {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(ConnectedStream::Tcp(stream)),
                Err(err) => last_err = Some(err),
            }
        }
        match last_err {
            Some(err) => Err(err).with_context(|| format!("failed to connect to {address}")),
            None => anyhow::bail!("{address} resolved to no addresses"),
        }
    }
}

/// The transport chosen on the command line.
#[derive(Debug)]
pub(crate) enum ConnectedStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Read for ConnectedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ConnectedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            Self::Unix(stream) => stream.flush(),
        }
    }
}

impl AsRawFd for ConnectedStream {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Tcp(stream) => stream.as_raw_fd(),
            Self::Unix(stream) => stream.as_raw_fd(),
        }
    }
}

impl ByteStream for ConnectedStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => ByteStream::set_nonblocking(stream, nonblocking),
            Self::Unix(stream) => ByteStream::set_nonblocking(stream, nonblocking),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => ByteStream::close(stream),
            Self::Unix(stream) => ByteStream::close(stream),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_config_file(label: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "termchannel-cli-{label}-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "").expect("write empty config");
        path
    }

    fn parse(args: &[&str]) -> CliConfig {
        CliConfig::try_parse_from(std::iter::once("termchannel").chain(args.iter().copied()))
            .expect("valid args")
    }

    #[test]
    fn target_is_required() {
        let err = CliConfig::try_parse_from(["termchannel", "--command", "id"])
            .expect_err("missing target should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn connect_and_unix_are_exclusive() {
        let err = CliConfig::try_parse_from([
            "termchannel",
            "--connect",
            "127.0.0.1:1",
            "--unix",
            "/tmp/sock",
        ])
        .expect_err("two targets should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn live_requires_token() {
        let err = CliConfig::try_parse_from(["termchannel", "--connect", "h:1", "--live"])
            .expect_err("--live without --token should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn interactive_is_default_without_commands() {
        assert!(parse(&["--connect", "h:1"]).wants_interactive());
        assert!(!parse(&["--connect", "h:1", "-c", "id"]).wants_interactive());
        assert!(parse(&["--connect", "h:1", "-c", "id", "-i"]).wants_interactive());
    }

    #[test]
    fn repeated_commands_keep_order() {
        let cli = parse(&["--connect", "h:1", "-c", "first", "--command", "second"]);
        assert_eq!(cli.commands, vec!["first", "second"]);
    }

    #[test]
    fn channel_flags_flow_into_resolved_config() {
        let file = empty_config_file("flags");
        let cli = parse(&[
            "--connect",
            "h:1",
            "--config",
            file.to_str().expect("utf-8 path"),
            "--quiet-ms",
            "300",
            "--poll-ms",
            "20",
            "--token-timeout-ms",
            "1500",
            "--terminator",
            "\\r\\n",
        ]);
        let config = cli.resolve_channel_config().expect("resolve");
        assert_eq!(config.quiet_interval, Duration::from_millis(300));
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert_eq!(config.token_deadline, Some(Duration::from_millis(1500)));
        assert_eq!(config.terminator, "\r\n");
        let _ = std::fs::remove_file(file);
    }

    #[test]
    fn invalid_flags_fail_validation() {
        let file = empty_config_file("invalid");
        let cli = parse(&[
            "--connect",
            "h:1",
            "--config",
            file.to_str().expect("utf-8 path"),
            "--read-chunk-size",
            "0",
        ]);
        let err = cli.resolve_channel_config().expect_err("zero chunk size");
        assert!(format!("{err:#}").contains("read_chunk_size"));
        let _ = std::fs::remove_file(file);
    }

    #[test]
    fn unix_target_connects_to_listener() {
        let dir = std::env::temp_dir().join(format!("termchannel-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create dir");
        let path = dir.join("peer.sock");
        let _ = std::fs::remove_file(&path);
        let listener = std::os::unix::net::UnixListener::bind(&path).expect("bind");

        let cli = parse(&["--unix", path.to_str().expect("utf-8 path")]);
        let stream = cli.connect().expect("connect");
        assert!(matches!(stream, ConnectedStream::Unix(_)));
        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
