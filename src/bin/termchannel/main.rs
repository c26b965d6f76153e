//! TermChannel entrypoint so scripted commands and a live session share one connection.
//!
//! Connects to an already-listening peer, runs each `--command` (framed by `--token` or
//! by a quiet period), then optionally hands the terminal to the interactive relay.
//! Typing `quit` on its own line ends the relay.

mod config;
mod persistent_config;

use anyhow::{bail, Result};
use clap::Parser;
use std::io::{self, Write};
use termchannel::telemetry::{content_logging_enabled, init_tracing};
use termchannel::{
    ChannelConfig, CommandOptions, CommandOutput, LineInput, RelayExit, StreamChannel,
    TokenCommandOptions,
};

use crate::config::{CliConfig, ConnectedStream};

fn main() -> Result<()> {
    let cli = CliConfig::parse();
    init_tracing(&cli.log);

    let channel_config = cli.resolve_channel_config()?;
    if cli.print_config {
        print_config(&channel_config);
        return Ok(());
    }

    let stream = cli.connect()?;
    tracing::info!(interactive = cli.wants_interactive(), "connected");
    let mut channel = StreamChannel::new(stream, channel_config);

    run_commands(&cli, &mut channel)?;

    if cli.wants_interactive() {
        let exit = channel.run_interactive(&mut LineInput::stdin());
        tracing::info!(?exit, "interactive session ended");
        if exit == RelayExit::StreamClosed {
            bail!("connection closed during interactive session");
        }
    }

    channel.disconnect();
    Ok(())
}

fn run_commands(cli: &CliConfig, channel: &mut StreamChannel<ConnectedStream>) -> Result<()> {
    let mut stdout = io::stdout();
    for command in &cli.commands {
        if content_logging_enabled() {
            tracing::debug!(command = %command, "sending command");
        } else {
            tracing::debug!(bytes = command.len(), "sending command");
        }
        let payload = format!("{command}{}", channel.config().terminator);

        let output = match &cli.token {
            Some(token) => channel.send_token_command(
                &payload,
                token,
                TokenCommandOptions {
                    live_display: cli.live,
                    decode: !cli.raw,
                    ..TokenCommandOptions::default()
                },
            ),
            None => channel.send_command(
                &payload,
                CommandOptions {
                    decode: !cli.raw,
                    ..CommandOptions::default()
                },
            ),
        };

        let got_output = output.is_some();
        if let Some(output) = output {
            write_output(&mut stdout, output)?;
        }
        if channel.is_terminated() {
            bail!("connection closed while running {command:?}");
        }
        if !got_output && cli.token.is_some() && !cli.live {
            bail!("token not seen before the deadline for {command:?}");
        }
    }
    Ok(())
}

fn write_output(out: &mut impl Write, output: CommandOutput) -> Result<()> {
    match output {
        CommandOutput::Text(text) => out.write_all(text.as_bytes())?,
        CommandOutput::Bytes(bytes) => out.write_all(&bytes)?,
    }
    out.flush()?;
    Ok(())
}

fn print_config(config: &ChannelConfig) {
    println!("read_chunk_size = {}", config.read_chunk_size);
    println!("quiet_ms = {}", config.quiet_interval.as_millis());
    println!("poll_ms = {}", config.poll_interval.as_millis());
    match config.token_deadline {
        Some(deadline) => println!("token_timeout_ms = {}", deadline.as_millis()),
        None => println!("token_timeout_ms = none"),
    }
    println!("terminator = {:?}", config.terminator);
}
