//! Persistent user config (`~/.config/termchannel/config.toml`) for channel defaults.
//!
//! Values here replace built-in defaults; CLI flags always take precedence over them.
//! Unknown keys are ignored so older binaries keep reading newer files.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use termchannel::config::unescape_terminator;
use termchannel::ChannelConfig;

const CONFIG_FILE: &str = "config.toml";
const CONFIG_DIR_ENV: &str = "TERMCHANNEL_CONFIG_DIR";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub(crate) struct UserConfig {
    pub(crate) read_chunk_size: Option<usize>,
    pub(crate) quiet_ms: Option<u64>,
    pub(crate) poll_ms: Option<u64>,
    pub(crate) token_timeout_ms: Option<u64>,
    pub(crate) terminator: Option<String>,
}

impl UserConfig {
    pub(crate) fn apply_to(&self, config: &mut ChannelConfig) {
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

fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = env::var(CONFIG_DIR_ENV) {
        let trimmed = dir.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    dirs::config_dir().map(|dir| dir.join("termchannel"))
}

pub(crate) fn config_file_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE))
}

fn parse_user_config(contents: &str) -> Result<UserConfig> {
    toml::from_str(contents).context("failed to parse config TOML")
}

/// Load the config file.
///
/// An explicit path must exist. The default location is optional and falls back to
/// an empty config when absent.
pub(crate) fn load_user_config(explicit: Option<&Path>) -> Result<UserConfig> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => match config_file_path() {
            Some(path) => (path, false),
            None => return Ok(UserConfig::default()),
        },
    };
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound && !required => {
            return Ok(UserConfig::default());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    tracing::debug!(path = %path.display(), "loaded user config");
    parse_user_config(&contents).with_context(|| format!("in {}", path.display()))
}
