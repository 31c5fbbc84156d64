//! Configuration for the `HomeChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/homechat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;

use chrono::{FixedOffset, Local, Offset};

use homechat_proto::message::UserId;

use crate::chat::ChatConfig;
use crate::chat::render::RenderOptions;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// `utc_offset_minutes` is outside ±24 hours.
    #[error("invalid UTC offset: {0} minutes")]
    InvalidUtcOffset(i32),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    session: SessionFileConfig,
    chat: ChatFileConfig,
    render: RenderFileConfig,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    viewer_id: Option<u64>,
    display_name: Option<String>,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    max_message_len: Option<usize>,
    retain_inactive_threads: Option<bool>,
    event_buffer: Option<usize>,
}

/// `[render]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RenderFileConfig {
    group_window_secs: Option<u64>,
    time_format: Option<String>,
    day_format: Option<String>,
    utc_offset_minutes: Option<i32>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The signed-in user.
    pub viewer_id: UserId,
    /// Name shown in logs.
    pub display_name: String,
    /// Chat core settings.
    pub chat: ChatConfig,
    /// Thread rendering settings.
    pub render: RenderOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            viewer_id: UserId::new(1),
            display_name: "guest".to_string(),
            chat: ChatConfig::default(),
            render: RenderOptions {
                utc_offset: local_offset(),
                ..RenderOptions::default()
            },
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// Otherwise the default path (`~/.config/homechat/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or if it holds an out-of-range UTC offset.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let utc_offset = match file.render.utc_offset_minutes {
            Some(minutes) => minutes
                .checked_mul(60)
                .and_then(FixedOffset::east_opt)
                .ok_or(ConfigError::InvalidUtcOffset(minutes))?,
            None => defaults.render.utc_offset,
        };

        Ok(Self {
            viewer_id: cli
                .viewer_id
                .or(file.session.viewer_id)
                .map_or(defaults.viewer_id, UserId::new),
            display_name: cli
                .display_name
                .clone()
                .or_else(|| file.session.display_name.clone())
                .unwrap_or(defaults.display_name),
            chat: ChatConfig {
                max_message_len: file
                    .chat
                    .max_message_len
                    .unwrap_or(defaults.chat.max_message_len),
                retain_inactive_threads: file
                    .chat
                    .retain_inactive_threads
                    .unwrap_or(defaults.chat.retain_inactive_threads),
                event_buffer: file
                    .chat
                    .event_buffer
                    .unwrap_or(defaults.chat.event_buffer),
            },
            render: RenderOptions {
                group_window_ms: file
                    .render
                    .group_window_secs
                    .map_or(defaults.render.group_window_ms, |s| s.saturating_mul(1000)),
                time_format: cli
                    .timestamp_format
                    .clone()
                    .or_else(|| file.render.time_format.clone())
                    .unwrap_or(defaults.render.time_format),
                day_format: file
                    .render
                    .day_format
                    .clone()
                    .unwrap_or(defaults.render.day_format),
                utc_offset,
            },
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Marketplace chat core demo")]
pub struct CliArgs {
    /// Path to config file (default: `~/.config/homechat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Signed-in user id.
    #[arg(long, env = "HOMECHAT_VIEWER")]
    pub viewer_id: Option<u64>,

    /// Display name of the signed-in user.
    #[arg(long)]
    pub display_name: Option<String>,

    /// Message time format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "HOMECHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/homechat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn local_offset() -> FixedOffset {
    Local::now().offset().fix()
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("homechat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
