//! Command line arguments for the `paintboard-server` binary.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{ConfigError, PaintboardConfig};

/// paintboard-server command line arguments.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "paintboard-server")]
#[command(about = "Shared real-time pixel canvas over WebSocket and HTTP")]
#[command(version)]
pub struct Cli {
    /// TOML config file; defaults apply when omitted
    #[arg(value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Ignore the stored board and start from the default fill
    #[arg(long)]
    pub reset_board: bool,

    /// RocksDB directory, overriding the config file
    #[arg(long, value_name = "PATH")]
    pub storage_path: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Resolve the effective config: file (or defaults), then flag overrides.
    pub fn load_config(&self) -> Result<PaintboardConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => PaintboardConfig::from_file(path)?,
            None => {
                log::info!("No config file given; using defaults");
                PaintboardConfig::default()
            }
        };
        if self.reset_board {
            config.reset_board = true;
        }
        if let Some(path) = &self.storage_path {
            config.storage_path = path.clone();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn default_log_filter(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }
}
