//! Server configuration, optionally read from a TOML file.
//!
//! Every field has a default, so a file only needs the keys it changes:
//! ```toml
//! width = 1000
//! height = 600
//! cooldown_ms = 30000
//! activity_start_ms = 1700000000000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;

use crate::gate::{GateConfig, MAX_COLOR};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PaintboardConfig {
    /// WebSocket listener address
    pub ws_bind_addr: String,
    /// HTTP listener address
    pub http_bind_addr: String,
    /// Prefix for the HTTP routes
    pub api_root: String,
    /// Path the WebSocket upgrade must request
    pub ws_path: String,
    pub width: u32,
    pub height: u32,
    /// Fill colour (0xRRGGBB) for a fresh board
    pub default_color: u32,
    /// Minimum gap between one uid's accepted paints
    pub cooldown_ms: u64,
    /// Ignore the stored board and start from the default fill
    pub reset_board: bool,
    /// Inclusive activity window (ms since epoch)
    pub activity_start_ms: u64,
    pub activity_end_ms: u64,
    pub heartbeat_interval_secs: u64,
    /// How long shutdown waits for open connections before aborting them
    pub shutdown_grace_ms: u64,
    /// RocksDB directory
    pub storage_path: PathBuf,
}

impl Default for PaintboardConfig {
    fn default() -> Self {
        Self {
            ws_bind_addr: "127.0.0.1:9090".to_string(),
            http_bind_addr: "127.0.0.1:9091".to_string(),
            api_root: "/api/paintboard".to_string(),
            ws_path: "/api/paintboard/ws".to_string(),
            width: 1000,
            height: 600,
            default_color: 0xAAAAAA,
            cooldown_ms: 30_000,
            reset_board: false,
            activity_start_ms: 0,
            activity_end_ms: u64::MAX,
            heartbeat_interval_secs: 30,
            shutdown_grace_ms: 5_000,
            storage_path: PathBuf::from("paintboard_data"),
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    /// Parsed, but the values cannot run a server
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Cannot read config: {e}"),
            Self::Parse(e) => write!(f, "Cannot parse config: {e}"),
            Self::Invalid(e) => write!(f, "Invalid config: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl PaintboardConfig {
    /// Read and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml(&text)?;
        log::info!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no server could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Wire coordinates are u16
        let max = u32::from(u16::MAX) + 1;
        if self.width == 0 || self.height == 0 || self.width > max || self.height > max {
            return Err(ConfigError::Invalid(format!(
                "board {}x{} must be within 1..={max} on each side",
                self.width, self.height
            )));
        }
        if self.default_color > MAX_COLOR {
            return Err(ConfigError::Invalid(format!(
                "default_color 0x{:X} exceeds 0xFFFFFF",
                self.default_color
            )));
        }
        if self.activity_start_ms > self.activity_end_ms {
            return Err(ConfigError::Invalid("activity window ends before it starts".into()));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid("heartbeat_interval_secs must be positive".into()));
        }
        if !self.ws_path.starts_with('/') || !self.api_root.starts_with('/') {
            return Err(ConfigError::Invalid("ws_path and api_root must start with '/'".into()));
        }
        Ok(())
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            width: self.width,
            height: self.height,
            cooldown_ms: self.cooldown_ms,
            activity_start_ms: self.activity_start_ms,
            activity_end_ms: self.activity_end_ms,
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// `<api_root>/<name>`
    pub fn route(&self, name: &str) -> String {
        format!("{}/{name}", self.api_root.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PaintboardConfig::default();
        assert_eq!(config.width, 1000);
        assert_eq!(config.height, 600);
        assert_eq!(config.default_color, 0xAAAAAA);
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.route("getboard"), "/api/paintboard/getboard");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PaintboardConfig::from_toml(
            "width = 4\nheight = 4\ncooldown_ms = 500\napi_root = \"/pb/\"\n",
        )
        .unwrap();
        assert_eq!(config.width, 4);
        assert_eq!(config.cooldown_ms, 500);
        assert_eq!(config.ws_path, "/api/paintboard/ws");
        assert_eq!(config.route("paint"), "/pb/paint");
        assert_eq!(config.gate_config().width, 4);
    }

    #[test]
    fn test_invalid_values() {
        for text in [
            "width = 0",
            "height = 70000",
            "default_color = 16777216",
            "activity_start_ms = 10\nactivity_end_ms = 5",
            "heartbeat_interval_secs = 0",
            "ws_path = \"ws\"",
        ] {
            assert!(
                matches!(PaintboardConfig::from_toml(text), Err(ConfigError::Invalid(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            PaintboardConfig::from_toml("width = \"wide\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paintboard.toml");
        std::fs::write(&path, "reset_board = true\n").unwrap();
        let config = PaintboardConfig::from_file(&path).unwrap();
        assert!(config.reset_board);

        assert!(matches!(
            PaintboardConfig::from_file(dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
