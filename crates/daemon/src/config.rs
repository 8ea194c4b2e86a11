//! Configuration management for the termhub daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/termhub/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::ShellOptions;

/// Default address the host listens on.
pub const DEFAULT_BIND: &str = "0.0.0.0:9000";

/// Default directory shared with viewers.
pub const DEFAULT_WATCH_ROOT: &str = "./user";

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind must be a socket address like 0.0.0.0:9000, got {0}")]
    InvalidBind(String),

    #[error("shell does not exist: {0}")]
    InvalidShellPath(String),

    #[error("terminal size must be non-zero, got {cols}x{rows}")]
    InvalidTerminalSize { cols: u16, rows: u16 },

    #[error("viewer channel_capacity must be greater than 0")]
    InvalidChannelCapacity,

    #[error("watch root must not be empty")]
    EmptyWatchRoot,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the termhub daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// HTTP/WebSocket host configuration.
    pub server: ServerConfig,

    /// Shell session configuration.
    pub session: SessionConfig,

    /// Watched directory configuration.
    pub watch: WatchConfig,

    /// Per-viewer settings.
    pub viewer: ViewerConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Optional file to write logs to instead of stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

/// Host configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind: String,
}

/// Shell session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell to run.
    pub shell: String,

    /// Extra arguments for the shell.
    pub args: Vec<String>,

    /// Working directory for the shell. Defaults to the daemon's.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Extra environment variables for the shell.
    pub env: Vec<(String, String)>,

    /// Terminal width in columns.
    pub cols: u16,

    /// Terminal height in rows.
    pub rows: u16,
}

/// Watched directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchConfig {
    /// Directory announced to viewers and served by the file endpoints.
    pub root: PathBuf,

    /// Watch the whole subtree rather than only the root's entries.
    pub recursive: bool,
}

/// Per-viewer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewerConfig {
    /// Frames queued for a viewer before it is considered unresponsive.
    pub channel_capacity: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            cols: 80,
            rows: 24,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_WATCH_ROOT),
            recursive: true,
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: crate::viewers::registry::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("termhub")
        .join("config.toml")
}

/// Returns the default shell for the current platform.
fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

impl SessionConfig {
    /// Builds the options used to spawn the shell.
    pub fn shell_options(&self) -> ShellOptions {
        ShellOptions {
            shell: Some(self.shell.clone()),
            args: self.args.clone(),
            cwd: self
                .cwd
                .as_ref()
                .map(|dir| dir.to_string_lossy().to_string()),
            env: self.env.clone(),
            cols: self.cols,
            rows: self.rows,
        }
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - TERMHUB_BIND: Override the listen address
    /// - TERMHUB_ROOT: Override the watched directory
    /// - TERMHUB_SHELL: Override the shell
    /// - TERMHUB_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Some(bind) = env_override("TERMHUB_BIND") {
            tracing::info!("Overriding bind from environment: {}", bind);
            self.server.bind = bind;
        }

        if let Some(root) = env_override("TERMHUB_ROOT") {
            tracing::info!("Overriding watch root from environment: {}", root);
            self.watch.root = PathBuf::from(root);
        }

        if let Some(shell) = env_override("TERMHUB_SHELL") {
            tracing::info!("Overriding shell from environment: {}", shell);
            self.session.shell = shell;
        }

        if let Some(level) = env_override("TERMHUB_LOG_LEVEL") {
            tracing::info!("Overriding log_level from environment: {}", level);
            self.daemon.log_level = level;
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;

        let shell_path = Path::new(&self.session.shell);
        if shell_path.is_absolute() {
            if !shell_path.exists() {
                return Err(ConfigError::InvalidShellPath(self.session.shell.clone()));
            }
        } else if which::which(&self.session.shell).is_err() {
            return Err(ConfigError::InvalidShellPath(self.session.shell.clone()));
        }

        if self.session.cols == 0 || self.session.rows == 0 {
            return Err(ConfigError::InvalidTerminalSize {
                cols: self.session.cols,
                rows: self.session.rows,
            });
        }

        if self.viewer.channel_capacity == 0 {
            return Err(ConfigError::InvalidChannelCapacity);
        }

        if self.watch.root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyWatchRoot);
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Parses the listen address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.server.bind.clone()))
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    ///
    /// The default path is `~/.config/termhub/config.toml`.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.session.shell = "/bin/sh".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.daemon.log_level, "info");
        assert!(config.daemon.log_file.is_none());
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.watch.root, PathBuf::from("./user"));
        assert!(config.watch.recursive);
        assert_eq!((config.session.cols, config.session.rows), (80, 24));
        assert_eq!(config.viewer.channel_capacity, 1024);
        assert!(!config.session.shell.is_empty());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[daemon]
log_level = "debug"

[watch]
root = "/srv/workspace"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.watch.root, PathBuf::from("/srv/workspace"));
        assert!(config.watch.recursive);
        assert_eq!(config.server.bind, DEFAULT_BIND);
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[daemon]
log_level = "trace"
log_file = "/var/log/termhub.log"

[server]
bind = "127.0.0.1:8080"

[session]
shell = "/bin/bash"
args = ["--login"]
cwd = "/srv/workspace"
env = [["TERM", "xterm-256color"]]
cols = 120
rows = 40

[watch]
root = "/srv/workspace"
recursive = false

[viewer]
channel_capacity = 64
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.log_level, "trace");
        assert_eq!(config.daemon.log_file, Some(PathBuf::from("/var/log/termhub.log")));
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.session.shell, "/bin/bash");
        assert_eq!(config.session.args, vec!["--login"]);
        assert_eq!(config.session.cwd, Some(PathBuf::from("/srv/workspace")));
        assert_eq!(
            config.session.env,
            vec![("TERM".to_string(), "xterm-256color".to_string())]
        );
        assert_eq!((config.session.cols, config.session.rows), (120, 40));
        assert!(!config.watch.recursive);
        assert_eq!(config.viewer.channel_capacity, 64);
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[server
bind = "127.0.0.1:1"
"#;
        let err = Config::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[viewer]
channel_capacity = "lots"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let toml = r#"
[server]
bind = "127.0.0.1:9000"
tls = true
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9000");
    }

    #[test]
    fn test_roundtrip() {
        let mut original = valid_config();
        original.session.args = vec!["-i".to_string()];
        original.viewer.channel_capacity = 7;
        original.daemon.log_file = Some(PathBuf::from("/tmp/termhub.log"));

        let toml = original.to_toml().unwrap();
        assert!(toml.contains("[server]"));
        assert!(toml.contains("[watch]"));

        let loaded = Config::from_toml(&toml).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut original = valid_config();
        original.server.bind = "127.0.0.1:4000".to_string();
        original.save(&path).unwrap();

        assert!(path.exists());
        assert_eq!(Config::load(&path).unwrap(), original);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "not [valid").unwrap();

        let err = format!("{:#}", Config::load(&path).unwrap_err());
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("termhub/config.toml"));
    }

    #[test]
    fn test_validate_default_like() {
        assert_eq!(valid_config().validate(), Ok(()));
    }

    #[test]
    fn test_validate_bind() {
        let mut config = valid_config();
        config.server.bind = "localhost".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBind("localhost".to_string()))
        );

        config.server.bind = "[::1]:9000".to_string();
        assert!(config.bind_addr().is_ok());
    }

    #[test]
    fn test_validate_shell() {
        let mut config = valid_config();
        config.session.shell = "/no/such/shell".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidShellPath("/no/such/shell".to_string()))
        );

        config.session.shell = "definitely-not-a-shell-on-path".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidShellPath(_))));

        config.session.shell = "sh".to_string();
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_validate_terminal_size() {
        let mut config = valid_config();
        config.session.cols = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidTerminalSize { cols: 0, rows: 24 })
        );
    }

    #[test]
    fn test_validate_channel_capacity() {
        let mut config = valid_config();
        config.viewer.channel_capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidChannelCapacity));
    }

    #[test]
    fn test_validate_empty_root() {
        let mut config = valid_config();
        config.watch.root = PathBuf::new();
        assert_eq!(config.validate(), Err(ConfigError::EmptyWatchRoot));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = valid_config();
        config.daemon.log_level = "DEBUG".to_string();
        assert_eq!(config.validate(), Ok(()));

        config.daemon.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_shell_options() {
        let mut config = valid_config();
        config.session.cwd = Some(PathBuf::from("/tmp"));
        config.session.cols = 100;

        let options = config.session.shell_options();
        assert_eq!(options.shell.as_deref(), Some("/bin/sh"));
        assert_eq!(options.cwd.as_deref(), Some("/tmp"));
        assert_eq!((options.cols, options.rows), (100, 24));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("TERMHUB_BIND", "127.0.0.1:7000");
        std::env::set_var("TERMHUB_ROOT", "/srv/other");
        std::env::set_var("TERMHUB_SHELL", "/bin/sh");
        std::env::set_var("TERMHUB_LOG_LEVEL", "warn");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("TERMHUB_BIND");
        std::env::remove_var("TERMHUB_ROOT");
        std::env::remove_var("TERMHUB_SHELL");
        std::env::remove_var("TERMHUB_LOG_LEVEL");

        assert_eq!(config.server.bind, "127.0.0.1:7000");
        assert_eq!(config.watch.root, PathBuf::from("/srv/other"));
        assert_eq!(config.session.shell, "/bin/sh");
        assert_eq!(config.daemon.log_level, "warn");
    }

    #[test]
    #[serial]
    fn test_empty_env_override_ignored() {
        std::env::set_var("TERMHUB_BIND", "");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("TERMHUB_BIND");

        assert_eq!(config.server.bind, DEFAULT_BIND);
    }
}
