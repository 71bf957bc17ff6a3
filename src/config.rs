//! Configuration file parser for ~/.config/feedloom/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde, though we log a warning when the
//! file contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::collection::{CollectionOptions, SortDirection};
use crate::feed::Fetcher;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-request timeout for feed and image downloads.
    pub request_timeout_secs: u64,

    /// Largest feed document accepted, in bytes.
    pub max_feed_bytes: usize,

    /// Largest image accepted, in bytes.
    pub max_image_bytes: usize,

    /// Download entry and channel images after each refresh.
    pub fetch_images: bool,

    pub user_agent: String,

    /// Direction of the chronological view.
    pub chronological: SortDirection,

    /// Allow feeds on localhost and private network addresses.
    pub allow_private_hosts: bool,

    /// Where the collection is persisted. Defaults to `state.json` next to
    /// the config file.
    pub state_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            max_feed_bytes: crate::feed::fetcher::DEFAULT_MAX_FEED_BYTES,
            max_image_bytes: crate::feed::fetcher::DEFAULT_MAX_IMAGE_BYTES,
            fetch_images: true,
            user_agent: format!("feedloom/{}", env!("CARGO_PKG_VERSION")),
            chronological: SortDirection::OldestFirst,
            allow_private_hosts: false,
            state_file: None,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: &'static [&'static str] = &[
        "request_timeout_secs",
        "max_feed_bytes",
        "max_image_bytes",
        "fetch_images",
        "user_agent",
        "chronological",
        "allow_private_hosts",
        "state_file",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a huge file is never loaded into memory
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Builds the shared HTTP fetcher from the timeout, size limits and
    /// user agent.
    pub fn fetcher(&self) -> Result<Fetcher, ConfigError> {
        let timeout = Duration::from_secs(self.request_timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .connect_timeout(timeout)
            .build()?;
        Ok(Fetcher::new(client)
            .with_timeout(timeout)
            .with_limits(self.max_feed_bytes, self.max_image_bytes))
    }

    pub fn collection_options(&self) -> CollectionOptions {
        CollectionOptions {
            fetch_images: self.fetch_images,
            chronological: self.chronological,
        }
    }

    /// State file location: the configured path, or `state.json` inside
    /// `config_dir`.
    pub fn state_path(&self, config_dir: &Path) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| config_dir.join("state.json"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("feedloom_config_test_{}", name));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.max_feed_bytes, 10 * 1024 * 1024);
        assert_eq!(config.max_image_bytes, 5 * 1024 * 1024);
        assert!(config.fetch_images);
        assert_eq!(config.chronological, SortDirection::OldestFirst);
        assert!(!config.allow_private_hosts);
        assert!(config.state_file.is_none());
        assert!(config.user_agent.starts_with("feedloom/"));
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedloom_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (dir, path) = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert!(config.fetch_images);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "fetch_images = false\n");
        let config = Config::load(&path).unwrap();
        assert!(!config.fetch_images);
        assert_eq!(config.request_timeout_secs, 30);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
request_timeout_secs = 5
max_feed_bytes = 2048
max_image_bytes = 1024
fetch_images = false
user_agent = "test-agent"
chronological = "newest_first"
allow_private_hosts = true
state_file = "/var/lib/feedloom/state.json"
"#;
        let (dir, path) = write_config("full", content);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.max_feed_bytes, 2048);
        assert_eq!(config.max_image_bytes, 1024);
        assert!(!config.fetch_images);
        assert_eq!(config.user_agent, "test-agent");
        assert_eq!(config.chronological, SortDirection::NewestFirst);
        assert!(config.allow_private_hosts);
        assert_eq!(
            config.state_path(Path::new("/ignored")),
            PathBuf::from("/var/lib/feedloom/state.json")
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (dir, path) = write_config("unknown", "fetch_images = true\ntheme = \"dark\"\n");
        assert!(Config::load(&path).is_ok());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_bad_sort_direction_rejected() {
        let (dir, path) = write_config("bad_direction", "chronological = \"sideways\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_state_path_defaults_to_config_dir() {
        let config = Config::default();
        assert_eq!(
            config.state_path(Path::new("/home/u/.config/feedloom")),
            PathBuf::from("/home/u/.config/feedloom/state.json")
        );
    }

    #[test]
    fn test_fetcher_builds() {
        assert!(Config::default().fetcher().is_ok());
    }
}
