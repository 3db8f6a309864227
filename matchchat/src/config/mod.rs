//! Configuration system for the `MatchChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/matchchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use matchchat_proto::message::{ConversationId, UserId};

use crate::api::http::Credentials;

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

    /// The API base URL is not a valid URL.
    #[error("invalid API URL {url:?}: {source}")]
    InvalidUrl {
        /// The offending value.
        url: String,
        /// Parser error.
        source: url::ParseError,
    },

    /// A setting required for going online is absent.
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    auth: AuthFileConfig,
    reconnect: ReconnectFileConfig,
    window: WindowFileConfig,
    receipts: ReceiptFileConfig,
    feed: FeedFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    api_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

/// `[auth]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct AuthFileConfig {
    user_id: Option<i64>,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
}

/// `[window]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct WindowFileConfig {
    max_size: Option<usize>,
    initial_fetch: Option<usize>,
    initial_visible: Option<usize>,
    page_size: Option<usize>,
}

/// `[receipts]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReceiptFileConfig {
    flush_interval_ms: Option<u64>,
    initial_suppression_ms: Option<u64>,
    max_per_scroll: Option<usize>,
}

/// `[feed]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct FeedFileConfig {
    capacity: Option<usize>,
    undo_buffer: Option<usize>,
    page_size: Option<usize>,
    prefetch_threshold: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Reconnect backoff policy (used by `ConnectionManager`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// First delay, and the delay after any successful open.
    pub base_delay: Duration,
    /// Upper bound of the doubling delay.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

/// Message window sizing (used by `WindowedMessageBuffer`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Maximum number of visible messages.
    pub max_size: usize,
    /// Messages fetched when a conversation opens.
    pub initial_fetch: usize,
    /// Of those, how many become visible; the rest are staged as older.
    pub initial_visible: usize,
    /// Page size of `load_older` / `load_newer`, and the minimum eviction.
    pub page_size: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_size: 125,
            initial_fetch: 70,
            initial_visible: 40,
            page_size: 30,
        }
    }
}

/// Read-receipt batching (used by `ReadReceiptBatcher`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptConfig {
    /// Debounce interval between the first pending mark and the flush.
    pub flush_interval: Duration,
    /// Marks are ignored for this long after the view opens.
    pub initial_suppression: Duration,
    /// Maximum ids marked per scroll event.
    pub max_per_scroll: usize,
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(1000),
            initial_suppression: Duration::from_millis(1500),
            max_per_scroll: 12,
        }
    }
}

/// Candidate feed sizing (used by `CandidateFeed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedConfig {
    /// Deque capacity.
    pub capacity: usize,
    /// Profiles kept behind the cursor for undo.
    pub undo_buffer: usize,
    /// Profiles requested per search page.
    pub page_size: usize,
    /// Prefetch when fewer than this many remain ahead.
    pub prefetch_threshold: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            undo_buffer: 5,
            page_size: 20,
            prefetch_threshold: 5,
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Network --
    /// REST API base URL; the chat socket URL is derived from it.
    pub api_url: Option<String>,
    /// Timeout for the chat socket handshake.
    pub connect_timeout: Duration,
    /// Timeout for each REST request.
    pub request_timeout: Duration,

    // -- Auth --
    /// Logged-in user.
    pub user_id: Option<i64>,
    /// Bearer token.
    pub access_token: Option<String>,
    /// Refresh token used after a `401`.
    pub refresh_token: Option<String>,

    // -- Engine --
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
    /// Message window sizing.
    pub window: WindowConfig,
    /// Read-receipt batching.
    pub receipts: ReceiptConfig,
    /// Candidate feed sizing.
    pub feed: FeedConfig,

    // -- Session --
    /// Conversation to open on start (CLI only).
    pub chat_id: Option<i64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(15),
            user_id: None,
            access_token: None,
            refresh_token: None,
            reconnect: ReconnectConfig::default(),
            window: WindowConfig::default(),
            receipts: ReceiptConfig::default(),
            feed: FeedConfig::default(),
            chat_id: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path
    /// (`~/.config/matchchat/config.toml`) is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            api_url: cli.api_url.clone().or_else(|| file.network.api_url.clone()),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: file
                .network
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            user_id: cli.user_id.or(file.auth.user_id),
            access_token: cli
                .access_token
                .clone()
                .or_else(|| file.auth.access_token.clone()),
            refresh_token: cli
                .refresh_token
                .clone()
                .or_else(|| file.auth.refresh_token.clone()),
            reconnect: ReconnectConfig {
                base_delay: file
                    .reconnect
                    .base_delay_ms
                    .map_or(defaults.reconnect.base_delay, Duration::from_millis),
                max_delay: file
                    .reconnect
                    .max_delay_ms
                    .map_or(defaults.reconnect.max_delay, Duration::from_millis),
            },
            window: WindowConfig {
                max_size: file.window.max_size.unwrap_or(defaults.window.max_size),
                initial_fetch: file
                    .window
                    .initial_fetch
                    .unwrap_or(defaults.window.initial_fetch),
                initial_visible: file
                    .window
                    .initial_visible
                    .unwrap_or(defaults.window.initial_visible),
                page_size: file.window.page_size.unwrap_or(defaults.window.page_size),
            },
            receipts: ReceiptConfig {
                flush_interval: file
                    .receipts
                    .flush_interval_ms
                    .map_or(defaults.receipts.flush_interval, Duration::from_millis),
                initial_suppression: file
                    .receipts
                    .initial_suppression_ms
                    .map_or(defaults.receipts.initial_suppression, Duration::from_millis),
                max_per_scroll: file
                    .receipts
                    .max_per_scroll
                    .unwrap_or(defaults.receipts.max_per_scroll),
            },
            feed: FeedConfig {
                capacity: file.feed.capacity.unwrap_or(defaults.feed.capacity),
                undo_buffer: file.feed.undo_buffer.unwrap_or(defaults.feed.undo_buffer),
                page_size: file.feed.page_size.unwrap_or(defaults.feed.page_size),
                prefetch_threshold: file
                    .feed
                    .prefetch_threshold
                    .unwrap_or(defaults.feed.prefetch_threshold),
            },
            chat_id: cli.chat_id,
        }
    }

    /// Parse the configured API base URL.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] when unset, [`ConfigError::InvalidUrl`] when
    /// it does not parse.
    pub fn api_base_url(&self) -> Result<Url, ConfigError> {
        let raw = self.api_url.as_deref().ok_or(ConfigError::Missing("api_url"))?;
        Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
            url: raw.to_string(),
            source,
        })
    }

    /// Build login [`Credentials`] from this configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] if the user id or access token is absent.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let user_id = self.user_id.ok_or(ConfigError::Missing("user_id"))?;
        let access_token = self
            .access_token
            .clone()
            .ok_or(ConfigError::Missing("access_token"))?;
        Ok(Credentials {
            user_id: UserId::new(user_id),
            access_token,
            refresh_token: self.refresh_token.clone(),
        })
    }

    /// Conversation to open on start, if any.
    #[must_use]
    pub fn conversation(&self) -> Option<ConversationId> {
        self.chat_id.map(ConversationId::new)
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Headless MatchChat client")]
pub struct CliArgs {
    /// Base URL of the REST API (e.g. `http://localhost:8080`).
    #[arg(long, env = "MATCHCHAT_API_URL")]
    pub api_url: Option<String>,

    /// Logged-in user id.
    #[arg(long, env = "MATCHCHAT_USER_ID")]
    pub user_id: Option<i64>,

    /// Bearer access token.
    #[arg(long, env = "MATCHCHAT_ACCESS_TOKEN")]
    pub access_token: Option<String>,

    /// Refresh token.
    #[arg(long, env = "MATCHCHAT_REFRESH_TOKEN")]
    pub refresh_token: Option<String>,

    /// Conversation to open (default: the most recent one).
    #[arg(long)]
    pub chat_id: Option<i64>,

    /// Path to config file (default: `~/.config/matchchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "MATCHCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/matchchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("matchchat").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_constants() {
        let config = ClientConfig::default();
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(1000));
        assert_eq!(config.reconnect.max_delay, Duration::from_millis(30_000));
        assert_eq!(config.window.max_size, 125);
        assert_eq!(config.window.initial_fetch, 70);
        assert_eq!(config.window.initial_visible, 40);
        assert_eq!(config.window.page_size, 30);
        assert_eq!(config.receipts.flush_interval, Duration::from_secs(1));
        assert_eq!(config.receipts.initial_suppression, Duration::from_millis(1500));
        assert_eq!(config.receipts.max_per_scroll, 12);
        assert_eq!(config.feed.capacity, 50);
        assert_eq!(config.feed.undo_buffer, 5);
        assert_eq!(config.feed.page_size, 20);
        assert_eq!(config.feed.prefetch_threshold, 5);
    }

    #[test]
    fn toml_parsing_full() {
        let toml_str = r#"
[network]
api_url = "http://example.com:8080/api"
connect_timeout_secs = 30
request_timeout_secs = 5

[auth]
user_id = 7
access_token = "acc"
refresh_token = "ref"

[reconnect]
base_delay_ms = 500
max_delay_ms = 8000

[window]
max_size = 200
initial_fetch = 80
initial_visible = 50
page_size = 25

[receipts]
flush_interval_ms = 250
initial_suppression_ms = 0
max_per_scroll = 4

[feed]
capacity = 10
undo_buffer = 2
page_size = 4
prefetch_threshold = 1
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let config = ClientConfig::resolve(&CliArgs::default(), &file);

        assert_eq!(config.api_url.as_deref(), Some("http://example.com:8080/api"));
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.user_id, Some(7));
        assert_eq!(config.access_token.as_deref(), Some("acc"));
        assert_eq!(config.refresh_token.as_deref(), Some("ref"));
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(500));
        assert_eq!(config.reconnect.max_delay, Duration::from_millis(8000));
        assert_eq!(config.window.max_size, 200);
        assert_eq!(config.window.initial_fetch, 80);
        assert_eq!(config.window.initial_visible, 50);
        assert_eq!(config.window.page_size, 25);
        assert_eq!(config.receipts.flush_interval, Duration::from_millis(250));
        assert_eq!(config.receipts.initial_suppression, Duration::ZERO);
        assert_eq!(config.receipts.max_per_scroll, 4);
        assert_eq!(config.feed.capacity, 10);
        assert_eq!(config.feed.undo_buffer, 2);
        assert_eq!(config.feed.page_size, 4);
        assert_eq!(config.feed.prefetch_threshold, 1);
    }

    #[test]
    fn toml_parsing_partial() {
        let toml_str = r"
[window]
page_size = 10
";
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let config = ClientConfig::resolve(&CliArgs::default(), &file);

        assert_eq!(config.window.page_size, 10);
        assert_eq!(config.window.max_size, 125);
        assert_eq!(config.reconnect, ReconnectConfig::default());
        assert!(config.api_url.is_none());
    }

    #[test]
    fn cli_overrides_file() {
        let toml_str = r#"
[network]
api_url = "http://file:8080"

[auth]
user_id = 1
access_token = "file-token"
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let cli = CliArgs {
            api_url: Some("http://cli:8080".to_string()),
            user_id: Some(2),
            access_token: None,
            ..Default::default()
        };
        let config = ClientConfig::resolve(&cli, &file);

        assert_eq!(config.api_url.as_deref(), Some("http://cli:8080"));
        assert_eq!(config.user_id, Some(2));
        assert_eq!(config.access_token.as_deref(), Some("file-token"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        assert!(load_config_file(None).is_ok());
    }

    #[test]
    fn explicit_missing_config_file_returns_error() {
        let result = load_config_file(Some(std::path::Path::new("/nonexistent/config.toml")));
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn credentials_require_user_and_token() {
        let mut config = ClientConfig {
            user_id: Some(3),
            ..Default::default()
        };
        assert!(matches!(
            config.credentials(),
            Err(ConfigError::Missing("access_token"))
        ));
        config.access_token = Some("t".into());
        let creds = config.credentials().unwrap();
        assert_eq!(creds.user_id, UserId::new(3));
        assert!(creds.refresh_token.is_none());
    }

    #[test]
    fn api_base_url_validates() {
        let mut config = ClientConfig::default();
        assert!(matches!(config.api_base_url(), Err(ConfigError::Missing(_))));
        config.api_url = Some("not a url".into());
        assert!(matches!(
            config.api_base_url(),
            Err(ConfigError::InvalidUrl { .. })
        ));
        config.api_url = Some("http://localhost:8080".into());
        assert_eq!(config.api_base_url().unwrap().port(), Some(8080));
    }
}
