//! Configuration for the development server.
//!
//! Layered with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/matchchat-devserver/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when loading server configuration.
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
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct DevServerConfigFile {
    server: ServerFileConfig,
    demo: DemoFileConfig,
}

/// `[server]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    token_lifetime_secs: Option<u64>,
}

/// `[demo]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct DemoFileConfig {
    users: Option<usize>,
    messages: Option<usize>,
}

/// CLI arguments for the development server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "MatchChat development backend")]
pub struct DevCliArgs {
    /// Address to bind to.
    #[arg(short, long, env = "MATCHCHAT_DEV_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/matchchat-devserver/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Seconds before an access token must be refreshed.
    #[arg(long)]
    pub token_lifetime_secs: Option<u64>,

    /// Number of demo users to create.
    #[arg(long)]
    pub demo_users: Option<usize>,

    /// Messages seeded into the demo conversation.
    #[arg(long)]
    pub demo_messages: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "MATCHCHAT_DEV_LOG")]
    pub log_level: String,
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct DevServerConfig {
    pub bind_addr: String,
    /// `None` means access tokens never expire.
    pub token_lifetime: Option<Duration>,
    pub demo_users: usize,
    pub demo_messages: usize,
    pub log_level: String,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            token_lifetime: None,
            demo_users: 3,
            demo_messages: 100,
            log_level: "info".to_string(),
        }
    }
}

impl DevServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// An explicit `--config` that does not exist is an error; a missing
    /// default file is treated as empty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &DevCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    fn resolve(cli: &DevCliArgs, file: &DevServerConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            token_lifetime: cli
                .token_lifetime_secs
                .or(file.server.token_lifetime_secs)
                .map(Duration::from_secs)
                .or(defaults.token_lifetime),
            demo_users: cli
                .demo_users
                .or(file.demo.users)
                .unwrap_or(defaults.demo_users),
            demo_messages: cli
                .demo_messages
                .or(file.demo.messages)
                .unwrap_or(defaults.demo_messages),
            log_level: cli.log_level.clone(),
        }
    }
}

fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<DevServerConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(DevServerConfigFile::default());
        };
        config_dir.join("matchchat-devserver").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DevServerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
