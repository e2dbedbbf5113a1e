//! Daemon configuration.
//!
//! Configuration is read once at startup from a TOML file and handed to each
//! component's constructor; nothing below `main` looks it up on its own.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 62457
//! read_timeout_secs = 30
//!
//! [queue]
//! path = "/var/lib/relion-jobmail/jobs.jsonl"
//!
//! [digest]
//! interval_secs = 900
//! subject_prefix = "[relion-emailer]"
//!
//! [mail]
//! sender = "relion@cryo.example.org"
//! recipients = ["alice@example.org", "bob@example.org"]
//! transport = "sendmail"
//! ```

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use jobmail_core::DEFAULT_SUBJECT_PREFIX;
use jobmail_protocol::DEFAULT_PORT;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "JOBMAIL_CONFIG";

/// Config files searched when no explicit path is given, in order.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["relion-jobmail.toml", "/etc/relion-jobmail.toml"];

/// Default drain interval.
pub const DEFAULT_INTERVAL_SECS: u64 = 15;

/// Default bound on how long a peer may take to deliver one notice.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Default maximum notice size (64 KiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 65_536;

/// Complete daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub digest: DigestConfig,
    pub mail: MailConfig,
}

/// Ingress listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub read_timeout_secs: u64,
    pub max_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl ServerConfig {
    /// Address string suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Durable queue settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub path: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("jobs.jsonl"),
        }
    }
}

/// Drain cycle and report settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DigestConfig {
    pub interval_secs: u64,
    pub subject_prefix: String,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
        }
    }
}

impl DigestConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Which mail transport delivers digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Pipe the message to the local `sendmail`
    #[default]
    Sendmail,
    /// Only log the digest
    Log,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sendmail => write!(f, "sendmail"),
            Self::Log => write!(f, "log"),
        }
    }
}

/// Dispatch settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MailConfig {
    pub sender: String,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default = "default_sendmail_path")]
    pub sendmail_path: PathBuf,
}

fn default_sendmail_path() -> PathBuf {
    PathBuf::from("/usr/sbin/sendmail")
}

impl Config {
    /// Parses and validates a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::from_toml(&text).map_err(|e| match e {
            ConfigError::Parse(error) => ConfigError::ParseFile {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Finds the configuration file to use.
    ///
    /// Order: the explicit path, `$JOBMAIL_CONFIG`, then
    /// [`DEFAULT_CONFIG_PATHS`]. An explicit path or environment value is
    /// returned even if the file does not exist, so that loading reports it.
    pub fn locate(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if let Ok(path) = env::var(CONFIG_ENV_VAR) {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
            .ok_or(ConfigError::NotFound)
    }

    /// Checks values serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mail.sender.trim().is_empty() {
            return Err(ConfigError::Invalid("mail.sender must not be empty".into()));
        }
        if self.mail.recipients.iter().all(|r| r.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "mail.recipients must list at least one address".into(),
            ));
        }
        if self.digest.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "digest.interval_secs must be greater than zero".into(),
            ));
        }
        if self.server.read_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.read_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.server.max_message_bytes == 0 {
            return Err(ConfigError::Invalid(
                "server.max_message_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Recipients with surrounding whitespace and blank entries removed.
    pub fn recipients(&self) -> Vec<String> {
        self.mail
            .recipients
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No config file found (tried $JOBMAIL_CONFIG, relion-jobmail.toml, /etc/relion-jobmail.toml)")]
    NotFound,

    #[error("Failed to read config {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config {path}: {error}")]
    ParseFile { path: PathBuf, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
