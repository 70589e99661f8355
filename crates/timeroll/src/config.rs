//! Process configuration.
//!
//! Loaded once at start-up and shared read-only behind an `Arc`.
//!
//! ```toml
//! registry_path = "devices.json"
//! backup_dir = "backup_config_jsons"
//! pending_ttl_secs = 600
//!
//! [publish]
//! program = "bash"
//! args = ["push_changes_to_github.sh"]
//! interval_secs = 3600
//! public_url = "https://example.github.io/site/devices.json"
//!
//! [[users]]
//! id = 1761200689
//! name = "Howard"
//!
//! [telegram]
//! token_env = "TIMEROLL_TELEGRAM_TOKEN"
//! ```

use crate::core::UserId;
use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Operator allowed to use the bot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthorizedUser {
    pub id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_publish_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_publish_timeout")]
    pub timeout_secs: u64,
    /// Where operators can see published changes.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl PublishConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelegramConfig {
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BotConfig {
    pub registry_path: PathBuf,
    pub backup_dir: PathBuf,
    #[serde(default = "default_pending_ttl")]
    pub pending_ttl_secs: u64,
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
    /// How often background maintenance runs (expired prompts, deferred publish).
    #[serde(default = "default_check_every")]
    pub check_every_secs: u64,
    pub publish: PublishConfig,
    pub users: Vec<AuthorizedUser>,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

fn default_publish_interval() -> u64 {
    3600
}

fn default_publish_timeout() -> u64 {
    120
}

fn default_pending_ttl() -> u64 {
    600
}

fn default_io_timeout() -> u64 {
    10
}

fn default_check_every() -> u64 {
    60
}

fn default_token_env() -> String {
    "TIMEROLL_TELEGRAM_TOKEN".to_string()
}

fn default_poll_timeout() -> u64 {
    30
}

impl BotConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: BotConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.users.is_empty() {
            return Err(ConfigError::Invalid("at least one user is required".into()));
        }
        let mut seen = HashSet::new();
        for user in &self.users {
            if !seen.insert(user.id) {
                return Err(ConfigError::Invalid(format!("duplicate user id {}", user.id)));
            }
        }
        if self.publish.program.trim().is_empty() {
            return Err(ConfigError::Invalid("publish.program must not be empty".into()));
        }
        if self.publish.interval_secs == 0 {
            return Err(ConfigError::Invalid("publish.interval_secs must be positive".into()));
        }
        if self.pending_ttl_secs == 0 {
            return Err(ConfigError::Invalid("pending_ttl_secs must be positive".into()));
        }
        if self.check_every_secs == 0 {
            return Err(ConfigError::Invalid("check_every_secs must be positive".into()));
        }
        if self.registry_path.file_name().is_none() {
            return Err(ConfigError::Invalid("registry_path must name a file".into()));
        }
        Ok(())
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn check_every(&self) -> Duration {
        Duration::from_secs(self.check_every_secs)
    }
}
