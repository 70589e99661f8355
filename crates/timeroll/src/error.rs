//! Error types.
//!
//! Component errors are precise and carry detail for the log. [`BotError`]
//! folds them into the five categories operators can see, and
//! [`BotError::user_message`] is the only text that ever reaches the chat.

use crate::core::UserId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Category of a failure as seen from the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthorized,
    Validation,
    NotFound,
    Io,
    Publish,
}

/// Reply text is not a valid login time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid login time {input:?}: {reason}")]
pub struct ValidationError {
    pub input: String,
    pub reason: &'static str,
}

/// Registry store failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("alias {0:?} not found in registry")]
    NotFound(String),

    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registry {path} is not a valid device list: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("registry update did not finish within {0:?}")]
    Timeout(Duration),
}

impl RegistryError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RegistryError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// External publish action failures.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    ExitStatus { program: String, status: String },

    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("publish action failed: {0}")]
    Other(String),
}

/// Configuration could not be loaded or is inconsistent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Every failure a conversation can run into.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("user {0} is not on the whitelist")]
    Unauthorized(UserId),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("alias {0:?} not found")]
    NotFound(String),

    #[error(transparent)]
    Io(RegistryError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl From<RegistryError> for BotError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(alias) => BotError::NotFound(alias),
            other => BotError::Io(other),
        }
    }
}

impl BotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BotError::Unauthorized(_) => ErrorKind::Unauthorized,
            BotError::Validation(_) => ErrorKind::Validation,
            BotError::NotFound(_) => ErrorKind::NotFound,
            BotError::Io(_) => ErrorKind::Io,
            BotError::Publish(_) => ErrorKind::Publish,
        }
    }

    /// Text safe to show in the chat. Never includes paths or registry data.
    pub fn user_message(&self) -> String {
        match self {
            BotError::Unauthorized(id) => format!("Your user ID {id} is not on the whitelist"),
            BotError::Validation(_) => {
                "Invalid input. Expected HH:MM:SS.ffffff, use /edit to try again".to_string()
            }
            BotError::NotFound(alias) => {
                format!("Device \"{alias}\" no longer exists, use /edit to pick again")
            }
            BotError::Io(_) => "Something went wrong, the configuration was not changed".to_string(),
            BotError::Publish(_) => "Publishing failed".to_string(),
        }
    }
}
