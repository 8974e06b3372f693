//! Typed error hierarchy for the AI OS back-end.
//!
//! Three top-level enums cover the three subsystems:
//! - `DesktopError`: storage, file system and API failures
//! - `AiError`: language model backend failures
//! - `ConfigError`: configuration loading and validation failures

use thiserror::Error;

/// Errors from the desktop storage and API subsystem.
#[derive(Debug, Error)]
pub enum DesktopError {
    #[error("File {id} not found")]
    FileNotFound { id: i64 },

    #[error("Chat session {id} not found")]
    ChatSessionNotFound { id: i64 },

    #[error("Terminal session {id} not found")]
    TerminalSessionNotFound { id: i64 },

    #[error("Permission {id} not found")]
    PermissionNotFound { id: i64 },

    #[error("User {id} not found")]
    UserNotFound { id: String },

    #[error("Invalid {field} '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl DesktopError {
    /// Whether this error means the addressed row does not exist for the caller.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::FileNotFound { .. }
                | Self::ChatSessionNotFound { .. }
                | Self::TerminalSessionNotFound { .. }
                | Self::PermissionNotFound { .. }
                | Self::UserNotFound { .. }
        )
    }
}

/// Errors from the language model integration.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI backend is not configured")]
    NotConfigured,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed model reply: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("API error [{status}]: {message}")]
    Api { status: u16, message: String },

    #[error("Model returned an empty reply")]
    EmptyReply,
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
