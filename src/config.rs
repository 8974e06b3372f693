//! Unified configuration for the AI OS server.
//!
//! Settings are read from `aios.toml` and layered as file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 5000
//! dev_mode = false
//! static_dir = "client/dist"
//!
//! [database]
//! path = ".aios/aios.db"
//!
//! [ai]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o"
//! timeout_secs = 60
//!
//! [auth]
//! user_id_header = "x-user-id"
//!
//! [logging]
//! level = "info"
//! format = "text"
//! directory = ".aios/logs"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub const CONFIG_FILE_NAME: &str = "aios.toml";

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS and bind on all interfaces
    #[serde(default)]
    pub dev_mode: bool,
    /// Directory holding the built browser client, served as a fallback
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
            static_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".aios/aios.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Language model endpoint settings (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSection {
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    /// Prefer the OPENAI_API_KEY environment variable over storing the key here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ai_model() -> String {
    "gpt-4o".to_string()
}

fn default_ai_timeout_secs() -> u64 {
    60
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            base_url: default_ai_base_url(),
            model: default_ai_model(),
            api_key: None,
            timeout_secs: default_ai_timeout_secs(),
        }
    }
}

/// Names of the identity headers set by the fronting auth proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    #[serde(default = "default_user_id_header")]
    pub user_id_header: String,
    #[serde(default = "default_email_header")]
    pub email_header: String,
    #[serde(default = "default_first_name_header")]
    pub first_name_header: String,
    #[serde(default = "default_last_name_header")]
    pub last_name_header: String,
    #[serde(default = "default_profile_image_header")]
    pub profile_image_header: String,
}

fn default_user_id_header() -> String {
    "x-user-id".to_string()
}

fn default_email_header() -> String {
    "x-user-email".to_string()
}

fn default_first_name_header() -> String {
    "x-user-first-name".to_string()
}

fn default_last_name_header() -> String {
    "x-user-last-name".to_string()
}

fn default_profile_image_header() -> String {
    "x-user-profile-image-url".to_string()
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            user_id_header: default_user_id_header(),
            email_header: default_email_header(),
            first_name_header: default_first_name_header(),
            last_name_header: default_last_name_header(),
            profile_image_header: default_profile_image_header(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive; RUST_LOG takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// When set, logs are also written to a daily rolling file here
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            directory: None,
        }
    }
}

/// Root of `aios.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiosConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub ai: AiSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl AiosConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from(CONFIG_FILE_NAME),
            source,
        })
    }

    /// Resolve the config file: explicit path, then `./aios.toml`, then the
    /// user config directory. Returns `None` when none exists.
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("aios").join(CONFIG_FILE_NAME))
            .filter(|p| p.exists())
    }

    /// Load from the located file (or defaults) and apply environment overrides.
    pub fn load_layered(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match Self::locate(explicit) {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides. The lookup is injected so tests do not
    /// have to mutate the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("AIOS_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "AIOS_PORT".to_string(),
                message: format!("'{}' is not a valid port", port),
            })?;
        }
        if let Some(path) = lookup("AIOS_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            self.ai.api_key = Some(key);
        }
        if let Some(model) = lookup("AIOS_AI_MODEL") {
            self.ai.model = model;
        }
        if let Some(url) = lookup("AIOS_AI_BASE_URL") {
            self.ai.base_url = url;
        }
        if let Some(level) = lookup("AIOS_LOG") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;
        let content = toml::to_string_pretty(self).context("Failed to serialize aios.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn ai_enabled(&self) -> bool {
        self.ai.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Return human-readable warnings; an empty list means the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; the OS will pick a random port".to_string());
        }
        if let Some(dir) = self.server.static_dir.as_ref().filter(|d| !d.exists()) {
            warnings.push(format!(
                "server.static_dir '{}' does not exist; the client will not be served",
                dir.display()
            ));
        }
        if !self.ai.base_url.starts_with("http://") && !self.ai.base_url.starts_with("https://") {
            warnings.push(format!(
                "ai.base_url '{}' must start with http:// or https://",
                self.ai.base_url
            ));
        }
        if self.ai.timeout_secs == 0 {
            warnings.push("ai.timeout_secs is 0; AI requests will fail immediately".to_string());
        }
        if !self.ai_enabled() {
            warnings.push(
                "No AI API key configured (set OPENAI_API_KEY); AI features will return fallbacks"
                    .to_string(),
            );
        }
        if self.auth.user_id_header.trim().is_empty() {
            warnings.push("auth.user_id_header must not be empty".to_string());
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!(
                "logging.level '{}' is not a valid filter directive",
                self.logging.level
            ));
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_empty() {
        let config = AiosConfig::parse("").unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.database.path, PathBuf::from(".aios/aios.db"));
        assert_eq!(config.ai.model, "gpt-4o");
        assert_eq!(config.auth.user_id_header, "x-user-id");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_parse_sections() {
        let config = AiosConfig::parse(
            r#"
            [server]
            port = 8080
            dev_mode = true

            [ai]
            model = "gpt-4o-mini"
            timeout_secs = 5

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(config.server.dev_mode);
        assert_eq!(config.ai.model, "gpt-4o-mini");
        assert_eq!(config.ai.timeout_secs, 5);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = AiosConfig::parse("[server\nport = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AiosConfig::default();
        config
            .apply_env(env_from(&[
                ("AIOS_PORT", "9000"),
                ("AIOS_DB_PATH", "/tmp/x.db"),
                ("OPENAI_API_KEY", "sk-test"),
                ("AIOS_AI_MODEL", "local-model"),
            ]))
            .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.ai.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.ai.model, "local-model");
        assert!(config.ai_enabled());
    }

    #[test]
    fn test_env_override_invalid_port() {
        let mut config = AiosConfig::default();
        let err = config
            .apply_env(env_from(&[("AIOS_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_empty_api_key_is_ignored() {
        let mut config = AiosConfig::default();
        config
            .apply_env(env_from(&[("OPENAI_API_KEY", "")]))
            .unwrap();
        assert!(!config.ai_enabled());
    }

    #[test]
    fn test_validate_defaults_warns_about_missing_key_only() {
        let warnings = AiosConfig::default().validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_validate_flags_bad_values() {
        let mut config = AiosConfig::default();
        config.ai.api_key = Some("sk".into());
        config.ai.base_url = "ftp://example".into();
        config.ai.timeout_secs = 0;
        config.auth.user_id_header = " ".into();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 3);
    }

    #[test]
    fn test_load_and_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = AiosConfig::default();
        config.server.port = 7777;
        config.save(&path).unwrap();

        let loaded = AiosConfig::load(&path).unwrap();
        assert_eq!(loaded.server.port, 7777);
    }

    #[test]
    fn test_locate_prefers_explicit_path() {
        let explicit = PathBuf::from("/nonexistent/custom.toml");
        assert_eq!(AiosConfig::locate(Some(&explicit)), Some(explicit));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AiosConfig::load(Path::new("/nonexistent/aios.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
