//! Layered configuration for the conductor.
//!
//! Values come from `conductor.toml` (every field optional), then the
//! environment, then CLI flags applied by the binary.
//!
//! # Configuration File Format
//!
//! ```toml
//! [database]
//! path = ".conductor/conductor.db"
//!
//! [lock]
//! ttl_secs = 30
//!
//! [frontier]
//! stale_after_secs = 300
//!
//! [dispatch]
//! reentry_url = "http://127.0.0.1:8787/internal/tick"
//! max_attempts = 3
//! base_backoff_ms = 500
//! max_jitter_ms = 250
//! request_timeout_secs = 10
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8787
//! ```
//!
//! The re-entry bearer token is never read from the file; it comes from
//! `CONDUCTOR_REENTRY_TOKEN` only.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DB_PATH: &str = "CONDUCTOR_DB_PATH";
pub const ENV_REENTRY_URL: &str = "CONDUCTOR_REENTRY_URL";
pub const ENV_REENTRY_TOKEN: &str = "CONDUCTOR_REENTRY_TOKEN";

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "conductor.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".conductor/conductor.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease length for a tick's per-job lock.
    #[serde(default = "default_lock_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_lock_ttl_secs() -> u64 {
    30
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_lock_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierConfig {
    /// An in_progress unit untouched for this long is considered abandoned.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_stale_after_secs() -> u64 {
    300
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_reentry_url")]
    pub reentry_url: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_reentry_url() -> String {
    "http://127.0.0.1:8787/internal/tick".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_jitter_ms() -> u64 {
    250
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            reentry_url: default_reentry_url(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_jitter_ms: default_max_jitter_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl DispatchConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Root of `conductor.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConductorConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub frontier: FrontierConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl ConductorConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse conductor.toml")
    }

    /// Load from `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load the file, then apply environment overrides.
    pub fn resolve(path: &Path) -> Result<Self> {
        let mut config = Self::load_or_default(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides through `lookup` so tests never have to
    /// mutate the process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH).filter(|v| !v.is_empty()) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(url) = lookup(ENV_REENTRY_URL).filter(|v| !v.is_empty()) {
            self.dispatch.reentry_url = url;
        }
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock.ttl_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.frontier.stale_after_secs)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.lock.ttl_secs == 0 {
            warnings.push("lock.ttl_secs is 0: every lock expires immediately".to_string());
        }
        if self.frontier.stale_after_secs <= self.lock.ttl_secs {
            warnings.push(format!(
                "frontier.stale_after_secs ({}) should exceed lock.ttl_secs ({}) or live units may be reclaimed",
                self.frontier.stale_after_secs, self.lock.ttl_secs
            ));
        }
        if self.dispatch.max_attempts == 0 {
            warnings.push("dispatch.max_attempts is 0: treated as a single attempt with no retry".to_string());
        }
        if !(self.dispatch.reentry_url.starts_with("http://")
            || self.dispatch.reentry_url.starts_with("https://"))
        {
            warnings.push(format!(
                "dispatch.reentry_url '{}' is not an http(s) URL",
                self.dispatch.reentry_url
            ));
        }

        warnings
    }
}

/// Secrets resolved from the environment, kept apart from the file config.
#[derive(Clone, Default)]
pub struct Credentials {
    pub reentry_token: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            reentry_token: lookup(ENV_REENTRY_TOKEN).filter(|v| !v.is_empty()),
        }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            reentry_token: Some(token.into()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field(
                "reentry_token",
                &self.reentry_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = ConductorConfig::parse("").unwrap();
        assert_eq!(config.lock.ttl_secs, 30);
        assert_eq!(config.frontier.stale_after_secs, 300);
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.database.path, PathBuf::from(".conductor/conductor.db"));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_sections() {
        let config = ConductorConfig::parse(
            r#"
            [lock]
            ttl_secs = 45

            [dispatch]
            base_backoff_ms = 100
            reentry_url = "https://jobs.internal/tick"
            "#,
        )
        .unwrap();
        assert_eq!(config.lock_ttl(), Duration::from_secs(45));
        assert_eq!(config.dispatch.base_backoff(), Duration::from_millis(100));
        assert_eq!(config.dispatch.max_jitter_ms, 250);
        assert_eq!(config.dispatch.reentry_url, "https://jobs.internal/tick");
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        assert!(ConductorConfig::parse("[lock]\nttl_secs = \"soon\"").is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConductorConfig::load_or_default(&dir.path().join("conductor.toml")).unwrap();
        assert_eq!(config.lock.ttl_secs, 30);
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conductor.toml");
        std::fs::write(&path, "[frontier]\nstale_after_secs = 900\n").unwrap();
        let config = ConductorConfig::load(&path).unwrap();
        assert_eq!(config.stale_after(), Duration::from_secs(900));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = ConductorConfig::default();
        let env: HashMap<&str, &str> = [
            (ENV_DB_PATH, "/var/lib/conductor.db"),
            (ENV_REENTRY_URL, "https://edge.example/tick"),
        ]
        .into_iter()
        .collect();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.database.path, PathBuf::from("/var/lib/conductor.db"));
        assert_eq!(config.dispatch.reentry_url, "https://edge.example/tick");
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut config = ConductorConfig::default();
        config.apply_env(|_| Some(String::new()));
        assert_eq!(config.dispatch.reentry_url, default_reentry_url());
    }

    #[test]
    fn test_validate_flags_suspicious_values() {
        let mut config = ConductorConfig::default();
        config.lock.ttl_secs = 0;
        config.dispatch.max_attempts = 0;
        config.frontier.stale_after_secs = 0;
        config.dispatch.reentry_url = "ftp://nope".to_string();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 4, "{:?}", warnings);
    }

    #[test]
    fn test_credentials_from_lookup_and_redacted_debug() {
        let creds = Credentials::from_lookup(|key| {
            (key == ENV_REENTRY_TOKEN).then(|| "s3cret".to_string())
        });
        assert_eq!(creds.reentry_token.as_deref(), Some("s3cret"));
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("redacted"));
        assert!(Credentials::from_lookup(|_| None).reentry_token.is_none());
    }
}
