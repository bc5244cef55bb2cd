//! Application configuration for ContactLink.
//!
//! User config lives at `~/.contactlink/contactlink.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ContactLinkError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "contactlink.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".contactlink";

// ---------------------------------------------------------------------------
// Config structs (matching contactlink.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Contact database location.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Consolidation engine tuning.
    #[serde(default)]
    pub engine: EngineSection,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the libSQL database file. A leading `~/` is expanded.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.contactlink/contacts.db".into()
}

/// `[engine]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Upper bound on any single store call.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Attempts allowed when a merge loses a race.
    #[serde(default = "default_merge_retries")]
    pub merge_retries: u32,

    /// Number of identifier lock shards.
    #[serde(default = "default_lock_shards")]
    pub lock_shards: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            store_timeout_ms: default_store_timeout_ms(),
            merge_retries: default_merge_retries(),
            lock_shards: default_lock_shards(),
        }
    }
}

fn default_store_timeout_ms() -> u64 {
    5_000
}
fn default_merge_retries() -> u32 {
    3
}
fn default_lock_shards() -> usize {
    64
}

impl AppConfig {
    /// Resolved database path with `~/` expanded against the home directory.
    pub fn database_path(&self) -> Result<PathBuf> {
        expand_home(&self.database.path)
    }
}

fn expand_home(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| ContactLinkError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

// ---------------------------------------------------------------------------
// Engine config (runtime, derived from AppConfig)
// ---------------------------------------------------------------------------

/// Runtime engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound applied to every store call.
    pub store_timeout: Duration,
    /// Total resolve attempts when merges conflict (at least 1).
    pub merge_retries: u32,
    /// Identifier lock shard count (at least 1).
    pub lock_shards: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for EngineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            store_timeout: Duration::from_millis(config.engine.store_timeout_ms),
            merge_retries: config.engine.merge_retries.max(1),
            lock_shards: config.engine.lock_shards.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.contactlink/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ContactLinkError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.contactlink/contactlink.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ContactLinkError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ContactLinkError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ContactLinkError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ContactLinkError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ContactLinkError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("store_timeout_ms"));
        assert!(toml_str.contains("contacts.db"));
    }

    #[test]
    fn partial_engine_section_keeps_defaults() {
        let toml_str = r#"
[database]
path = "/tmp/contacts.db"

[engine]
merge_retries = 5
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.engine.merge_retries, 5);
        assert_eq!(config.engine.lock_shards, 64);
        assert_eq!(
            config.database_path().expect("path"),
            PathBuf::from("/tmp/contacts.db")
        );
    }

    #[test]
    fn engine_config_clamps_zero_values() {
        let mut app = AppConfig::default();
        app.engine.merge_retries = 0;
        app.engine.lock_shards = 0;
        let engine = EngineConfig::from(&app);
        assert_eq!(engine.merge_retries, 1);
        assert_eq!(engine.lock_shards, 1);
        assert_eq!(engine.store_timeout, Duration::from_secs(5));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let path = std::env::temp_dir().join("contactlink-definitely-missing.toml");
        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, ContactLinkError::Io { .. }));
    }
}
