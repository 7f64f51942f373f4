//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration comes from a TOML file. Every section is optional;
//! missing files or fields fall back to compiled defaults so a fresh install
//! starts without any configuration at all.
//!
//! # Root folder priority
//! 1. Command-line argument (highest priority)
//! 2. `MDASH_ROOT_FOLDER` environment variable
//! 3. `root_folder` in the TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "MDASH_ROOT_FOLDER";

/// Environment variable overriding the log level
pub const LOG_LEVEL_ENV: &str = "MDASH_LOG_LEVEL";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "mdash.db";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Data folder holding the SQLite database
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub sync: SyncConfigSection,

    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub identity: IdentityConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            bind_address: default_bind_address(),
            port: default_port(),
            logging: LoggingConfig::default(),
            cache: CacheConfig::default(),
            sync: SyncConfigSection::default(),
            sources: SourcesConfig::default(),
            identity: IdentityConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Remote-call cache bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
            ttl_seconds: default_cache_ttl_seconds(),
        }
    }
}

/// Sync pacing and scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfigSection {
    /// Largest date range fetched in one adapter call
    #[serde(default = "default_max_chunk_days")]
    pub max_chunk_days: u32,
    /// Delay between consecutive chunk starts
    #[serde(default = "default_chunk_stagger_ms")]
    pub chunk_stagger_ms: u64,
    /// Scheduler wake-up interval
    #[serde(default = "default_scheduler_tick_seconds")]
    pub scheduler_tick_seconds: u64,
    /// Days covered by a scheduled sync (ending today)
    #[serde(default = "default_scheduled_lookback_days")]
    pub scheduled_lookback_days: u32,
    /// Per-adapter request pacing
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

impl Default for SyncConfigSection {
    fn default() -> Self {
        Self {
            max_chunk_days: default_max_chunk_days(),
            chunk_stagger_ms: default_chunk_stagger_ms(),
            scheduler_tick_seconds: default_scheduler_tick_seconds(),
            scheduled_lookback_days: default_scheduled_lookback_days(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

/// External source endpoints and OAuth client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_sheets_base_url")]
    pub sheets_base_url: String,
    #[serde(default = "default_google_token_url")]
    pub sheets_token_url: String,
    #[serde(default)]
    pub sheets_client_id: Option<String>,
    #[serde(default)]
    pub sheets_client_secret: Option<String>,

    #[serde(default = "default_ads_base_url")]
    pub ads_base_url: String,
    #[serde(default = "default_ads_api_version")]
    pub ads_api_version: String,

    #[serde(default = "default_crm_base_url")]
    pub crm_base_url: String,
    #[serde(default = "default_crm_token_url")]
    pub crm_token_url: String,
    #[serde(default)]
    pub crm_client_id: Option<String>,
    #[serde(default)]
    pub crm_client_secret: Option<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            sheets_base_url: default_sheets_base_url(),
            sheets_token_url: default_google_token_url(),
            sheets_client_id: None,
            sheets_client_secret: None,
            ads_base_url: default_ads_base_url(),
            ads_api_version: default_ads_api_version(),
            crm_base_url: default_crm_base_url(),
            crm_token_url: default_crm_token_url(),
            crm_client_id: None,
            crm_client_secret: None,
        }
    }
}

/// Identity stamped on written rows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub user_id: Option<String>,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5740
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cache_max_entries() -> usize {
    100
}

fn default_cache_ttl_seconds() -> u64 {
    300
}

fn default_max_chunk_days() -> u32 {
    30
}

fn default_chunk_stagger_ms() -> u64 {
    250
}

fn default_scheduler_tick_seconds() -> u64 {
    60
}

fn default_scheduled_lookback_days() -> u32 {
    7
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_sheets_base_url() -> String {
    "https://sheets.googleapis.com".to_string()
}

fn default_google_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_ads_base_url() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_ads_api_version() -> String {
    "v19.0".to_string()
}

fn default_crm_base_url() -> String {
    "https://services.leadconnectorhq.com".to_string()
}

fn default_crm_token_url() -> String {
    "https://services.leadconnectorhq.com/oauth/token".to_string()
}

/// Root folder resolution in priority order (see module docs)
pub fn resolve_root_folder(cli_arg: Option<&str>, toml_config: &TomlConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(root) = &toml_config.root_folder {
        return root.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Path of the SQLite database inside a root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join(DATABASE_FILE)
}

/// Effective log level: environment overrides TOML
pub fn resolve_log_level(toml_config: &TomlConfig) -> String {
    std::env::var(LOG_LEVEL_ENV)
        .ok()
        .filter(|level| !level.trim().is_empty())
        .unwrap_or_else(|| toml_config.logging.level.clone())
}

/// Default configuration file path for the platform
///
/// Linux checks `~/.config/mdash/config.toml` then `/etc/mdash/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("mdash").join("config.toml"));

    if let Some(path) = &user_config {
        if path.exists() {
            return user_config;
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/mdash/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Load TOML configuration
///
/// An explicit path must exist and parse. Without one, the platform default is
/// tried; a missing default file yields compiled defaults with a warning.
pub fn load_toml_config(explicit_path: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit_path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) => path,
            None => {
                warn!("No config file found, using built-in defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write TOML configuration atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/mdash (or /var/lib/mdash for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("mdash"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/mdash"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/mdash
        dirs::data_dir()
            .map(|d| d.join("mdash"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/mdash"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\mdash
        dirs::data_local_dir()
            .map(|d| d.join("mdash"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\mdash"))
    } else {
        PathBuf::from("./mdash_data")
    }
}
