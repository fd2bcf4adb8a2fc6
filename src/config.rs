//! Runtime configuration. Loaded from a TOML file and overridden by
//! `FOLIOFOX_`-prefixed environment variables, following the config layout
//! enumerated in the external-interfaces section of the specification.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout_s")]
    pub request_timeout_s: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8787
}
fn default_request_timeout_s() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_s: default_request_timeout_s(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path or DSN for the durable store. A bare filesystem path is treated
    /// as a SQLite database file.
    #[serde(default = "default_store_dsn")]
    pub dsn: String,
}

fn default_store_dsn() -> String {
    "foliofox.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dsn: default_store_dsn(),
        }
    }
}

/// Fast key/value cache collaborator. Absence must never break the system —
/// the durable cache tier is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FastCacheConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db: Option<u8>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    #[serde(default = "default_fast_cache_cap_mb")]
    pub cap_mb: u64,
}

fn default_fast_cache_cap_mb() -> u64 {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(skip_serializing)]
    pub shared_secret: String,
    #[serde(default = "default_token_ttl_s")]
    pub token_ttl_s: u64,
}

fn default_token_ttl_s() -> u64 {
    3600
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            shared_secret: String::new(),
            token_ttl_s: default_token_ttl_s(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadsConfig {
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent: usize,
    #[serde(default = "default_download_timeout_s")]
    pub default_timeout_s: u64,
    #[serde(default = "default_max_retries")]
    pub default_retries: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
    /// Which backend `download_client` hands transfers off to: `qbittorrent`
    /// or `torrserver`.
    #[serde(default = "default_backend_kind")]
    pub backend_kind: String,
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default)]
    pub backend_username: Option<String>,
    #[serde(default, skip_serializing)]
    pub backend_password: Option<String>,
}

fn default_backend_kind() -> String {
    "qbittorrent".to_string()
}
fn default_backend_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_max_concurrent_downloads() -> usize {
    3
}
fn default_download_timeout_s() -> u64 {
    600
}
fn default_max_retries() -> u32 {
    3
}
fn default_user_agent() -> String {
    "foliofox/0.1".to_string()
}
fn default_base_dir() -> String {
    "./downloads".to_string()
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent_downloads(),
            default_timeout_s: default_download_timeout_s(),
            default_retries: default_max_retries(),
            user_agent: default_user_agent(),
            base_dir: default_base_dir(),
            backend_kind: default_backend_kind(),
            backend_url: default_backend_url(),
            backend_username: None,
            backend_password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_cache_ttl_minutes")]
    pub cache_ttl_minutes: i64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_search_timeout_s")]
    pub timeout_s: u64,
    #[serde(default = "default_max_concurrent_searches")]
    pub max_concurrent: usize,
}

fn default_cache_ttl_minutes() -> i64 {
    60
}
fn default_max_results() -> usize {
    500
}
fn default_search_timeout_s() -> u64 {
    20
}
fn default_max_concurrent_searches() -> usize {
    2 * num_cpus()
}
fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            cache_ttl_minutes: default_cache_ttl_minutes(),
            max_results: default_max_results(),
            timeout_s: default_search_timeout_s(),
            max_concurrent: default_max_concurrent_searches(),
        }
    }
}

/// A statically configured backend (e.g. a Prowlarr or Jackett install) the
/// indexer registry can register adapters for at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    pub kind: String,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_s")]
    pub timeout_s: u64,
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: u32,
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u32,
}

fn default_rate_limit_requests() -> u32 {
    1
}
fn default_rate_limit_window() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub fast_cache: FastCacheConfig,
    #[serde(default)]
    pub logging_level: Option<String>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub downloads: DownloadsConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    /// Directory of Cardigann-style YAML indexer definitions to register as
    /// HTML/direct-scraper adapters, if set.
    #[serde(default)]
    pub indexer_definitions_dir: Option<String>,
    /// Arbitrary raw keys preserved for the unknown-option warning pass.
    #[serde(skip)]
    pub raw_keys: Vec<String>,
}

impl Config {
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        let path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path()?,
        };

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path).context("failed to read config file")?;
            Self::parse_with_unknown_key_warning(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn parse_with_unknown_key_warning(content: &str) -> Result<Config> {
        let known: &[&str] = &[
            "server",
            "store",
            "fast_cache",
            "logging_level",
            "auth",
            "downloads",
            "search",
            "backends",
            "indexer_definitions_dir",
        ];
        if let Ok(raw) = toml::from_str::<toml::Value>(content)
            && let Some(table) = raw.as_table()
        {
            for key in table.keys() {
                if !known.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "ignoring unknown configuration option");
                }
            }
        }
        toml::from_str(content).context("failed to parse config file")
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("FOLIOFOX_SERVER_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("FOLIOFOX_SERVER_PORT")
            && let Ok(port) = v.parse()
        {
            self.server.port = port;
        }
        if let Ok(v) = std::env::var("FOLIOFOX_STORE_DSN") {
            self.store.dsn = v;
        }
        if let Ok(v) = std::env::var("FOLIOFOX_AUTH_SHARED_SECRET") {
            self.auth.shared_secret = v;
        }
        if let Ok(v) = std::env::var("FOLIOFOX_LOG_LEVEL") {
            self.logging_level = Some(v);
        }
        if let Ok(v) = std::env::var("FOLIOFOX_DOWNLOADS_BASE_DIR") {
            self.downloads.base_dir = v;
        }
        if let Ok(v) = std::env::var("FOLIOFOX_DOWNLOADS_BACKEND_URL") {
            self.downloads.backend_url = v;
        }
        if let Ok(v) = std::env::var("FOLIOFOX_DOWNLOADS_BACKEND_PASSWORD") {
            self.downloads.backend_password = Some(v);
        }
    }

    pub fn save(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "foliofox", "foliofox")
            .context("could not determine config directory")?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}

/// Settings the CLI/API layer may override at runtime but never persists,
/// kept as a bag rather than typed fields to match the "unknown options are
/// ignored with a warning" contract for forward-compatible deployments.
pub type OverlaySettings = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_sane_bounds() {
        let config = Config::default();
        assert!(config.search.max_concurrent >= 1);
        assert_eq!(config.downloads.max_concurrent, 3);
    }

    #[test]
    fn test_parse_warns_on_unknown_key_but_still_parses() {
        let toml_str = "logging_level = \"debug\"\nnonexistent_section = true\n";
        let config = Config::parse_with_unknown_key_warning(toml_str).unwrap();
        assert_eq!(config.logging_level.as_deref(), Some("debug"));
    }
}
