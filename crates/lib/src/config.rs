//! Configuration types and loading.
//!
//! Agent config is loaded from a JSON file (e.g. `~/.hostguard/config.json`) and environment.
//! Runtime settings that the API can change (post-apply command, API key, toggles) live in
//! the config store instead; see [`crate::store`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Fixed port of the local HTTP control API.
pub const DEFAULT_API_PORT: u16 = 50761;

/// Env var holding the API secret; takes precedence over every stored value.
pub const API_KEY_ENV: &str = "HOSTGUARD_API_KEY";

/// Config store keys.
pub mod keys {
    pub const CMD_AFTER_HOSTS_APPLY: &str = "cmd_after_hosts_apply";
    pub const HTTP_API_KEY: &str = "http_api_key";
    pub const HTTP_API_ON: &str = "http_api_on";
    pub const HTTP_API_ONLY_LOCAL: &str = "http_api_only_local";
}

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP control API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Directory holding `cfgdb.json`. Defaults to the config file's parent.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// HTTP API bind and auth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Port for the HTTP API (default 50761).
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Bind to 127.0.0.1 only (default). When false, binds to all interfaces.
    #[serde(default = "default_only_local")]
    pub only_local: bool,

    /// Start the API with `hostguard serve` even when the store toggle is unset.
    #[serde(default)]
    pub enabled: bool,

    /// API secret. Overridden by HOSTGUARD_API_KEY env; the store's `http_api_key` is the fallback.
    pub key: Option<String>,
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_only_local() -> bool {
    true
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            only_local: default_only_local(),
            enabled: false,
            key: None,
        }
    }
}

/// Read a non-blank value from the environment. Non-blank values are kept byte-for-byte.
pub fn env_token(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|s| !s.trim().is_empty())
}

/// Resolve the API key from env or config file (store fallback is applied by the auth gate).
pub fn resolve_api_key(config: &Config) -> Option<String> {
    env_token(API_KEY_ENV).or_else(|| {
        config
            .api
            .key
            .clone()
            .filter(|s| !s.trim().is_empty())
    })
}

/// Bind address for the HTTP API: loopback when `only_local`, all interfaces otherwise.
pub fn bind_ip(only_local: bool) -> std::net::IpAddr {
    if only_local {
        std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
    } else {
        std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("HOSTGUARD_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".hostguard").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used (for resolving the data directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Resolve the data directory: `dataDir` if set (relative paths resolved against the config file's parent), otherwise the parent itself.
pub fn resolve_data_dir(config: &Config, config_path: &Path) -> PathBuf {
    let config_parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match &config.data_dir {
        Some(d) if !d.as_os_str().is_empty() => {
            if d.is_absolute() {
                d.clone()
            } else {
                config_parent.join(d)
            }
        }
        _ => config_parent.to_path_buf(),
    }
}

/// Path of the config store file inside the data directory.
pub fn store_path(config: &Config, config_path: &Path) -> PathBuf {
    resolve_data_dir(config, config_path).join("cfgdb.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_api_port_and_bind() {
        let a = ApiConfig::default();
        assert_eq!(a.port, 50761);
        assert!(a.only_local);
        assert!(!a.enabled);
        assert_eq!(bind_ip(true).to_string(), "127.0.0.1");
        assert_eq!(bind_ip(false).to_string(), "0.0.0.0");
    }

    #[test]
    fn parses_camel_case_file() {
        let c: Config =
            serde_json::from_str(r#"{"api":{"port":8080,"onlyLocal":false,"key":"  s3cret "}}"#)
                .unwrap();
        assert_eq!(c.api.port, 8080);
        assert!(!c.api.only_local);
        assert_eq!(c.api.key.as_deref(), Some("  s3cret "));
    }

    #[test]
    fn resolve_data_dir_default() {
        let config = Config::default();
        let path = Path::new("/home/user/.hostguard/config.json");
        assert_eq!(
            resolve_data_dir(&config, path),
            PathBuf::from("/home/user/.hostguard")
        );
        assert_eq!(
            store_path(&config, path),
            PathBuf::from("/home/user/.hostguard/cfgdb.json")
        );
    }

    #[test]
    fn resolve_data_dir_override_relative() {
        let mut config = Config::default();
        config.data_dir = Some(PathBuf::from("data"));
        let path = Path::new("/home/user/.hostguard/config.json");
        assert_eq!(
            resolve_data_dir(&config, path),
            PathBuf::from("/home/user/.hostguard/data")
        );
    }

    #[test]
    fn resolve_data_dir_override_absolute() {
        let mut config = Config::default();
        config.data_dir = Some(PathBuf::from("/var/lib/hostguard"));
        let path = Path::new("/home/user/.hostguard/config.json");
        assert_eq!(
            resolve_data_dir(&config, path),
            PathBuf::from("/var/lib/hostguard")
        );
    }

    #[test]
    fn env_token_ignores_blank() {
        let var = format!("HOSTGUARD_TEST_{}", uuid::Uuid::new_v4().simple());
        assert_eq!(env_token(&var), None);
        std::env::set_var(&var, "   ");
        assert_eq!(env_token(&var), None);
        std::env::set_var(&var, " abc ");
        assert_eq!(env_token(&var), Some(" abc ".to_string()));
        std::env::remove_var(&var);
    }
}
