//! Initialize the configuration directory: create ~/.hostguard, default config, config store,
//! and a random API key.

use anyhow::{Context, Result};
use base64::Engine;
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::config::{self, keys};
use crate::store::{secret_value, CfgDb, ConfigStore};

const API_KEY_BYTES: usize = 32;

/// Generate a random URL-safe API key.
pub fn generate_api_key() -> Result<String> {
    let mut bytes = [0u8; API_KEY_BYTES];
    getrandom::getrandom(&mut bytes).map_err(|e| anyhow::anyhow!("getrandom: {}", e))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Create the config directory and default files if they do not exist.
/// - Writes `config.json` with `{}` if missing.
/// - Creates `cfgdb.json` under the data dir and stores a generated `http_api_key` unless one exists.
///
/// Returns the config directory.
pub async fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let store_path = config::store_path(&config, config_path);
    let store = CfgDb::load(&store_path).await;
    let existing = store
        .get(keys::HTTP_API_KEY)
        .await
        .context("reading http_api_key")?;
    if secret_value(existing.as_ref()).is_none() {
        let key = generate_api_key()?;
        store
            .set(keys::HTTP_API_KEY, Value::String(key))
            .await
            .with_context(|| format!("writing config store {}", store_path.display()))?;
        log::info!("generated API key in {}", store_path.display());
    } else {
        log::debug!("API key already present in {}, skipping", store_path.display());
    }

    Ok(config_dir.to_path_buf())
}
