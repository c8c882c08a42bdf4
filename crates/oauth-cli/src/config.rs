//! Thin CLI-side config layer: built-in defaults -> config file -> env vars -> flags.
//!
//! `CliConfig` holds one `ProviderConfig` entry per provider id, loaded from and saved back to a
//! JSON file under `$XDG_CONFIG_HOME`.

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub authorization_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub device_authorization_url: Option<String>,
    #[serde(default)]
    pub revocation_url: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    let base = if let Ok(v) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(v)
    } else {
        let home = std::env::var("HOME").context("HOME is not set")?;
        PathBuf::from(home).join(".config")
    };
    Ok(base.join("oauth-cli").join("config.json"))
}

pub fn default_token_store_dir() -> anyhow::Result<PathBuf> {
    let base = if let Ok(v) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(v)
    } else {
        let home = std::env::var("HOME").context("HOME is not set")?;
        PathBuf::from(home).join(".local").join("share")
    };
    Ok(base.join("oauth-cli").join("tokens"))
}

pub fn load_config(path: &Path) -> anyhow::Result<CliConfig> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CliConfig::default()),
        Err(e) => return Err(e).with_context(|| format!("read config {}", path.display())),
    };
    let cfg: CliConfig =
        serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(path: &Path, cfg: &CliConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let bytes = serde_json::to_vec_pretty(cfg).context("serialize config as json")?;
    std::fs::write(path, bytes).with_context(|| format!("write config {}", path.display()))?;
    Ok(())
}

/// Environment variable overrides for `provider_id`, following the `<PROVIDER>_*` pattern
/// (e.g. `ACME_CLIENT_ID`, `ACME_CLIENT_SECRET`).
pub fn env_overrides(provider_id: &str) -> ProviderConfig {
    let prefix = provider_id.to_uppercase().replace('-', "_");
    let var = |suffix: &str| std::env::var(format!("{prefix}_{suffix}")).ok();
    ProviderConfig {
        display_name: None,
        authorization_url: var("AUTHORIZATION_URL"),
        token_url: var("TOKEN_URL"),
        device_authorization_url: var("DEVICE_AUTHORIZATION_URL"),
        revocation_url: var("REVOCATION_URL"),
        jwks_uri: var("JWKS_URI"),
        client_id: var("CLIENT_ID"),
        client_secret: var("CLIENT_SECRET"),
        redirect_uri: var("REDIRECT_URI"),
        scope: var("SCOPE"),
    }
}

/// Layer `override_cfg` on top of `base`, keeping `base`'s fields where the override is absent.
pub fn merge(base: ProviderConfig, over: ProviderConfig) -> ProviderConfig {
    ProviderConfig {
        display_name: over.display_name.or(base.display_name),
        authorization_url: over.authorization_url.or(base.authorization_url),
        token_url: over.token_url.or(base.token_url),
        device_authorization_url: over.device_authorization_url.or(base.device_authorization_url),
        revocation_url: over.revocation_url.or(base.revocation_url),
        jwks_uri: over.jwks_uri.or(base.jwks_uri),
        client_id: over.client_id.or(base.client_id),
        client_secret: over.client_secret.or(base.client_secret),
        redirect_uri: over.redirect_uri.or(base.redirect_uri),
        scope: over.scope.or(base.scope),
    }
}
