//! Flags shared by every subcommand that needs a [`ProviderRecord`], and the layering logic that
//! turns them (plus the config file and `<PROVIDER>_*` env vars) into one.

use crate::config::{self, CliConfig, ProviderConfig};
use anyhow::Context as _;
use clap::{Args, ValueEnum};
use oauth_core::{AuthMethod, PkceMethod, ProviderRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthMethodArg {
    Basic,
    Post,
    ClientSecretJwt,
    PrivateKeyJwt,
    None,
}

impl From<AuthMethodArg> for AuthMethod {
    fn from(value: AuthMethodArg) -> Self {
        match value {
            AuthMethodArg::Basic => Self::Basic,
            AuthMethodArg::Post => Self::Post,
            AuthMethodArg::ClientSecretJwt => Self::ClientSecretJwt,
            AuthMethodArg::PrivateKeyJwt => Self::PrivateKeyJwt,
            AuthMethodArg::None => Self::None,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ProviderArgs {
    /// Stable slug identifying this provider in the token store / config file.
    pub provider: String,

    #[arg(long, env = "OAUTH_CLIENT_ID")]
    pub client_id: Option<String>,
    #[arg(long, env = "OAUTH_CLIENT_SECRET")]
    pub client_secret: Option<String>,
    /// Path to a PEM-encoded private key, for `--auth-method private-key-jwt`.
    #[arg(long)]
    pub private_key_file: Option<std::path::PathBuf>,
    #[arg(long, value_enum)]
    pub auth_method: Option<AuthMethodArg>,

    #[arg(long)]
    pub authorization_url: Option<String>,
    #[arg(long)]
    pub token_url: Option<String>,
    #[arg(long)]
    pub device_authorization_url: Option<String>,
    #[arg(long)]
    pub revocation_url: Option<String>,
    #[arg(long)]
    pub jwks_uri: Option<String>,

    #[arg(long, env = "OAUTH_REDIRECT_URI")]
    pub redirect_uri: Option<String>,
    #[arg(long)]
    pub scope: Option<String>,

    /// Disable PKCE on the Authorization Code flow (not recommended).
    #[arg(long)]
    pub no_pkce: bool,
    /// Permit selecting the deprecated Implicit grant as an interactive default.
    #[arg(long)]
    pub allow_implicit: bool,

    /// Persist the resolved provider fields (minus secrets) to the config file under this name.
    #[arg(long)]
    pub save: Option<String>,
}

const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/callback";

impl ProviderArgs {
    /// Layer built-in defaults -> config file -> `<PROVIDER>_*` env vars -> flags, then validate.
    pub fn resolve(&self, cfg: &CliConfig) -> anyhow::Result<ProviderRecord> {
        let from_config = cfg.providers.get(&self.provider).cloned().unwrap_or_default();
        let from_env = config::env_overrides(&self.provider);
        let merged = config::merge(config::merge(ProviderConfig::default(), from_config), from_env);

        let client_id = self
            .client_id
            .clone()
            .or(merged.client_id)
            .context("missing --client-id (or config/env equivalent)")?;
        let token_url = self
            .token_url
            .clone()
            .or(merged.token_url)
            .context("missing --token-url (or config/env equivalent)")?;
        let private_key = self
            .private_key_file
            .as_ref()
            .map(std::fs::read_to_string)
            .transpose()
            .context("reading --private-key-file")?;
        let client_secret = self.client_secret.clone().or(merged.client_secret);

        let auth_method = match self.auth_method {
            Some(m) => m.into(),
            None if private_key.is_some() => AuthMethod::PrivateKeyJwt,
            None if client_secret.is_some() => AuthMethod::Basic,
            None => AuthMethod::None,
        };

        let record = ProviderRecord {
            id: self.provider.clone(),
            display_name: merged.display_name.unwrap_or_else(|| self.provider.clone()),
            authorization_url: self.authorization_url.clone().or(merged.authorization_url),
            token_url,
            device_authorization_url: self
                .device_authorization_url
                .clone()
                .or(merged.device_authorization_url),
            revocation_url: self.revocation_url.clone().or(merged.revocation_url),
            introspection_url: None,
            userinfo_url: None,
            jwks_uri: self.jwks_uri.clone().or(merged.jwks_uri),
            discovery_url: None,
            client_id,
            client_secret,
            private_key,
            auth_method,
            default_scopes: self
                .scope
                .clone()
                .or(merged.scope)
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            supported_grant_types: Vec::new(),
            pkce_required: !self.no_pkce,
            pkce_methods: vec![PkceMethod::S256],
        };

        for warning in record.validate().context("provider configuration is invalid")? {
            tracing::warn!(provider = %record.id, ?warning, "provider configuration warning");
        }

        if let Some(save_as) = &self.save {
            self.persist(save_as, cfg)?;
        }

        Ok(record)
    }

    pub fn redirect_uri(&self) -> String {
        self.redirect_uri
            .clone()
            .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string())
    }

    pub fn scope(&self) -> Option<String> {
        self.scope.clone()
    }

    fn persist(&self, name: &str, cfg: &CliConfig) -> anyhow::Result<()> {
        let mut cfg = cfg.clone();
        cfg.providers.insert(
            name.to_string(),
            ProviderConfig {
                display_name: None,
                authorization_url: self.authorization_url.clone(),
                token_url: self.token_url.clone(),
                device_authorization_url: self.device_authorization_url.clone(),
                revocation_url: self.revocation_url.clone(),
                jwks_uri: self.jwks_uri.clone(),
                client_id: self.client_id.clone(),
                // Deliberately not persisted: a secret saved in plaintext under $XDG_CONFIG_HOME
                // would defeat the point of the encrypted token store.
                client_secret: None,
                redirect_uri: self.redirect_uri.clone(),
                scope: self.scope.clone(),
            },
        );
        let path = config::default_config_path()?;
        config::save_config(&path, &cfg)
    }
}
