//! Provider config: the normalised, validated provider record consumed by client auth and the
//! grant-flow engine.
//!
//! The actual YAML/JSON provider catalog loader is an external collaborator, out of scope here;
//! this module only owns the in-memory shape and its schema-level validation.

use crate::error::{AuthMethod, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// OAuth grant types the engine knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    ClientCredentials,
    Password,
    DeviceCode,
    Implicit,
    RefreshToken,
}

/// PKCE code-challenge methods. `plain` is never accepted (RFC 9700); the enum has a single
/// member so a provider record can only ever advertise `S256`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PkceMethod {
    S256,
}

/// Identity and endpoints for one OAuth/OIDC provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRecord {
    pub id: String,
    pub display_name: String,

    pub authorization_url: Option<String>,
    pub token_url: String,
    pub device_authorization_url: Option<String>,
    pub revocation_url: Option<String>,
    pub introspection_url: Option<String>,
    pub userinfo_url: Option<String>,
    pub jwks_uri: Option<String>,
    pub discovery_url: Option<String>,

    pub client_id: String,
    pub client_secret: Option<String>,
    /// PEM-encoded private key, used for `private_key_jwt`.
    pub private_key: Option<String>,

    pub auth_method: AuthMethod,

    #[serde(default)]
    pub default_scopes: Vec<String>,
    #[serde(default)]
    pub supported_grant_types: Vec<GrantType>,

    #[serde(default)]
    pub pkce_required: bool,
    #[serde(default)]
    pub pkce_methods: Vec<PkceMethod>,
}

/// A non-fatal observation surfaced to the caller/CLI, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    NonHttpsUrl(String),
    AdvertisesImplicit,
    AuthorizationCodeWithoutPkce,
}

impl ProviderRecord {
    /// Schema-level validation.
    ///
    /// Returns warnings alongside `Ok(())`; hard errors are returned as `Err`.
    pub fn validate(&self) -> Result<Vec<Warning>> {
        let mut warnings = Vec::new();

        if self.id.trim().is_empty() {
            return Err(Error::BadUrl("provider.id".into(), "must be non-empty".into()));
        }
        if self.token_url.trim().is_empty() {
            return Err(Error::ProviderMissingEndpoint(self.id.clone(), "token_url"));
        }
        check_url(&self.id, &self.token_url, &mut warnings)?;

        let interactive = self.supported_grant_types.iter().any(|g| {
            matches!(g, GrantType::AuthorizationCode | GrantType::Implicit)
        });
        if interactive && self.authorization_url.is_none() {
            return Err(Error::ProviderMissingEndpoint(
                self.id.clone(),
                "authorization_url",
            ));
        }
        if let Some(url) = &self.authorization_url {
            check_url(&self.id, url, &mut warnings)?;
        }
        for (url, name) in [
            (&self.device_authorization_url, "device_authorization_url"),
            (&self.revocation_url, "revocation_url"),
            (&self.introspection_url, "introspection_url"),
            (&self.userinfo_url, "userinfo_url"),
            (&self.jwks_uri, "jwks_uri"),
            (&self.discovery_url, "discovery_url"),
        ] {
            if let Some(url) = url {
                let _ = name;
                check_url(&self.id, url, &mut warnings)?;
            }
        }

        let needs_secret = matches!(
            self.auth_method,
            AuthMethod::Basic | AuthMethod::Post | AuthMethod::ClientSecretJwt
        );
        if needs_secret && self.client_secret.is_none() {
            return Err(Error::MissingCredential(self.auth_method));
        }
        if matches!(self.auth_method, AuthMethod::PrivateKeyJwt) && self.private_key.is_none() {
            return Err(Error::MissingCredential(self.auth_method));
        }

        let methods: HashSet<PkceMethod> = self.pkce_methods.iter().copied().collect();
        if !methods.is_empty() && methods != HashSet::from([PkceMethod::S256]) {
            return Err(Error::PkceMethodUnsupported(
                "only S256 is accepted".into(),
            ));
        }

        if self
            .supported_grant_types
            .contains(&GrantType::Implicit)
        {
            warnings.push(Warning::AdvertisesImplicit);
        }
        if self
            .supported_grant_types
            .contains(&GrantType::AuthorizationCode)
            && !self.pkce_required
        {
            warnings.push(Warning::AuthorizationCodeWithoutPkce);
        }

        Ok(warnings)
    }
}

fn check_url(provider_id: &str, raw: &str, warnings: &mut Vec<Warning>) -> Result<()> {
    let url = url::Url::parse(raw)
        .map_err(|e| Error::BadUrl(format!("{provider_id}: {raw}"), e.to_string()))?;
    if url.scheme() != "https" {
        warnings.push(Warning::NonHttpsUrl(raw.to_string()));
    }
    Ok(())
}
