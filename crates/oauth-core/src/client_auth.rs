//! Client-authentication engine: applies one of five auth methods to an outgoing token
//! request, per RFC 6749 §2.3 and RFC 7523.

use crate::crypto::{JwsAlg, KeyMaterial, jws_sign, random_state};
use crate::error::{AuthMethod, Error, Result};
use crate::provider::ProviderRecord;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use std::time::{SystemTime, UNIX_EPOCH};

/// A request in progress: the form body and headers that will be POSTed to the token endpoint.
#[derive(Debug, Clone, Default)]
pub struct TokenRequest {
    pub form: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl TokenRequest {
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.form.push((key.into(), value.into()));
    }
}

const JWT_BEARER_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 60;

/// Preference order used when a provider advertises more than one supported method:
/// `private_key_jwt > client_secret_jwt > basic > post > none`, skipping methods whose
/// credentials are missing.
#[must_use]
pub fn preferred_method(provider: &ProviderRecord) -> AuthMethod {
    let candidates = [
        AuthMethod::PrivateKeyJwt,
        AuthMethod::ClientSecretJwt,
        AuthMethod::Basic,
        AuthMethod::Post,
    ];
    for method in candidates {
        if has_credentials(provider, method) {
            return method;
        }
    }
    AuthMethod::None
}

fn has_credentials(provider: &ProviderRecord, method: AuthMethod) -> bool {
    match method {
        AuthMethod::PrivateKeyJwt => provider.private_key.is_some(),
        AuthMethod::ClientSecretJwt | AuthMethod::Basic | AuthMethod::Post => {
            provider.client_secret.is_some()
        }
        AuthMethod::None => true,
    }
}

/// Apply `provider`'s configured (or preferred) client authentication to `request`.
pub fn apply(request: &mut TokenRequest, provider: &ProviderRecord) -> Result<()> {
    let method = if has_credentials(provider, provider.auth_method) {
        provider.auth_method
    } else {
        // Degrade gracefully rather than fail outright when, e.g., `basic` was configured but no
        // secret is present.
        tracing::warn!(
            provider = %provider.id,
            configured = ?provider.auth_method,
            "client credential missing for configured auth method; degrading to none"
        );
        AuthMethod::None
    };

    match method {
        AuthMethod::Basic => apply_basic(request, provider),
        AuthMethod::Post => apply_post(request, provider),
        AuthMethod::ClientSecretJwt => apply_client_secret_jwt(request, provider),
        AuthMethod::PrivateKeyJwt => apply_private_key_jwt(request, provider),
        AuthMethod::None => {
            request.push("client_id", provider.client_id.clone());
            Ok(())
        }
    }
}

fn apply_basic(request: &mut TokenRequest, provider: &ProviderRecord) -> Result<()> {
    let secret = provider
        .client_secret
        .as_ref()
        .ok_or(Error::MissingCredential(AuthMethod::Basic))?;
    let creds = format!("{}:{secret}", provider.client_id);
    let encoded = BASE64_STANDARD.encode(creds);
    request
        .headers
        .push(("Authorization".into(), format!("Basic {encoded}")));
    Ok(())
}

fn apply_post(request: &mut TokenRequest, provider: &ProviderRecord) -> Result<()> {
    let secret = provider
        .client_secret
        .as_ref()
        .ok_or(Error::MissingCredential(AuthMethod::Post))?;
    tracing::info!(
        provider = %provider.id,
        "sending client credentials in the request body (auth_method=post); \
         prefer basic or a jwt assertion method where the provider supports it"
    );
    request.push("client_id", provider.client_id.clone());
    request.push("client_secret", secret.clone());
    Ok(())
}

fn apply_client_secret_jwt(request: &mut TokenRequest, provider: &ProviderRecord) -> Result<()> {
    let secret = provider
        .client_secret
        .as_ref()
        .ok_or(Error::MissingCredential(AuthMethod::ClientSecretJwt))?;
    let jwt = build_assertion(provider, JwsAlg::Hs256, &KeyMaterial::Secret(secret.as_bytes()))?;
    push_assertion(request, provider, jwt);
    Ok(())
}

fn apply_private_key_jwt(request: &mut TokenRequest, provider: &ProviderRecord) -> Result<()> {
    let pem = provider
        .private_key
        .as_ref()
        .ok_or(Error::MissingCredential(AuthMethod::PrivateKeyJwt))?;
    let alg = if pem.contains("EC PRIVATE KEY") {
        JwsAlg::Es256
    } else {
        JwsAlg::Rs256
    };
    let jwt = build_assertion(provider, alg, &KeyMaterial::Pem(pem))?;
    push_assertion(request, provider, jwt);
    Ok(())
}

fn push_assertion(request: &mut TokenRequest, provider: &ProviderRecord, jwt: String) {
    request.push("client_assertion_type", JWT_BEARER_ASSERTION_TYPE);
    request.push("client_assertion", jwt);
    request.push("client_id", provider.client_id.clone());
}

/// Builds the RFC 7523 assertion claims (`iss=sub=client_id, aud=token_url, jti, iat, exp`) and
/// signs it. `jti` is freshly random per call, so every request carries a distinct assertion.
fn build_assertion(
    provider: &ProviderRecord,
    alg: JwsAlg,
    key: &KeyMaterial<'_>,
) -> Result<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| Error::Crypto("system clock before UNIX_EPOCH".into()))?
        .as_secs() as i64;

    let claims = serde_json::json!({
        "iss": provider.client_id,
        "sub": provider.client_id,
        "aud": provider.token_url,
        "jti": random_state(128),
        "iat": now,
        "exp": now + ASSERTION_LIFETIME_SECS,
    });
    jws_sign(&claims, alg, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{GrantType, PkceMethod};

    fn provider_with(method: AuthMethod) -> ProviderRecord {
        ProviderRecord {
            id: "acme".into(),
            display_name: "Acme".into(),
            authorization_url: None,
            token_url: "https://acme.example/token".into(),
            device_authorization_url: None,
            revocation_url: None,
            introspection_url: None,
            userinfo_url: None,
            jwks_uri: None,
            discovery_url: None,
            client_id: "c".into(),
            client_secret: Some("s".into()),
            private_key: None,
            auth_method: method,
            default_scopes: vec![],
            supported_grant_types: vec![GrantType::ClientCredentials],
            pkce_required: false,
            pkce_methods: vec![PkceMethod::S256],
        }
    }

    /// Basic auth header and absence from the body.
    #[test]
    fn basic_auth_sets_header_and_omits_body_credentials() {
        let provider = provider_with(AuthMethod::Basic);
        let mut req = TokenRequest::default();
        apply(&mut req, &provider).unwrap();

        assert_eq!(
            req.headers,
            vec![("Authorization".to_string(), "Basic Yzpz".to_string())]
        );
        assert!(!req.form.iter().any(|(k, _)| k == "client_id"));
        assert!(!req.form.iter().any(|(k, _)| k == "client_secret"));
    }

    #[test]
    fn post_auth_puts_credentials_in_body() {
        let provider = provider_with(AuthMethod::Post);
        let mut req = TokenRequest::default();
        apply(&mut req, &provider).unwrap();
        assert!(req.form.contains(&("client_id".to_string(), "c".to_string())));
        assert!(req.form.contains(&("client_secret".to_string(), "s".to_string())));
    }

    /// private_key_jwt assertion shape.
    #[test]
    fn private_key_jwt_builds_well_formed_assertion() {
        use rsa::pkcs1::EncodeRsaPrivateKey as _;
        use rsa::{RsaPrivateKey, rand_core::OsRng};

        let key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let pem = key
            .to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap()
            .to_string();

        let mut provider = provider_with(AuthMethod::PrivateKeyJwt);
        provider.client_secret = None;
        provider.private_key = Some(pem);

        let mut req = TokenRequest::default();
        apply(&mut req, &provider).unwrap();

        let assertion_type = req
            .form
            .iter()
            .find(|(k, _)| k == "client_assertion_type")
            .map(|(_, v)| v.clone());
        assert_eq!(assertion_type.as_deref(), Some(JWT_BEARER_ASSERTION_TYPE));

        let jwt = req
            .form
            .iter()
            .find(|(k, _)| k == "client_assertion")
            .map(|(_, v)| v.clone())
            .unwrap();
        let decoded = crate::jwt::decode_unverified(&jwt).unwrap();
        assert_eq!(decoded.payload["aud"], "https://acme.example/token");
        assert_eq!(decoded.payload["iss"], "c");
        assert_eq!(decoded.payload["sub"], "c");
        let exp = decoded.payload["exp"].as_i64().unwrap();
        let iat = decoded.payload["iat"].as_i64().unwrap();
        assert_eq!(exp - iat, 60);
    }

    #[test]
    fn jti_is_distinct_across_calls() {
        let provider = provider_with(AuthMethod::ClientSecretJwt);
        let mut req1 = TokenRequest::default();
        let mut req2 = TokenRequest::default();
        apply(&mut req1, &provider).unwrap();
        apply(&mut req2, &provider).unwrap();

        let jti = |req: &TokenRequest| {
            let jwt = req
                .form
                .iter()
                .find(|(k, _)| k == "client_assertion")
                .unwrap()
                .1
                .clone();
            crate::jwt::decode_unverified(&jwt).unwrap().payload["jti"].clone()
        };
        assert_ne!(jti(&req1), jti(&req2));
    }

    #[test]
    fn basic_degrades_to_none_when_secret_missing() {
        let mut provider = provider_with(AuthMethod::Basic);
        provider.client_secret = None;
        let mut req = TokenRequest::default();
        apply(&mut req, &provider).unwrap();
        assert!(req.headers.is_empty());
        assert!(req.form.contains(&("client_id".to_string(), "c".to_string())));
    }

    #[test]
    fn preferred_method_orders_private_key_jwt_first() {
        let mut provider = provider_with(AuthMethod::None);
        provider.private_key = Some("pem".into());
        assert_eq!(preferred_method(&provider), AuthMethod::PrivateKeyJwt);
    }
}
