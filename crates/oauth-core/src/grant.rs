//! Grant-flow engine: one state machine per grant, a shared token-exchange helper.
//!
//! `Grant` is one tagged enum with a single `run` entry point and a private `exchange_token`
//! helper shared by every grant that posts to `token_url`, rather than a class hierarchy per
//! grant.

use crate::callback;
use crate::client_auth;
use crate::crypto;
use crate::error::{Error, Result};
use crate::jwt::{self, VerifyOptions};
use crate::provider::ProviderRecord;
use crate::state_store::StateStore;
use crate::token::TokenResponse;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Shared collaborators a grant needs that aren't part of the `ProviderRecord` itself.
#[derive(Clone)]
pub struct GrantContext {
    pub http: reqwest::Client,
    pub state_store: Arc<StateStore>,
    pub jwks: crate::jwks::JwksResolver,
    pub cancel: CancellationToken,
}

impl Default for GrantContext {
    fn default() -> Self {
        Self {
            http: reqwest::Client::new(),
            state_store: Arc::new(StateStore::default()),
            jwks: crate::jwks::JwksResolver::default(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Response type requested by the (deprecated) Implicit flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImplicitResponseType {
    Token,
    IdTokenToken,
}

impl ImplicitResponseType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::IdTokenToken => "id_token token",
        }
    }
}

/// What the caller is shown while device-code polling is in flight.
#[derive(Debug, Clone)]
pub struct DeviceCodeSession {
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    pub expires_in_secs: u64,
}

/// One of the grants this engine can run.
///
/// Revocation is not a grant and lives outside this enum as [`revoke`].
pub enum Grant {
    AuthorizationCode {
        redirect_uri: String,
        scope: Option<String>,
        use_pkce: bool,
        nonce: Option<String>,
        callback_timeout: Duration,
    },
    ClientCredentials {
        scope: Option<String>,
    },
    Password {
        username: String,
        password: String,
        scope: Option<String>,
    },
    DeviceCode {
        scope: Option<String>,
        /// Invoked once the provider has issued a `user_code`/`verification_uri`, before polling
        /// begins, so the caller can display it.
        on_session: Box<dyn FnOnce(&DeviceCodeSession) + Send>,
    },
    /// Deprecated: returns the access token in a URL fragment, which leaks it to browser
    /// history, the `Referer` header, and any script on the redirect page. Prefer
    /// [`Grant::AuthorizationCode`] with PKCE.
    #[deprecated(note = "use AuthorizationCode with PKCE; fragment-delivered tokens are not safe")]
    Implicit {
        redirect_uri: String,
        scope: Option<String>,
        response_type: ImplicitResponseType,
        callback_timeout: Duration,
    },
    Refresh {
        refresh_token: String,
        scope: Option<String>,
    },
}

/// Terminal result of a successful grant, including verified `id_token` claims when present.
#[derive(Debug, Clone)]
pub struct GrantOutcome {
    pub token: TokenResponse,
    pub id_token_claims: Option<serde_json::Value>,
}

/// Run `grant` against `provider`, producing a [`GrantOutcome`] or a terminal [`Error`].
pub async fn run(grant: Grant, provider: &ProviderRecord, ctx: &GrantContext) -> Result<GrantOutcome> {
    #[allow(deprecated)]
    match grant {
        Grant::AuthorizationCode {
            redirect_uri,
            scope,
            use_pkce,
            nonce,
            callback_timeout,
        } => {
            run_authorization_code(
                provider,
                ctx,
                &redirect_uri,
                scope.as_deref(),
                use_pkce,
                nonce.as_deref(),
                callback_timeout,
            )
            .await
        }
        Grant::ClientCredentials { scope } => run_client_credentials(provider, ctx, scope.as_deref()).await,
        Grant::Password {
            username,
            password,
            scope,
        } => run_password(provider, ctx, &username, &password, scope.as_deref()).await,
        Grant::DeviceCode { scope, on_session } => {
            run_device_code(provider, ctx, scope.as_deref(), on_session).await
        }
        Grant::Implicit {
            redirect_uri,
            scope,
            response_type,
            callback_timeout,
        } => {
            run_implicit(
                provider,
                ctx,
                &redirect_uri,
                scope.as_deref(),
                response_type,
                callback_timeout,
            )
            .await
        }
        Grant::Refresh { refresh_token, scope } => {
            run_refresh(provider, ctx, &refresh_token, scope.as_deref()).await
        }
    }
}

/// RFC 7009 token revocation. Not modeled as a [`Grant`]: it produces no token.
pub async fn revoke(
    token: &str,
    token_type_hint: Option<&str>,
    provider: &ProviderRecord,
    ctx: &GrantContext,
) -> Result<()> {
    let revocation_url = provider.revocation_url.as_deref().ok_or(Error::RevocationUnsupported)?;

    let mut request = client_auth::TokenRequest::default();
    request.push("token", token);
    if let Some(hint) = token_type_hint {
        request.push("token_type_hint", hint);
    }
    client_auth::apply(&mut request, provider)?;

    let mut builder = ctx.http.post(revocation_url).form(&request.form);
    for (key, value) in &request.headers {
        builder = builder.header(key, value);
    }
    let resp = builder.send().await.map_err(|e| Error::from_reqwest(&e))?;

    // RFC 7009 §2.2: the server treats an already-invalid token as success too.
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(Error::ServerError(format!(
            "revocation endpoint returned {}",
            resp.status()
        )))
    }
}

async fn run_authorization_code(
    provider: &ProviderRecord,
    ctx: &GrantContext,
    redirect_uri: &str,
    scope: Option<&str>,
    use_pkce: bool,
    nonce: Option<&str>,
    callback_timeout: Duration,
) -> Result<GrantOutcome> {
    if provider.pkce_required && !use_pkce {
        return Err(Error::PkceMissing);
    }
    let pkce = use_pkce.then(crypto::pkce_new);
    let state = ctx.state_store.create(None, None)?;

    let authorization_url = provider
        .authorization_url
        .as_deref()
        .ok_or_else(|| Error::ProviderMissingEndpoint(provider.id.clone(), "authorization_url"))?;
    let mut url = url::Url::parse(authorization_url)
        .map_err(|e| Error::BadUrl(authorization_url.to_string(), e.to_string()))?;
    {
        let mut q = url.query_pairs_mut();
        q.append_pair("response_type", "code");
        q.append_pair("client_id", &provider.client_id);
        q.append_pair("redirect_uri", redirect_uri);
        if let Some(scope) = scope {
            q.append_pair("scope", scope);
        }
        q.append_pair("state", &state);
        if let Some(pkce) = &pkce {
            q.append_pair("code_challenge", &pkce.challenge);
            q.append_pair("code_challenge_method", crypto::PKCE_METHOD);
        }
        if let Some(nonce) = nonce {
            q.append_pair("nonce", nonce);
        }
    }

    open_browser(provider, &url);

    let payload =
        callback::wait_for_callback(redirect_uri, callback_timeout, false, ctx.cancel.clone()).await?;
    if let Some(err) = payload.protocol_error() {
        return Err(err);
    }
    let returned_state = payload.get("state").ok_or(Error::CallbackMismatch)?;
    if ctx.state_store.verify(returned_state, None).is_none() {
        return Err(Error::CallbackMismatch);
    }
    let code = payload
        .get("code")
        .ok_or_else(|| Error::InvalidRequest("callback did not carry a code".into()))?;

    let mut form = vec![
        ("grant_type".to_string(), "authorization_code".to_string()),
        ("code".to_string(), code.to_string()),
        ("redirect_uri".to_string(), redirect_uri.to_string()),
    ];
    if let Some(pkce) = &pkce {
        form.push(("code_verifier".to_string(), pkce.verifier.clone()));
    }

    let token = exchange_token(ctx, provider, form).await?;
    let id_token_claims = verify_id_token_if_present(&token, provider, ctx, nonce).await?;
    Ok(GrantOutcome {
        token,
        id_token_claims,
    })
}

async fn run_client_credentials(
    provider: &ProviderRecord,
    ctx: &GrantContext,
    scope: Option<&str>,
) -> Result<GrantOutcome> {
    let mut form = vec![("grant_type".to_string(), "client_credentials".to_string())];
    if let Some(scope) = scope {
        form.push(("scope".to_string(), scope.to_string()));
    }
    let token = exchange_token(ctx, provider, form).await?;
    Ok(GrantOutcome {
        token,
        id_token_claims: None,
    })
}

async fn run_password(
    provider: &ProviderRecord,
    ctx: &GrantContext,
    username: &str,
    password: &str,
    scope: Option<&str>,
) -> Result<GrantOutcome> {
    let mut form = vec![
        ("grant_type".to_string(), "password".to_string()),
        ("username".to_string(), username.to_string()),
        ("password".to_string(), password.to_string()),
    ];
    if let Some(scope) = scope {
        form.push(("scope".to_string(), scope.to_string()));
    }
    let token = exchange_token(ctx, provider, form).await?;
    Ok(GrantOutcome {
        token,
        id_token_claims: None,
    })
}

#[derive(Debug, Deserialize)]
struct DeviceAuthorizationResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    expires_in: u64,
    #[serde(default)]
    interval: Option<u64>,
}

const DEFAULT_DEVICE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEVICE_SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

async fn run_device_code(
    provider: &ProviderRecord,
    ctx: &GrantContext,
    scope: Option<&str>,
    on_session: Box<dyn FnOnce(&DeviceCodeSession) + Send>,
) -> Result<GrantOutcome> {
    let device_authorization_url = provider
        .device_authorization_url
        .as_deref()
        .ok_or_else(|| Error::ProviderMissingEndpoint(provider.id.clone(), "device_authorization_url"))?;

    let mut form = vec![("client_id".to_string(), provider.client_id.clone())];
    if let Some(scope) = scope {
        form.push(("scope".to_string(), scope.to_string()));
    }
    let resp = ctx
        .http
        .post(device_authorization_url)
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::from_reqwest(&e))?;
    let resp = resp.error_for_status().map_err(|e| Error::from_reqwest(&e))?;
    let device: DeviceAuthorizationResponse = resp.json().await.map_err(|e| Error::from_reqwest(&e))?;

    on_session(&DeviceCodeSession {
        user_code: device.user_code.clone(),
        verification_uri: device.verification_uri.clone(),
        verification_uri_complete: device.verification_uri_complete.clone(),
        expires_in_secs: device.expires_in,
    });

    let mut interval = device
        .interval
        .map_or(DEFAULT_DEVICE_POLL_INTERVAL, Duration::from_secs);
    let deadline = Instant::now() + Duration::from_secs(device.expires_in);

    loop {
        if Instant::now() >= deadline {
            return Err(Error::DeviceExpired);
        }

        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            () = ctx.cancel.cancelled() => return Err(Error::CallbackTimeout),
        }

        let form = vec![
            (
                "grant_type".to_string(),
                "urn:ietf:params:oauth:grant-type:device_code".to_string(),
            ),
            ("device_code".to_string(), device.device_code.clone()),
            ("client_id".to_string(), provider.client_id.clone()),
        ];

        match exchange_token(ctx, provider, form).await {
            Ok(token) => {
                return Ok(GrantOutcome {
                    token,
                    id_token_claims: None,
                });
            }
            Err(Error::OtherProtocolError { error, .. }) if error == "authorization_pending" => {
                continue;
            }
            Err(Error::OtherProtocolError { error, .. }) if error == "slow_down" => {
                interval += DEVICE_SLOW_DOWN_STEP;
                continue;
            }
            Err(Error::OtherProtocolError { error, .. }) if error == "expired_token" => {
                return Err(Error::DeviceExpired);
            }
            Err(Error::AccessDenied(_)) => return Err(Error::DeviceDeclined),
            Err(e) => return Err(e),
        }
    }
}

#[allow(deprecated)]
async fn run_implicit(
    provider: &ProviderRecord,
    ctx: &GrantContext,
    redirect_uri: &str,
    scope: Option<&str>,
    response_type: ImplicitResponseType,
    callback_timeout: Duration,
) -> Result<GrantOutcome> {
    let state = ctx.state_store.create(None, None)?;

    let authorization_url = provider
        .authorization_url
        .as_deref()
        .ok_or_else(|| Error::ProviderMissingEndpoint(provider.id.clone(), "authorization_url"))?;
    let mut url = url::Url::parse(authorization_url)
        .map_err(|e| Error::BadUrl(authorization_url.to_string(), e.to_string()))?;
    {
        let mut q = url.query_pairs_mut();
        q.append_pair("response_type", response_type.as_str());
        q.append_pair("client_id", &provider.client_id);
        q.append_pair("redirect_uri", redirect_uri);
        if let Some(scope) = scope {
            q.append_pair("scope", scope);
        }
        q.append_pair("state", &state);
    }

    open_browser(provider, &url);

    let payload =
        callback::wait_for_callback(redirect_uri, callback_timeout, true, ctx.cancel.clone()).await?;
    if let Some(err) = payload.protocol_error() {
        return Err(err);
    }
    let returned_state = payload.get("state").ok_or(Error::CallbackMismatch)?;
    if ctx.state_store.verify(returned_state, None).is_none() {
        return Err(Error::CallbackMismatch);
    }
    let access_token = payload
        .get("access_token")
        .ok_or_else(|| Error::InvalidRequest("fragment did not carry an access_token".into()))?
        .to_string();

    let token = TokenResponse {
        access_token,
        token_type: payload.get("token_type").unwrap_or("Bearer").to_string(),
        expires_in: payload.get("expires_in").and_then(|v| v.parse().ok()),
        refresh_token: None,
        scope: payload.get("scope").map(str::to_string),
        id_token: payload.get("id_token").map(str::to_string),
    };
    Ok(GrantOutcome {
        token,
        id_token_claims: None,
    })
}

async fn run_refresh(
    provider: &ProviderRecord,
    ctx: &GrantContext,
    refresh_token: &str,
    scope: Option<&str>,
) -> Result<GrantOutcome> {
    let mut form = vec![
        ("grant_type".to_string(), "refresh_token".to_string()),
        ("refresh_token".to_string(), refresh_token.to_string()),
    ];
    if let Some(scope) = scope {
        form.push(("scope".to_string(), scope.to_string()));
    }
    let token = exchange_token(ctx, provider, form).await?;
    Ok(GrantOutcome {
        token,
        id_token_claims: None,
    })
}

/// Assemble the client-authenticated POST, send it to `provider.token_url`, and parse the
/// result - the one step every grant shares ("common routing").
async fn exchange_token(
    ctx: &GrantContext,
    provider: &ProviderRecord,
    form: Vec<(String, String)>,
) -> Result<TokenResponse> {
    let mut request = client_auth::TokenRequest::default();
    for (key, value) in form {
        request.push(key, value);
    }
    client_auth::apply(&mut request, provider)?;

    tracing::info!(provider = %provider.id, token_url = %provider.token_url, "exchanging token");

    let mut builder = ctx.http.post(&provider.token_url).form(&request.form);
    for (key, value) in &request.headers {
        builder = builder.header(key, value);
    }
    let resp = builder.send().await.map_err(|e| Error::from_reqwest(&e))?;
    parse_token_response(resp).await
}

async fn parse_token_response(resp: reqwest::Response) -> Result<TokenResponse> {
    let status = resp.status();
    let body: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| Error::NetworkError(format!("non-json response from token endpoint: {e}")))?;

    if let Some(error) = body.get("error").and_then(|v| v.as_str()) {
        let description = body.get("error_description").and_then(|v| v.as_str());
        return Err(Error::from_protocol_error(error, description));
    }
    if !status.is_success() {
        return Err(Error::ServerError(format!("token endpoint returned {status}")));
    }

    serde_json::from_value(body).map_err(Error::Json)
}

async fn verify_id_token_if_present(
    token: &TokenResponse,
    provider: &ProviderRecord,
    ctx: &GrantContext,
    expected_nonce: Option<&str>,
) -> Result<Option<serde_json::Value>> {
    let Some(id_token) = &token.id_token else {
        return Ok(None);
    };
    let Some(jwks_uri) = provider.jwks_uri.as_deref() else {
        return Ok(None);
    };

    let opts = VerifyOptions {
        jwks_uri: Some(jwks_uri),
        expected_audience: Some(provider.client_id.as_str()),
        ..VerifyOptions::default()
    };
    let result = jwt::verify(id_token, &opts, &ctx.jwks).await?;
    if !result.valid {
        return Err(result
            .errors
            .first()
            .map(|e| Error::Crypto(e.clone()))
            .unwrap_or(Error::BadSignature));
    }

    if let (Some(expected), Some(claims)) = (expected_nonce, &result.claims) {
        let actual = claims.get("nonce").and_then(|v| v.as_str());
        if actual != Some(expected) {
            return Err(Error::Crypto("id_token nonce did not match the request".into()));
        }
    }

    Ok(result.claims)
}

fn open_browser(provider: &ProviderRecord, url: &url::Url) {
    if let Err(e) = open::that(url.as_str()) {
        tracing::warn!(
            provider = %provider.id,
            error = %e,
            url = %url,
            "could not launch a browser automatically; open the authorization url manually"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthMethod;
    use crate::provider::{GrantType, PkceMethod};
    use oauth_test_support::pick_unused_port;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(token_url: String) -> ProviderRecord {
        ProviderRecord {
            id: "acme".into(),
            display_name: "Acme".into(),
            authorization_url: None,
            token_url,
            device_authorization_url: None,
            revocation_url: None,
            introspection_url: None,
            userinfo_url: None,
            jwks_uri: None,
            discovery_url: None,
            client_id: "c".into(),
            client_secret: Some("s".into()),
            private_key: None,
            auth_method: AuthMethod::Basic,
            default_scopes: vec![],
            supported_grant_types: vec![GrantType::ClientCredentials],
            pkce_required: false,
            pkce_methods: vec![PkceMethod::S256],
        }
    }

    /// Client Credentials with Basic auth.
    #[tokio::test]
    async fn client_credentials_with_basic_auth_returns_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A",
                "token_type": "Bearer",
                "expires_in": 3600,
            })))
            .mount(&server)
            .await;

        let provider = provider(format!("{}/token", server.uri()));
        let ctx = GrantContext::default();
        let outcome = run(Grant::ClientCredentials { scope: None }, &provider, &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.token.access_token, "A");
    }

    #[tokio::test]
    async fn protocol_error_from_token_endpoint_is_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "the code has expired",
            })))
            .mount(&server)
            .await;

        let provider = provider(format!("{}/token", server.uri()));
        let ctx = GrantContext::default();
        let err = run(Grant::ClientCredentials { scope: None }, &provider, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidGrant(_)));
    }

    /// Authorization Code with PKCE, end to end against the loopback listener + a mock
    /// token endpoint.
    #[tokio::test]
    async fn authorization_code_with_pkce_round_trips() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code_verifier="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A",
                "token_type": "Bearer",
                "expires_in": 3600,
            })))
            .mount(&server)
            .await;

        let mut provider = provider(format!("{}/token", server.uri()));
        provider.authorization_url = Some(format!("{}/authorize", server.uri()));
        provider.pkce_required = true;

        let port = pick_unused_port().unwrap();
        let redirect_uri = format!("http://127.0.0.1:{port}/callback");
        let ctx = GrantContext::default();
        let state_store = ctx.state_store.clone();

        let flow = tokio::spawn({
            let provider = provider.clone();
            let ctx = ctx.clone();
            let redirect_uri = redirect_uri.clone();
            async move {
                run(
                    Grant::AuthorizationCode {
                        redirect_uri,
                        scope: None,
                        use_pkce: true,
                        nonce: None,
                        callback_timeout: Duration::from_secs(5),
                    },
                    &provider,
                    &ctx,
                )
                .await
            }
        });

        // Mimic the browser: read back the state the flow itself generated and pending
        // verification, so this exercises the real one-shot state check end to end.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let state = {
            let pending = state_store.pending_states();
            assert_eq!(pending.len(), 1, "flow should have created exactly one pending state");
            pending.into_iter().next().unwrap()
        };
        let client = reqwest::Client::new();
        let resp = client
            .get(format!("{redirect_uri}?code=abc123&state={state}"))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());

        let outcome = flow.await.unwrap().unwrap();
        assert_eq!(outcome.token.access_token, "A");
    }

    /// Device flow slow-down backoff sequence.
    #[tokio::test]
    async fn device_code_backs_off_on_slow_down() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/device"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "device_code": "d1",
                "user_code": "ABCD-EFGH",
                "verification_uri": "https://acme.example/device",
                "expires_in": 600,
                "interval": 1,
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "authorization_pending",
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "slow_down",
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A",
                "token_type": "Bearer",
            })))
            .mount(&server)
            .await;

        let mut provider = provider(format!("{}/token", server.uri()));
        provider.device_authorization_url = Some(format!("{}/device", server.uri()));
        let ctx = GrantContext::default();

        let seen_user_code = std::sync::Arc::new(std::sync::Mutex::new(None));
        let seen_user_code_clone = seen_user_code.clone();

        let outcome = run(
            Grant::DeviceCode {
                scope: None,
                on_session: Box::new(move |session| {
                    *seen_user_code_clone.lock().unwrap() = Some(session.user_code.clone());
                }),
            },
            &provider,
            &ctx,
        )
        .await
        .unwrap();

        assert_eq!(outcome.token.access_token, "A");
        assert_eq!(seen_user_code.lock().unwrap().as_deref(), Some("ABCD-EFGH"));
    }

    #[tokio::test]
    async fn device_code_access_denied_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/device"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "device_code": "d1",
                "user_code": "ABCD-EFGH",
                "verification_uri": "https://acme.example/device",
                "expires_in": 600,
                "interval": 1,
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "access_denied",
            })))
            .mount(&server)
            .await;

        let mut provider = provider(format!("{}/token", server.uri()));
        provider.device_authorization_url = Some(format!("{}/device", server.uri()));
        let ctx = GrantContext::default();

        let err = run(
            Grant::DeviceCode {
                scope: None,
                on_session: Box::new(|_| {}),
            },
            &provider,
            &ctx,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::DeviceDeclined));
    }

    /// A refresh response without a new
    /// `refresh_token` is returned as-is; preserving the old one is the token store's job.
    #[tokio::test]
    async fn refresh_grant_returns_response_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-access",
                "token_type": "Bearer",
            })))
            .mount(&server)
            .await;

        let provider = provider(format!("{}/token", server.uri()));
        let ctx = GrantContext::default();
        let outcome = run(
            Grant::Refresh {
                refresh_token: "old-refresh".to_string(),
                scope: None,
            },
            &provider,
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(outcome.token.access_token, "new-access");
        assert!(outcome.token.refresh_token.is_none());
    }

    #[tokio::test]
    async fn revoke_without_revocation_url_is_unsupported() {
        let provider = provider("https://acme.example/token".to_string());
        let ctx = GrantContext::default();
        let err = revoke("tok", None, &provider, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::RevocationUnsupported));
    }

    #[tokio::test]
    async fn revoke_posts_token_and_treats_200_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .and(body_string_contains("token=tok123"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut provider = provider(format!("{}/token", server.uri()));
        provider.revocation_url = Some(format!("{}/revoke", server.uri()));
        let ctx = GrantContext::default();
        revoke("tok123", Some("refresh_token"), &provider, &ctx)
            .await
            .unwrap();
    }
}
