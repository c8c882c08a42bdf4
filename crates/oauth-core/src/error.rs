//! Unified error taxonomy for the OAuth client engine.

use thiserror::Error;

/// Main error type surfaced by every `oauth-core` subsystem.
///
/// Variants are grouped by concern: config, OAuth protocol, flow, token/JWT, transport,
/// store, guard.
#[derive(Error, Debug)]
pub enum Error {
    // -- Config errors --
    #[error("provider '{0}' is missing a required endpoint: {1}")]
    ProviderMissingEndpoint(String, &'static str),

    #[error("invalid url '{0}': {1}")]
    BadUrl(String, String),

    #[error("missing credential for auth method {0:?}")]
    MissingCredential(AuthMethod),

    #[error("pkce method not supported: {0} (only S256 is accepted)")]
    PkceMethodUnsupported(String),

    // -- Protocol errors (OAuth `error` values from the token endpoint) --
    #[error("invalid_request: {0}")]
    InvalidRequest(String),
    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),
    #[error("access_denied: {0}")]
    AccessDenied(String),
    #[error("unsupported_response_type: {0}")]
    UnsupportedResponseType(String),
    #[error("invalid_scope: {0}")]
    InvalidScope(String),
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),
    #[error("invalid_client: {0}")]
    InvalidClient(String),
    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),
    #[error("temporarily_unavailable: {0}")]
    TemporarilyUnavailable(String),
    #[error("server_error: {0}")]
    ServerError(String),
    #[error("provider returned unrecognized error '{error}': {description}")]
    OtherProtocolError { error: String, description: String },

    // -- Flow errors --
    #[error("timed out waiting for the authorization callback")]
    CallbackTimeout,
    #[error("callback state did not match the request that started this flow")]
    CallbackMismatch,
    #[error("PKCE verifier is required by this provider but was not supplied")]
    PkceMissing,
    #[error("the callback listener already completed this flow")]
    AlreadyUsed,
    #[error("failed to bind the loopback callback listener: {0}")]
    PortBindFailed(String),
    #[error("the user denied the device authorization request")]
    DeviceDeclined,
    #[error("the device code expired before authorization completed")]
    DeviceExpired,
    #[error("provider does not expose a revocation endpoint")]
    RevocationUnsupported,

    // -- Token / JWT errors --
    #[error("token is expired")]
    TokenExpired,
    #[error("token is not yet valid (nbf)")]
    TokenNotYetValid,
    #[error("signature verification failed")]
    BadSignature,
    #[error("unexpected issuer: {0}")]
    BadIssuer(String),
    #[error("unexpected audience: {0}")]
    BadAudience(String),
    #[error("algorithm {0:?} is not allowed for this verification")]
    BadAlgorithm(String),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("no key found for kid={kid:?} alg={alg:?}")]
    KeyNotFound {
        kid: Option<String>,
        alg: Option<String>,
    },
    #[error("jwks document is malformed: {0}")]
    JwksMalformed(String),

    // -- Transport --
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("request timed out")]
    Timeout,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("host not found")]
    HostNotFound,

    // -- Store --
    #[error("key material is invalid: {0}")]
    KeyMaterialInvalid(String),
    #[error("failed to encrypt token store: {0}")]
    EncryptedWrite(String),
    #[error("failed to decrypt token store: {0}")]
    EncryptedRead(String),
    #[error("token store file is corrupt")]
    StoreCorrupt,

    // -- Guards --
    #[error("too many active state entries; try again shortly")]
    DosGuardTripped,

    // -- Wrapped lower-level errors --
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("crypto error: {0}")]
    Crypto(String),
}

/// Result alias used throughout `oauth-core`.
pub type Result<T> = std::result::Result<T, Error>;

/// Client authentication method selected by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Basic,
    Post,
    ClientSecretJwt,
    PrivateKeyJwt,
    None,
}

impl Error {
    /// Build an [`Error`] from an OAuth `error`/`error_description` pair as returned by a
    /// token/authorization/device endpoint.
    #[must_use]
    pub fn from_protocol_error(error: &str, description: Option<&str>) -> Self {
        let desc = description.unwrap_or_default().to_string();
        match error {
            "invalid_request" => Self::InvalidRequest(desc),
            "unauthorized_client" => Self::UnauthorizedClient(desc),
            "access_denied" => Self::AccessDenied(desc),
            "unsupported_response_type" => Self::UnsupportedResponseType(desc),
            "invalid_scope" => Self::InvalidScope(desc),
            "invalid_grant" => Self::InvalidGrant(desc),
            "invalid_client" => Self::InvalidClient(desc),
            "unsupported_grant_type" => Self::UnsupportedGrantType(desc),
            "temporarily_unavailable" => Self::TemporarilyUnavailable(desc),
            "server_error" => Self::ServerError(desc),
            other => Self::OtherProtocolError {
                error: other.to_string(),
                description: desc,
            },
        }
    }

    /// Map a transport failure from `reqwest` without leaking request/response bodies
    /// (which may contain client secrets or tokens) into the error message.
    #[must_use]
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if err.is_connect() {
            return Self::ConnectionRefused;
        }
        Self::NetworkError(sanitize_reqwest_error(err))
    }

    /// CLI exit code for this error (0 success, 1 any error, 2 bad usage).
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Self::from_reqwest(&value)
    }
}

/// Redact anything that looks like a URL with credentials or a bearer token before it reaches
/// logs or error messages.
fn sanitize_reqwest_error(err: &reqwest::Error) -> String {
    let mut msg = err.to_string();
    if let Some(url) = err.url() {
        let mut redacted = url.clone();
        let _ = redacted.set_username("");
        let _ = redacted.set_password(None);
        msg = msg.replace(url.as_str(), redacted.as_str());
    }
    msg
}
