//! JWT verifier: decode, verify signature + standard claims with tolerances.

use crate::error::{Error, Result};
use crate::jwks::JwksResolver;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;

/// Options controlling [`verify`].
#[derive(Clone)]
pub struct VerifyOptions<'a> {
    /// Algorithms accepted for the signature; defaults to the RS family.
    pub allowed_algorithms: Vec<Algorithm>,
    /// Required for HMAC algorithms.
    pub secret: Option<&'a [u8]>,
    /// Required for asymmetric algorithms; resolved through `jwks`.
    pub jwks_uri: Option<&'a str>,
    pub expected_issuer: Option<&'a str>,
    pub expected_audience: Option<&'a str>,
    pub clock_tolerance_secs: u64,
    pub ignore_expiration: bool,
    pub ignore_not_before: bool,
}

impl Default for VerifyOptions<'_> {
    fn default() -> Self {
        Self {
            allowed_algorithms: vec![Algorithm::RS256, Algorithm::RS384, Algorithm::RS512],
            secret: None,
            jwks_uri: None,
            expected_issuer: None,
            expected_audience: None,
            clock_tolerance_secs: 60,
            ignore_expiration: false,
            ignore_not_before: false,
        }
    }
}

/// Decoded (but not yet verified) JWT shape.
#[derive(Debug, Clone)]
pub struct JwtDecoded {
    pub header: Value,
    pub payload: Value,
    pub signature_b64: String,
    pub raw_parts: [String; 3],
}

/// Result of [`verify`].
#[derive(Debug, Clone, Default)]
pub struct VerificationResult {
    pub valid: bool,
    pub opaque: bool,
    pub claims: Option<Value>,
    pub header: Option<Value>,
    pub errors: Vec<String>,
}

/// Offline-decode a JWT without verifying anything. Used by the CLI's `inspect` command.
pub fn decode_unverified(token: &str) -> Result<JwtDecoded> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::Crypto("not a three-part JWT".into()));
    }
    let header: Value = serde_json::from_slice(
        &URL_SAFE_NO_PAD
            .decode(parts[0])
            .map_err(|e| Error::Crypto(format!("decode header: {e}")))?,
    )?;
    let payload: Value = serde_json::from_slice(
        &URL_SAFE_NO_PAD
            .decode(parts[1])
            .map_err(|e| Error::Crypto(format!("decode payload: {e}")))?,
    )?;
    Ok(JwtDecoded {
        header,
        payload,
        signature_b64: parts[2].to_string(),
        raw_parts: [parts[0].to_string(), parts[1].to_string(), parts[2].to_string()],
    })
}

#[derive(Deserialize)]
struct MinimalHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// Verify `token` against `opts`, resolving JWKS keys through `jwks` when needed.
///
/// Opaque (non-JWT) tokens are legal: a token that doesn't split into exactly three
/// parts returns `{opaque: true, valid: true}` rather than an error.
pub async fn verify(
    token: &str,
    opts: &VerifyOptions<'_>,
    jwks: &JwksResolver,
) -> Result<VerificationResult> {
    if token.split('.').count() != 3 {
        return Ok(VerificationResult {
            valid: true,
            opaque: true,
            ..Default::default()
        });
    }

    let decoded = match decode_unverified(token) {
        Ok(d) => d,
        Err(e) => {
            return Ok(VerificationResult {
                valid: false,
                opaque: false,
                errors: vec![e.to_string()],
                ..Default::default()
            });
        }
    };

    let header: MinimalHeader = match serde_json::from_value(decoded.header.clone()) {
        Ok(h) => h,
        Err(e) => {
            return Ok(VerificationResult {
                valid: false,
                header: Some(decoded.header),
                errors: vec![format!("invalid jwt header: {e}")],
                ..Default::default()
            });
        }
    };

    if header.alg == "none" {
        return Ok(fail(decoded.header, Error::BadAlgorithm("none".into())));
    }

    let Some(alg) = parse_algorithm(&header.alg) else {
        return Ok(fail(
            decoded.header,
            Error::UnsupportedAlgorithm(header.alg.clone()),
        ));
    };

    if !opts.allowed_algorithms.contains(&alg) {
        return Ok(fail(decoded.header, Error::BadAlgorithm(header.alg.clone())));
    }

    let decoding_key = match resolve_key(&header, alg, opts, jwks).await {
        Ok(k) => k,
        Err(e) => return Ok(fail(decoded.header, e)),
    };

    let mut validation = Validation::new(alg);
    validation.leeway = opts.clock_tolerance_secs;
    validation.validate_exp = !opts.ignore_expiration;
    validation.validate_nbf = !opts.ignore_not_before;
    validation.required_spec_claims.clear();
    if let Some(iss) = opts.expected_issuer {
        validation.set_issuer(&[iss]);
    }
    if let Some(aud) = opts.expected_audience {
        validation.set_audience(&[aud]);
    }

    match jsonwebtoken::decode::<Value>(token, &decoding_key, &validation) {
        Ok(data) => Ok(VerificationResult {
            valid: true,
            opaque: false,
            claims: Some(data.claims),
            header: Some(decoded.header),
            errors: Vec::new(),
        }),
        Err(e) => Ok(fail(decoded.header, map_jsonwebtoken_error(e))),
    }
}

fn fail(header: Value, err: Error) -> VerificationResult {
    VerificationResult {
        valid: false,
        opaque: false,
        header: Some(header),
        errors: vec![err.to_string()],
        claims: None,
    }
}

async fn resolve_key(
    header: &MinimalHeader,
    alg: Algorithm,
    opts: &VerifyOptions<'_>,
    jwks: &JwksResolver,
) -> Result<DecodingKey> {
    let is_hmac = matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512);
    if is_hmac {
        let secret = opts
            .secret
            .ok_or_else(|| Error::KeyNotFound { kid: header.kid.clone(), alg: Some(header.alg.clone()) })?;
        return Ok(DecodingKey::from_secret(secret));
    }

    let jwks_uri = opts.jwks_uri.ok_or_else(|| Error::KeyNotFound {
        kid: header.kid.clone(),
        alg: Some(header.alg.clone()),
    })?;
    let resolved = jwks
        .resolve(jwks_uri, header.kid.as_deref(), &header.alg)
        .await?;
    Ok(resolved.decoding_key)
}

fn parse_algorithm(alg: &str) -> Option<Algorithm> {
    match alg {
        "HS256" => Some(Algorithm::HS256),
        "HS384" => Some(Algorithm::HS384),
        "HS512" => Some(Algorithm::HS512),
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        "ES256" => Some(Algorithm::ES256),
        "ES384" => Some(Algorithm::ES384),
        _ => None,
    }
}

fn map_jsonwebtoken_error(e: jsonwebtoken::errors::Error) -> Error {
    use jsonwebtoken::errors::ErrorKind;
    match e.kind() {
        ErrorKind::ExpiredSignature => Error::TokenExpired,
        ErrorKind::ImmatureSignature => Error::TokenNotYetValid,
        ErrorKind::InvalidSignature => Error::BadSignature,
        ErrorKind::InvalidIssuer => Error::BadIssuer(String::new()),
        ErrorKind::InvalidAudience => Error::BadAudience(String::new()),
        ErrorKind::InvalidAlgorithm => Error::BadAlgorithm(String::new()),
        _ => Error::Crypto(e.to_string()),
    }
}
