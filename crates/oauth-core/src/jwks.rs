//! JWKS resolver: fetch, cache-with-TTL, and key selection by `kid`/`alg`.
//!
//! Supports EC keys and `x5c` certificate envelopes in addition to RSA `n`/`e`, and caches
//! per-`kid` instead of assuming every key is RS256.

use crate::error::{Error, Result};
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// One resolved JWK, ready to verify a signature.
#[derive(Clone)]
pub struct ResolvedKey {
    pub kid: Option<String>,
    pub alg: Option<String>,
    pub kty: String,
    pub decoding_key: DecodingKey,
}

#[derive(Clone, Default)]
struct Cache {
    fetched_at: Option<Instant>,
    next_refresh_after: Option<Instant>,
    last_refresh_attempt: Option<Instant>,
    keys: Vec<ResolvedKey>,
}

/// Fetches and caches JWKS documents, keyed by URI.
#[derive(Clone)]
pub struct JwksResolver {
    http: reqwest::Client,
    caches: Arc<RwLock<HashMap<String, Arc<RwLock<Cache>>>>>,
    ttl: Duration,
}

impl Default for JwksResolver {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), DEFAULT_TTL)
    }
}

impl JwksResolver {
    #[must_use]
    pub fn new(http: reqwest::Client, ttl: Duration) -> Self {
        Self {
            http,
            caches: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Explicit cache clear, needed so tests can simulate key rotation mid-run.
    pub async fn clear_cache(&self) {
        self.caches.write().await.clear();
    }

    async fn cache_for(&self, jwks_uri: &str) -> Arc<RwLock<Cache>> {
        if let Some(c) = self.caches.read().await.get(jwks_uri) {
            return c.clone();
        }
        let mut caches = self.caches.write().await;
        caches
            .entry(jwks_uri.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Cache::default())))
            .clone()
    }

    /// Fetch (or return cached) keys for `jwks_uri`.
    pub async fn fetch(&self, jwks_uri: &str) -> Result<Vec<ResolvedKey>> {
        let cache = self.cache_for(jwks_uri).await;
        self.refresh_if_needed(jwks_uri, &cache, None).await?;
        Ok(cache.read().await.keys.clone())
    }

    /// Select the verification key for a JWT header, fetching/refreshing the JWKS as needed.
    ///
    /// Selection rule:
    /// 1. If the header carries `kid`, find the JWK with a matching `kid`.
    /// 2. Otherwise pick the first JWK whose `alg` is absent or matches, `use` is absent or
    ///    `sig`, and whose key type is compatible with the header's algorithm family.
    pub async fn resolve(
        &self,
        jwks_uri: &str,
        kid: Option<&str>,
        alg: &str,
    ) -> Result<ResolvedKey> {
        let cache = self.cache_for(jwks_uri).await;
        self.refresh_if_needed(jwks_uri, &cache, kid).await?;

        let keys = cache.read().await.keys.clone();
        let family = key_family(alg);

        if let Some(kid) = kid {
            if let Some(key) = keys.iter().find(|k| k.kid.as_deref() == Some(kid)) {
                return Ok(key.clone());
            }
            return Err(Error::KeyNotFound {
                kid: Some(kid.to_string()),
                alg: Some(alg.to_string()),
            });
        }

        keys.into_iter()
            .find(|k| {
                k.alg.as_deref().is_none_or(|a| a == alg) && key_family(&k.kty) == family
            })
            .ok_or(Error::KeyNotFound {
                kid: None,
                alg: Some(alg.to_string()),
            })
    }

    async fn refresh_if_needed(
        &self,
        jwks_uri: &str,
        cache: &Arc<RwLock<Cache>>,
        maybe_kid: Option<&str>,
    ) -> Result<()> {
        let now = Instant::now();
        {
            let c = cache.read().await;
            let stale = c.next_refresh_after.is_none_or(|t| now >= t);
            let missing = maybe_kid.is_some_and(|kid| {
                !c.keys.iter().any(|k| k.kid.as_deref() == Some(kid))
            });
            if !stale && !missing {
                return Ok(());
            }
        }

        let mut c = cache.write().await;
        let stale = c.next_refresh_after.is_none_or(|t| now >= t);
        let missing = maybe_kid.is_some_and(|kid| {
            !c.keys.iter().any(|k| k.kid.as_deref() == Some(kid))
        });
        if !stale && !missing {
            return Ok(());
        }
        if let Some(last) = c.last_refresh_attempt
            && now.duration_since(last) < MIN_REFRESH_INTERVAL
        {
            return Ok(());
        }
        c.last_refresh_attempt = Some(now);

        let (keys, ttl) = fetch_and_parse(&self.http, jwks_uri).await?;
        c.keys = keys;
        c.fetched_at = Some(now);
        c.next_refresh_after = Some(now + ttl.unwrap_or(self.ttl));
        Ok(())
    }
}

fn key_family(alg_or_kty: &str) -> &'static str {
    match alg_or_kty {
        a if a.starts_with("RS") || a.starts_with("PS") || a == "RSA" => "rsa",
        a if a.starts_with("ES") || a == "EC" => "ec",
        a if a.starts_with("HS") => "hmac",
        _ => "unknown",
    }
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    alg: Option<String>,
    #[serde(rename = "use", default)]
    use_: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
    #[serde(default)]
    crv: Option<String>,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    y: Option<String>,
    #[serde(default)]
    x5c: Vec<String>,
}

async fn fetch_and_parse(
    http: &reqwest::Client,
    jwks_uri: &str,
) -> Result<(Vec<ResolvedKey>, Option<Duration>)> {
    let resp = http
        .get(jwks_uri)
        .send()
        .await
        .map_err(|e| Error::from_reqwest(&e))?;
    let resp = resp.error_for_status().map_err(|e| Error::from_reqwest(&e))?;

    let ttl = parse_cache_control_max_age(resp.headers());
    let body: JwksResponse = resp
        .json()
        .await
        .map_err(|e| Error::JwksMalformed(e.to_string()))?;

    let mut out = Vec::new();
    for jwk in body.keys {
        if let Some(u) = &jwk.use_
            && u != "sig"
        {
            continue;
        }
        let decoding_key = match jwk_to_decoding_key(&jwk) {
            Some(k) => k,
            None => continue,
        };
        out.push(ResolvedKey {
            kid: jwk.kid,
            alg: jwk.alg,
            kty: jwk.kty,
            decoding_key,
        });
    }

    if out.is_empty() {
        return Err(Error::JwksMalformed(
            "jwks contains no usable signature keys".into(),
        ));
    }
    Ok((out, ttl))
}

fn jwk_to_decoding_key(jwk: &Jwk) -> Option<DecodingKey> {
    if let Some(cert) = jwk.x5c.first() {
        let pem = format!(
            "-----BEGIN CERTIFICATE-----\n{cert}\n-----END CERTIFICATE-----\n"
        );
        if let Ok(key) = DecodingKey::from_rsa_pem(pem.as_bytes()) {
            return Some(key);
        }
    }

    match jwk.kty.as_str() {
        "RSA" => {
            let (n, e) = (jwk.n.as_deref()?, jwk.e.as_deref()?);
            DecodingKey::from_rsa_components(n, e).ok()
        }
        "EC" => {
            let (x, y) = (jwk.x.as_deref()?, jwk.y.as_deref()?);
            DecodingKey::from_ec_components(x, y).ok()
        }
        _ => None,
    }
}

fn parse_cache_control_max_age(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let v = headers.get(reqwest::header::CACHE_CONTROL)?.to_str().ok()?;
    for part in v.split(',').map(str::trim) {
        if let Some(rest) = part.strip_prefix("max-age=")
            && let Ok(secs) = rest.parse::<u64>()
        {
            return Some(Duration::from_secs(secs));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rsa_jwk() -> serde_json::Value {
        serde_json::json!({
            "kty": "RSA",
            "kid": "key-1",
            "use": "sig",
            "alg": "RS256",
            "n": "vVJMpY08lgRyNXPzXyNGqlCSXJLS3ktNf1ib5TnGqJnV",
            "e": "AQAB",
        })
    }

    #[tokio::test]
    async fn fetch_caches_and_respects_explicit_clear() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "keys": [rsa_jwk()]
            })))
            .expect(1..)
            .mount(&server)
            .await;

        let resolver = JwksResolver::default();
        let uri = format!("{}/jwks", server.uri());

        let keys = resolver.fetch(&uri).await.unwrap();
        assert_eq!(keys.len(), 1);
        // Cached: a second fetch within TTL must not re-hit the mock past its min count.
        let _ = resolver.fetch(&uri).await.unwrap();

        resolver.clear_cache().await;
        let keys_after_clear = resolver.fetch(&uri).await.unwrap();
        assert_eq!(keys_after_clear.len(), 1);
    }

    #[tokio::test]
    async fn resolve_by_kid_falls_back_to_unknown_key_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "keys": [rsa_jwk()]
            })))
            .mount(&server)
            .await;

        let resolver = JwksResolver::default();
        let uri = format!("{}/jwks", server.uri());

        let resolved = resolver.resolve(&uri, Some("key-1"), "RS256").await;
        assert!(resolved.is_ok());

        let missing = resolver.resolve(&uri, Some("missing"), "RS256").await;
        assert!(matches!(missing, Err(Error::KeyNotFound { .. })));
    }
}
