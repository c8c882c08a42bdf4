//! Crypto primitives: PKCE, CSRF state/nonce, base64url, and JWS sign/verify.
//!
//! Random bytes come from `rand_core::OsRng`, never a non-CSPRNG source, for any key material
//! generated here.

use crate::error::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation};
use rand_core::{OsRng, TryRngCore as _};
use serde::Serialize;
use sha2::Digest as _;

/// `base64url` (no padding) encode, per RFC 4648 §5.
#[must_use]
pub fn b64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `base64url` (no padding) decode.
pub fn b64url_decode(s: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(s.as_bytes())
        .map_err(|e| Error::Crypto(format!("base64url decode: {e}")))
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng
        .try_fill_bytes(&mut buf)
        .expect("OS RNG must be available");
    buf
}

/// A PKCE (RFC 7636) verifier/challenge pair. Only `S256` is ever produced; `plain` is
/// structurally unreachable.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

/// The code challenge method always sent on the wire for a [`PkceChallenge`].
pub const PKCE_METHOD: &str = "S256";

/// Create a new PKCE verifier/challenge pair.
///
/// The verifier is 32 random bytes, `base64url`-encoded (43 characters, within the RFC 7636
/// 43–128 char range); the challenge is `base64url(SHA-256(verifier))`.
#[must_use]
pub fn pkce_new() -> PkceChallenge {
    let verifier = b64url_encode(&random_bytes::<32>());
    PkceChallenge {
        challenge: pkce_challenge_from_verifier(&verifier),
        verifier,
    }
}

/// Derive the `S256` challenge for an existing verifier (used by tests and by flows that resume
/// a verifier supplied out of band).
#[must_use]
pub fn pkce_challenge_from_verifier(verifier: &str) -> String {
    let digest = sha2::Sha256::digest(verifier.as_bytes());
    b64url_encode(&digest)
}

/// A cryptographically strong hex-encoded random value, used for CSRF `state` and OIDC `nonce`.
#[must_use]
pub fn random_state(bits: u32) -> String {
    random_hex(bits)
}

/// See [`random_state`]; kept as a distinct name because state and nonce are semantically
/// different values even though the generation is identical.
#[must_use]
pub fn random_nonce() -> String {
    random_hex(256)
}

fn random_hex(bits: u32) -> String {
    let bytes = bits.div_ceil(8) as usize;
    let mut buf = vec![0u8; bytes];
    OsRng
        .try_fill_bytes(&mut buf)
        .expect("OS RNG must be available");
    hex::encode(buf)
}

/// Supported JWS signing algorithms. ES512 is intentionally absent: the `jsonwebtoken`
/// dependency does not implement it, so callers get `UnsupportedAlgorithm` instead of a key
/// silently misbehaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwsAlg {
    Hs256,
    Hs384,
    Hs512,
    Rs256,
    Rs384,
    Rs512,
    Es256,
    Es384,
}

impl JwsAlg {
    fn to_jsonwebtoken(self) -> Algorithm {
        match self {
            Self::Hs256 => Algorithm::HS256,
            Self::Hs384 => Algorithm::HS384,
            Self::Hs512 => Algorithm::HS512,
            Self::Rs256 => Algorithm::RS256,
            Self::Rs384 => Algorithm::RS384,
            Self::Rs512 => Algorithm::RS512,
            Self::Es256 => Algorithm::ES256,
            Self::Es384 => Algorithm::ES384,
        }
    }

    /// `true` for the HMAC family, which signs/verifies with a shared secret rather than a
    /// keypair.
    #[must_use]
    pub fn is_hmac(self) -> bool {
        matches!(self, Self::Hs256 | Self::Hs384 | Self::Hs512)
    }
}

/// Key material accepted by [`jws_sign`]/[`jws_verify`].
pub enum KeyMaterial<'a> {
    /// A shared HMAC secret.
    Secret(&'a [u8]),
    /// PEM-encoded RSA or EC private key (signing) or public key / certificate (verification).
    /// Key type is detected from the PEM header.
    Pem(&'a str),
}

/// Sign `payload` as a compact JWS using `alg` and `key`.
pub fn jws_sign<T: Serialize>(payload: &T, alg: JwsAlg, key: &KeyMaterial<'_>) -> Result<String> {
    let header = jsonwebtoken::Header::new(alg.to_jsonwebtoken());
    let encoding_key = match key {
        KeyMaterial::Secret(secret) => {
            if !alg.is_hmac() {
                return Err(Error::Crypto(format!(
                    "{alg:?} requires PEM key material, not a shared secret"
                )));
            }
            EncodingKey::from_secret(secret)
        }
        KeyMaterial::Pem(pem) => {
            if alg.is_hmac() {
                return Err(Error::Crypto(format!(
                    "{alg:?} requires a shared secret, not PEM key material"
                )));
            }
            encoding_key_from_pem(pem, alg)?
        }
    };
    jsonwebtoken::encode(&header, payload, &encoding_key)
        .map_err(|e| Error::Crypto(format!("jws sign: {e}")))
}

/// Verify a compact JWS's signature (claims are validated separately by C3).
pub fn jws_verify(compact_jws: &str, alg: JwsAlg, key: &KeyMaterial<'_>) -> Result<bool> {
    let decoding_key = match key {
        KeyMaterial::Secret(secret) => DecodingKey::from_secret(secret),
        KeyMaterial::Pem(pem) => decoding_key_from_pem(pem, alg)?,
    };
    let mut validation = Validation::new(alg.to_jsonwebtoken());
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.required_spec_claims.clear();
    match jsonwebtoken::decode::<serde_json::Value>(compact_jws, &decoding_key, &validation) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), jsonwebtoken::errors::ErrorKind::InvalidSignature) => {
            Ok(false)
        }
        Err(e) => Err(Error::Crypto(format!("jws verify: {e}"))),
    }
}

fn encoding_key_from_pem(pem: &str, alg: JwsAlg) -> Result<EncodingKey> {
    let is_ec = pem.contains("EC PRIVATE KEY") || matches!(alg, JwsAlg::Es256 | JwsAlg::Es384);
    if is_ec {
        EncodingKey::from_ec_pem(pem.as_bytes())
            .map_err(|e| Error::Crypto(format!("invalid EC private key: {e}")))
    } else {
        EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| Error::Crypto(format!("invalid RSA private key: {e}")))
    }
}

fn decoding_key_from_pem(pem: &str, alg: JwsAlg) -> Result<DecodingKey> {
    let is_ec = pem.contains("BEGIN EC") || matches!(alg, JwsAlg::Es256 | JwsAlg::Es384);
    if pem.contains("BEGIN CERTIFICATE") {
        return DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| Error::Crypto(format!("invalid certificate: {e}")));
    }
    if is_ec {
        DecodingKey::from_ec_pem(pem.as_bytes())
            .map_err(|e| Error::Crypto(format!("invalid EC public key: {e}")))
    } else {
        DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| Error::Crypto(format!("invalid RSA public key: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RFC 7636 Appendix B PKCE derivation.
    #[test]
    fn pkce_matches_rfc7636_appendix_b() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = pkce_challenge_from_verifier(verifier);
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn pkce_new_produces_spec_compliant_verifier() {
        for _ in 0..50 {
            let p = pkce_new();
            assert!(p.verifier.len() >= 43 && p.verifier.len() <= 128);
            assert_eq!(pkce_challenge_from_verifier(&p.verifier), p.challenge);
        }
    }

    #[test]
    fn random_state_is_256_bits_of_hex_by_default() {
        let s = random_state(256);
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hmac_roundtrip() {
        let claims = serde_json::json!({"sub": "client", "iat": 1});
        let key = KeyMaterial::Secret(b"shh");
        let jws = jws_sign(&claims, JwsAlg::Hs256, &key).unwrap();
        assert!(jws_verify(&jws, JwsAlg::Hs256, &key).unwrap());

        let wrong_key = KeyMaterial::Secret(b"wrong");
        assert!(!jws_verify(&jws, JwsAlg::Hs256, &wrong_key).unwrap());
    }

    #[test]
    fn b64url_roundtrip() {
        let data = b"hello \x00\x01 world";
        let encoded = b64url_encode(data);
        assert!(!encoded.contains('='));
        assert_eq!(b64url_decode(&encoded).unwrap(), data);
    }
}
