//! Token store: encrypted-at-rest persistence of tokens, keyed by `provider_id`.
//!
//! AES-256-GCM with `zeroize` on raw key material, a PBKDF2 password-derivation path, and
//! persisted on-disk key/salt files for the case where no key material is supplied by the
//! environment.

use crate::error::{Error, Result};
use crate::token::{StoredToken, TokenResponse};
use aes_gcm::aead::{Aead as _, Payload};
use aes_gcm::{Aes256Gcm, KeyInit as _, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD as BASE64_STANDARD, URL_SAFE_NO_PAD};
use parking_lot::Mutex;
use rand_core::{OsRng, TryRngCore as _};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use zeroize::Zeroize as _;

const PBKDF2_ITERATIONS: u32 = 100_000;
const PASSWORD_SENTINEL: &str = "pw:";
const KEY_ENV_VAR: &str = "OAUTH_CLI_TOKEN_STORE_KEY";

/// Encrypted, serialized map of `provider_id -> StoredToken`, persisted under one directory.
pub struct TokenStore {
    dir: PathBuf,
    cipher: Aes256Gcm,
    write_lock: Mutex<()>,
}

impl TokenStore {
    /// Open (creating if needed) a token store rooted at `dir`, resolving the encryption key in
    /// the order:
    /// 1. `OAUTH_CLI_TOKEN_STORE_KEY` containing 32 raw bytes (hex or base64).
    /// 2. The same variable prefixed `pw:`, meaning "derive a key from this password" via
    ///    PBKDF2-SHA256 against a salt persisted at `<dir>/salt`.
    /// 3. A key file at `<dir>/key`, generated on first use with mode `0o600`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        set_owner_only(&dir)?;

        let key = resolve_key(&dir)?;
        let cipher = Aes256Gcm::new((&key).into());
        Ok(Self {
            dir,
            cipher,
            write_lock: Mutex::new(()),
        })
    }

    fn blob_path(&self) -> PathBuf {
        self.dir.join("tokens.enc")
    }

    fn load_all(&self) -> Result<HashMap<String, StoredToken>> {
        let bytes = match std::fs::read(self.blob_path()) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(Error::Io(e)),
        };
        if bytes.len() < 12 {
            tracing::warn!("token store file is smaller than a nonce; starting empty");
            return Ok(HashMap::new());
        }
        let (nonce, ciphertext) = bytes.split_at(12);
        let plaintext = match self.cipher.decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: b"oauth-cli-token-store-v1",
            },
        ) {
            Ok(pt) => pt,
            Err(_) => {
                tracing::warn!("token store file failed to decrypt; starting empty");
                return Ok(HashMap::new());
            }
        };
        match serde_json::from_slice(&plaintext) {
            Ok(map) => Ok(map),
            Err(_) => {
                tracing::warn!("token store file contains invalid json; starting empty");
                Ok(HashMap::new())
            }
        }
    }

    fn save_all(&self, map: &HashMap<String, StoredToken>) -> Result<()> {
        let plaintext = serde_json::to_vec(map)?;
        let mut nonce_bytes = [0u8; 12];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|e| Error::EncryptedWrite(e.to_string()))?;

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &plaintext,
                    aad: b"oauth-cli-token-store-v1",
                },
            )
            .map_err(|e| Error::EncryptedWrite(format!("{e:?}")))?;

        let mut out = Vec::with_capacity(12 + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);

        let final_path = self.blob_path();
        let tmp_path = self.dir.join("tokens.enc.tmp");
        std::fs::write(&tmp_path, &out)?;
        set_owner_only(&tmp_path)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Store (or overwrite) the token for `provider_id`.
    pub fn store(&self, provider_id: &str, token: TokenResponse) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut map = self.load_all()?;
        map.insert(provider_id.to_string(), StoredToken::new(provider_id, token));
        self.save_all(&map)
    }

    /// Store a pre-built [`StoredToken`] (used by the refresh grant, which preserves the prior
    /// `refresh_token` when the response omits one).
    pub fn store_entry(&self, entry: StoredToken) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut map = self.load_all()?;
        map.insert(entry.provider_id.clone(), entry);
        self.save_all(&map)
    }

    /// Returns `None` if absent or expired; an expired entry is deleted as a side effect.
    pub fn get(&self, provider_id: &str) -> Result<Option<StoredToken>> {
        let _guard = self.write_lock.lock();
        let mut map = self.load_all()?;
        let Some(entry) = map.get(provider_id).cloned() else {
            return Ok(None);
        };
        if entry.is_expired() {
            map.remove(provider_id);
            self.save_all(&map)?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub fn delete(&self, provider_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut map = self.load_all()?;
        map.remove(provider_id);
        self.save_all(&map)
    }

    pub fn clear_all(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.save_all(&HashMap::new())
    }

    pub fn list_providers(&self) -> Result<Vec<String>> {
        let _guard = self.write_lock.lock();
        let mut ids: Vec<String> = self.load_all()?.into_keys().collect();
        ids.sort();
        Ok(ids)
    }
}

fn resolve_key(dir: &Path) -> Result<[u8; 32]> {
    if let Ok(raw) = std::env::var(KEY_ENV_VAR) {
        if let Some(password) = raw.strip_prefix(PASSWORD_SENTINEL) {
            return derive_key_from_password(dir, password);
        }
        if let Some(key) = decode_raw_key(&raw) {
            return Ok(key);
        }
        return Err(Error::KeyMaterialInvalid(format!(
            "{KEY_ENV_VAR} must be 32 raw bytes (hex/base64) or start with '{PASSWORD_SENTINEL}'"
        )));
    }

    load_or_generate_key_file(dir)
}

fn decode_raw_key(raw: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(raw)
        .ok()
        .or_else(|| URL_SAFE_NO_PAD.decode(raw).ok())
        .or_else(|| BASE64_STANDARD.decode(raw).ok())?;
    if bytes.len() != 32 {
        return None;
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Some(key)
}

fn derive_key_from_password(dir: &Path, password: &str) -> Result<[u8; 32]> {
    let salt_path = dir.join("salt");
    let salt = match std::fs::read(&salt_path) {
        Ok(bytes) if bytes.len() == 16 => bytes,
        _ => {
            let mut salt = [0u8; 16];
            OsRng
                .try_fill_bytes(&mut salt)
                .map_err(|e| Error::KeyMaterialInvalid(e.to_string()))?;
            std::fs::write(&salt_path, salt)?;
            set_owner_only(&salt_path)?;
            salt.to_vec()
        }
    };

    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut key);
    Ok(key)
}

fn load_or_generate_key_file(dir: &Path) -> Result<[u8; 32]> {
    let key_path = dir.join("key");
    if let Ok(bytes) = std::fs::read(&key_path)
        && bytes.len() == 32
    {
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        return Ok(key);
    }

    if std::env::var("OAUTH_CLI_DEV").is_err() {
        tracing::warn!(
            path = %key_path.display(),
            "auto-generating a token-store encryption key; set {KEY_ENV_VAR} explicitly \
             in production-like environments so the key survives reinstallation"
        );
    }

    let mut key = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut key)
        .map_err(|e| Error::KeyMaterialInvalid(e.to_string()))?;
    std::fs::write(&key_path, key)?;
    set_owner_only(&key_path)?;

    let mut zeroizable = key;
    let result = key;
    zeroizable.zeroize();
    Ok(result)
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    let metadata = std::fs::metadata(path)?;
    let mode = if metadata.is_dir() { 0o700 } else { 0o600 };
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenResponse;
    use serial_test::serial;

    fn token(access: &str) -> TokenResponse {
        TokenResponse {
            access_token: access.into(),
            token_type: "Bearer".into(),
            expires_in: Some(3600),
            refresh_token: Some("r1".into()),
            scope: None,
            id_token: None,
        }
    }

    #[test]
    #[serial]
    fn store_and_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        // SAFETY: test-local, sequential within this process's test binary.
        unsafe {
            std::env::set_var(KEY_ENV_VAR, "pw:test-password");
        }
        let store = TokenStore::open(dir.path()).unwrap();
        store.store("acme", token("tok1")).unwrap();

        let fetched = store.get("acme").unwrap().unwrap();
        assert_eq!(fetched.token.access_token, "tok1");
        unsafe {
            std::env::remove_var(KEY_ENV_VAR);
        }
    }

    #[test]
    #[serial]
    fn missing_file_loads_empty_silently() {
        let dir = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var(KEY_ENV_VAR, "pw:test-password");
        }
        let store = TokenStore::open(dir.path()).unwrap();
        assert!(store.get("nope").unwrap().is_none());
        assert_eq!(store.list_providers().unwrap(), Vec::<String>::new());
        unsafe {
            std::env::remove_var(KEY_ENV_VAR);
        }
    }

    #[test]
    #[serial]
    fn corrupt_file_starts_empty_without_erroring() {
        let dir = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var(KEY_ENV_VAR, "pw:test-password");
        }
        std::fs::write(dir.path().join("tokens.enc"), b"not even a valid blob").unwrap();
        let store = TokenStore::open(dir.path()).unwrap();
        assert!(store.get("acme").unwrap().is_none());
        unsafe {
            std::env::remove_var(KEY_ENV_VAR);
        }
    }

    #[test]
    #[serial]
    fn clear_all_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var(KEY_ENV_VAR, "pw:test-password");
        }
        let store = TokenStore::open(dir.path()).unwrap();
        store.store("a", token("1")).unwrap();
        store.store("b", token("2")).unwrap();
        store.clear_all().unwrap();
        assert_eq!(store.list_providers().unwrap(), Vec::<String>::new());
        unsafe {
            std::env::remove_var(KEY_ENV_VAR);
        }
    }

    #[test]
    #[serial]
    fn raw_hex_key_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let key_hex = hex::encode([7u8; 32]);
        unsafe {
            std::env::set_var(KEY_ENV_VAR, &key_hex);
        }
        let store = TokenStore::open(dir.path()).unwrap();
        store.store("acme", token("tok1")).unwrap();
        assert_eq!(
            store.get("acme").unwrap().unwrap().token.access_token,
            "tok1"
        );
        unsafe {
            std::env::remove_var(KEY_ENV_VAR);
        }
    }

    #[test]
    #[serial]
    fn key_file_is_generated_and_reused_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        unsafe {
            std::env::remove_var(KEY_ENV_VAR);
        }
        {
            let store = TokenStore::open(dir.path()).unwrap();
            store.store("acme", token("tok1")).unwrap();
        }
        let reopened = TokenStore::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get("acme").unwrap().unwrap().token.access_token,
            "tok1"
        );
    }
}
