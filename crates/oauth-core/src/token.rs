//! Shared token shapes (`TokenResponse`/`StoredToken`).

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// The raw JSON shape returned by a token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// A [`TokenResponse`] as persisted in the token store, keyed by `provider_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredToken {
    #[serde(flatten)]
    pub token: TokenResponse,
    pub provider_id: String,
    pub created_at_unix_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_unix_ms: Option<u64>,
}

impl StoredToken {
    #[must_use]
    pub fn new(provider_id: impl Into<String>, token: TokenResponse) -> Self {
        let created_at_unix_ms = now_unix_ms();
        let expires_at_unix_ms = token
            .expires_in
            .map(|secs| created_at_unix_ms + secs * 1000);
        Self {
            token,
            provider_id: provider_id.into(),
            created_at_unix_ms,
            expires_at_unix_ms,
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at_unix_ms
            .is_some_and(|exp| now_unix_ms() >= exp)
    }

    /// Apply a refresh-token grant's response, preserving the previous `refresh_token` when the
    /// response omits one.
    #[must_use]
    pub fn refreshed(&self, mut new_token: TokenResponse) -> Self {
        if new_token.refresh_token.is_none() {
            new_token.refresh_token = self.token.refresh_token.clone();
        }
        Self::new(self.provider_id.clone(), new_token)
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX_EPOCH")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(refresh: Option<&str>) -> TokenResponse {
        TokenResponse {
            access_token: "a".into(),
            token_type: "Bearer".into(),
            expires_in: Some(3600),
            refresh_token: refresh.map(str::to_string),
            scope: None,
            id_token: None,
        }
    }

    /// JSON round-trip.
    #[test]
    fn token_response_round_trips_through_json() {
        let t = token(Some("r1"));
        let json = serde_json::to_string(&t).unwrap();
        let back: TokenResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);
    }

    /// Refresh without a new refresh_token keeps the old one.
    #[test]
    fn refresh_without_new_refresh_token_keeps_old_one() {
        let stored = StoredToken::new("acme", token(Some("r1")));
        let refreshed = stored.refreshed(token(None));
        assert_eq!(refreshed.token.refresh_token.as_deref(), Some("r1"));
    }

    #[test]
    fn refresh_with_new_refresh_token_replaces_it() {
        let stored = StoredToken::new("acme", token(Some("r1")));
        let refreshed = stored.refreshed(token(Some("r2")));
        assert_eq!(refreshed.token.refresh_token.as_deref(), Some("r2"));
    }

    #[test]
    fn expires_at_is_created_at_plus_expires_in() {
        let stored = StoredToken::new("acme", token(None));
        let expected = stored.created_at_unix_ms + 3600 * 1000;
        assert_eq!(stored.expires_at_unix_ms, Some(expected));
    }
}
