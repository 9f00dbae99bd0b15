//! Token persistence and expiry decoding

use crate::error::Result;
use crate::storage::Storage;
use crate::types::{now_secs, TokenPair};
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const TOKEN_SET_AT_KEY: &str = "token_set_at";

/// Access and refresh tokens kept in durable storage
///
/// Cheap to clone; clones share the same storage.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn Storage>,
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<f64>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn access_token(&self) -> Option<String> {
        self.storage.get(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.storage.get(REFRESH_TOKEN_KEY)
    }

    /// Both tokens, or `None` if either half is missing.
    pub fn tokens(&self) -> Option<TokenPair> {
        Some(TokenPair {
            access_token: self.access_token()?,
            refresh_token: self.refresh_token()?,
        })
    }

    /// Seconds since epoch at which the current pair was stored.
    pub fn token_set_at(&self) -> Option<i64> {
        self.storage.get(TOKEN_SET_AT_KEY)?.parse().ok()
    }

    /// Store a token pair, replacing whatever was there.
    ///
    /// If any write fails, everything is cleared so no half-replaced pair remains.
    pub fn store(&self, tokens: &TokenPair) -> Result<()> {
        if let Err(e) = self.write_pair(tokens) {
            warn!(error = %e, "Failed to store token pair, clearing credentials");
            if let Err(clear_err) = self.clear() {
                warn!(error = %clear_err, "Failed to clear credentials");
            }
            return Err(e);
        }
        debug!("Token pair stored");
        Ok(())
    }

    fn write_pair(&self, tokens: &TokenPair) -> Result<()> {
        self.storage.set(ACCESS_TOKEN_KEY, &tokens.access_token)?;
        self.storage.set(REFRESH_TOKEN_KEY, &tokens.refresh_token)?;
        self.storage.set(TOKEN_SET_AT_KEY, &now_secs().to_string())
    }

    /// Remove both tokens and the timestamp. Safe to call repeatedly.
    pub fn clear(&self) -> Result<()> {
        self.storage.remove(ACCESS_TOKEN_KEY)?;
        self.storage.remove(REFRESH_TOKEN_KEY)?;
        self.storage.remove(TOKEN_SET_AT_KEY)?;
        Ok(())
    }

    /// Check the stored access token against the clock. A missing token counts as expired.
    pub fn access_token_expired(&self) -> bool {
        self.access_token()
            .map(|token| is_expired(&token))
            .unwrap_or(true)
    }
}

/// Read the `exp` claim (seconds since epoch) without verifying the signature.
pub fn expires_at(token: &str) -> Option<i64> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) => payload.trim_end_matches('='),
        _ => return None,
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&bytes).ok()?;

    claim.exp.filter(|exp| exp.is_finite()).map(|exp| exp as i64)
}

/// Check if a token is expired at `now`. Undecodable tokens are expired.
pub fn is_expired_at(token: &str, now: i64) -> bool {
    match expires_at(token) {
        Some(exp) => exp <= now,
        None => true,
    }
}

/// Check if a token is expired
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, now_secs())
}

#[cfg(test)]
pub(crate) fn make_token(exp: i64) -> String {
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u-1","exp":{exp}}}"#));
    format!("eyJhbGciOiJIUzI1NiJ9.{payload}.signature")
}
