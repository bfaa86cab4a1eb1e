//! Access token decoding.
//!
//! Tokens are JWTs in compact form. Only the payload is decoded, and only to
//! read the `exp` claim: signature verification is the backend's job.
//! A payload without a usable `exp` decodes as already expired, so the caller
//! tries a refresh instead of discarding it.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("expected 3 dot-separated segments, found {0}")]
    SegmentCount(usize),

    #[error("payload is not valid base64url")]
    Encoding,

    #[error("payload is not a JSON object")]
    Payload,

}

/// The current bearer credential with its decoded expiry.
#[derive(Clone, PartialEq)]
pub struct AccessToken {
    raw: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Decode the token's claims without contacting the server.
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let raw = raw.trim();
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() != 3 {
            return Err(TokenError::SegmentCount(segments.len()));
        }

        let payload = URL_SAFE_NO_PAD
            .decode(segments[1].trim_end_matches('='))
            .map_err(|_| TokenError::Encoding)?;

        let claims: JsonValue = serde_json::from_slice(&payload).map_err(|_| TokenError::Payload)?;
        if !claims.is_object() {
            return Err(TokenError::Payload);
        }

        let expires_at = claims
            .get("exp")
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .and_then(|exp| DateTime::from_timestamp(exp, 0))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        Ok(Self {
            raw: raw.to_string(),
            expires_at,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Expired means the expiry is now or already past.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
