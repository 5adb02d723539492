// Bearer token inspection
// Reads JWT claims on the client without verifying the signature

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};

use crate::error::DecodeError;
use crate::models::Claims;

/// Default safety margin subtracted from the token expiry (2 hours)
pub const DEFAULT_SAFETY_MARGIN_SECS: i64 = 2 * 60 * 60;

/// Decode the claims of a bearer token
///
/// Signature verification belongs to the authentication service.
pub fn decode_payload(token: &str) -> Result<Claims, DecodeError> {
    let mut segments = token.trim().split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
        _ => return Err(DecodeError::MissingPayload),
    };

    // Some issuers keep the padding even though JWT forbids it
    let bytes = if payload.ends_with('=') {
        URL_SAFE.decode(payload)
    } else {
        URL_SAFE_NO_PAD.decode(payload)
    }
    .map_err(|e| DecodeError::Base64(e.to_string()))?;

    serde_json::from_slice(&bytes).map_err(|e| DecodeError::Json(e.to_string()))
}

/// Subject of the token, usually the user's email
pub fn subject(token: &str) -> Option<String> {
    decode_payload(token).ok().and_then(|claims| claims.sub)
}

/// Expiry time of the token, if it decodes and carries `exp`
pub fn expires_at(token: &str) -> Option<DateTime<Utc>> {
    let exp = decode_payload(token).ok()?.exp?;
    DateTime::from_timestamp(exp, 0)
}

/// Decides whether a token is still usable
#[derive(Debug, Clone, Copy)]
pub struct TokenInspector {
    safety_margin: Duration,
}

impl TokenInspector {
    pub fn new(safety_margin: Duration) -> Self {
        Self { safety_margin }
    }

    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    /// Check expiry against the current clock
    pub fn is_expired(&self, token: &str) -> bool {
        self.is_expired_at(token, Utc::now())
    }

    /// Check expiry against a given instant
    ///
    /// Expired when `now > exp - margin`, compared in milliseconds. Anything
    /// that fails to decode or has no `exp` is expired.
    pub fn is_expired_at(&self, token: &str, now: DateTime<Utc>) -> bool {
        if token.is_empty() {
            return true;
        }

        let exp = match decode_payload(token) {
            Ok(Claims { exp: Some(exp), .. }) => exp,
            Ok(_) => {
                tracing::debug!("Token has no exp claim, treating as expired");
                return true;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Token failed to decode, treating as expired");
                return true;
            }
        };

        let expiry_ms = exp.saturating_mul(1000);
        let deadline_ms = expiry_ms.saturating_sub(self.safety_margin.num_milliseconds());
        now.timestamp_millis() > deadline_ms
    }
}

impl Default for TokenInspector {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_SAFETY_MARGIN_SECS))
    }
}
