// Refresh cookie handling
// The authentication service identifies the session to refresh by an
// HttpOnly cookie; the client keeps it in the session store.

use reqwest::header::{HeaderMap, SET_COOKIE};

use super::store::{SessionStore, REFRESH_COOKIE_KEY};

/// Name of the cookie carrying the refresh credential
pub const REFRESH_COOKIE_NAME: &str = "refreshToken";

/// Change to the refresh cookie announced by a response
#[derive(Debug, Clone, PartialEq)]
pub enum CookieUpdate {
    Set(String),
    Cleared,
}

/// Parse one `Set-Cookie` value for the refresh cookie
pub fn parse_set_cookie(raw: &str) -> Option<CookieUpdate> {
    let mut parts = raw.split(';').map(str::trim);
    let (name, value) = parts.next()?.split_once('=')?;
    if name.trim() != REFRESH_COOKIE_NAME {
        return None;
    }

    let value = value.trim().trim_matches('"');
    let expired = parts.any(|attr| {
        attr.split_once('=')
            .map(|(k, v)| k.trim().eq_ignore_ascii_case("max-age") && v.trim() == "0")
            .unwrap_or(false)
    });

    if value.is_empty() || expired {
        Some(CookieUpdate::Cleared)
    } else {
        Some(CookieUpdate::Set(value.to_string()))
    }
}

/// Find the last refresh cookie update among response headers
pub fn from_headers(headers: &HeaderMap) -> Option<CookieUpdate> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(parse_set_cookie)
        .last()
}

/// Record a cookie update from response headers in the store
pub fn capture(store: &dyn SessionStore, headers: &HeaderMap) {
    let result = match from_headers(headers) {
        Some(CookieUpdate::Set(value)) => {
            tracing::debug!("Storing refresh cookie");
            store.set(REFRESH_COOKIE_KEY, &value)
        }
        Some(CookieUpdate::Cleared) => {
            tracing::debug!("Refresh cookie cleared by server");
            store.remove(REFRESH_COOKIE_KEY)
        }
        None => Ok(()),
    };

    if let Err(e) = result {
        tracing::warn!("Failed to persist refresh cookie: {:#}", e);
    }
}

/// `Cookie` header value for outgoing requests, if a refresh cookie is held
pub fn header_value(store: &dyn SessionStore) -> Option<String> {
    store
        .get(REFRESH_COOKIE_KEY)
        .map(|value| format!("{}={}", REFRESH_COOKIE_NAME, value))
}
