use serde::{Deserialize, Serialize};

/// Body of login and register calls
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest {
    pub email: String,
    pub password: String,
}

/// Token returned by login, register and refresh
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub token: String,
}

/// Claims read from the token payload
///
/// Only the fields the client displays or checks are modelled.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
}
