// Error handling module
// Defines client error types and how server responses map onto them

use thiserror::Error;

/// Failure to decode a bearer token payload
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Token does not have the header.payload.signature shape
    #[error("Token has no payload segment")]
    MissingPayload,

    /// Payload segment is not valid base64url
    #[error("Token payload is not valid base64: {0}")]
    Base64(String),

    /// Payload is not a JSON claims object
    #[error("Token payload is not valid JSON: {0}")]
    Json(String),
}

/// Failure of the refresh call itself
///
/// Cloneable so a single outcome can be handed to every queued request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    /// The authentication service rejected the refresh credential
    #[error("Refresh rejected: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// No response was received from the authentication service
    #[error("Refresh request failed: {0}")]
    Network(String),

    /// The response did not contain a usable token
    #[error("Refresh response malformed: {0}")]
    Malformed(String),

    /// The refreshing task was dropped before the call settled
    #[error("Refresh abandoned before completion")]
    Abandoned,
}

/// Errors surfaced by the bookshelf client
#[derive(Error, Debug)]
pub enum ClientError {
    /// Server rejected the presented credential
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// Bad credentials or input, message is shown to the user verbatim
    #[error("{message}")]
    Validation { status: u16, message: String },

    /// No response received
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed bearer token
    #[error("Invalid session token: {0}")]
    Decode(#[from] DecodeError),

    /// Session could not be renewed
    #[error("Session refresh failed: {0}")]
    Refresh(#[from] RefreshError),

    /// Any other non-success response
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Local session storage failed
    #[error("Session storage error: {0}")]
    Storage(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ClientError {
    /// Map a non-success status and body onto an error kind
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = extract_message(body);
        match status {
            401 => ClientError::Authorization(message),
            400 | 409 | 422 => ClientError::Validation { status, message },
            _ => ClientError::Api { status, message },
        }
    }

    /// Check if this is an authorization failure
    pub fn is_auth_error(&self) -> bool {
        matches!(self, ClientError::Authorization(_))
    }

    /// Check if the user must log in again
    pub fn is_session_lost(&self) -> bool {
        matches!(
            self,
            ClientError::Authorization(_) | ClientError::Refresh(_) | ClientError::Decode(_)
        )
    }
}

/// Pull a human readable message out of an error body
///
/// Spring-style bodies carry `message`, some carry `error`; anything else
/// is returned as-is.
fn extract_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "error"] {
            if let Some(msg) = json.get(key).and_then(|v| v.as_str()) {
                return msg.to_string();
            }
        }
    }
    body.trim().to_string()
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
