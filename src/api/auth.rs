use crate::error::{ClientError, Result};
use crate::http_client::{ApiRequest, BookshelfHttpClient};
use crate::models::{AuthRequest, AuthResponse};

/// Minimum password length accepted by login and registration
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Check credentials before sending them, mirroring the server's rules
pub fn validate_credentials(email: &str, password: &str) -> Result<()> {
    let invalid = |message: &str| ClientError::Validation {
        status: 400,
        message: message.to_string(),
    };

    if email.trim().is_empty() {
        return Err(invalid("Email must not be empty"));
    }
    if password.is_empty() {
        return Err(invalid("Password must not be empty"));
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(invalid("Password must be at least 8 characters long"));
    }
    Ok(())
}

/// A 401 from login means wrong credentials, not a lost session
fn bad_credentials(error: ClientError) -> ClientError {
    match error {
        ClientError::Authorization(message) => ClientError::Validation {
            status: 401,
            message: if message.is_empty() {
                "Invalid email or password".to_string()
            } else {
                message
            },
        },
        other => other,
    }
}

/// Authentication API
pub struct AuthApi<'a> {
    client: &'a BookshelfHttpClient,
}

impl<'a> AuthApi<'a> {
    pub(crate) fn new(client: &'a BookshelfHttpClient) -> Self {
        Self { client }
    }

    /// Log in and start a session
    pub async fn login(&self, email: &str, password: &str) -> Result<String> {
        validate_credentials(email, password)?;
        self.authenticate("/auth/login", email, password).await
    }

    /// Create an account and start a session
    pub async fn register(&self, email: &str, password: &str) -> Result<String> {
        validate_credentials(email, password)?;
        self.authenticate("/auth/register", email, password).await
    }

    /// Explicitly renew the bearer token
    pub async fn refresh(&self) -> Result<String> {
        Ok(self.client.session().refresh_after_unauthorized().await?)
    }

    /// Log out; server failures are logged, local state is always cleared
    pub async fn logout(&self) {
        self.client.session().end_session().await;
    }

    async fn authenticate(&self, path: &str, email: &str, password: &str) -> Result<String> {
        let body = AuthRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let response: AuthResponse = self
            .client
            .send_json(ApiRequest::post(path).json(&body)?)
            .await
            .map_err(bad_credentials)?;

        self.client.session().start_session(&response.token)?;
        Ok(response.token)
    }
}
