// Token refresh logic
// The refresh credential is an external contract behind the Refresher trait

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::{Client, Url};
use std::sync::Arc;

use super::cookie;
use super::store::{SessionStore, REFRESH_COOKIE_KEY};
use crate::error::{ClientError, RefreshError};
use crate::http_client::endpoint;
use crate::models::AuthResponse;

/// Path of the refresh endpoint
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Path of the logout endpoint
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Obtains new bearer tokens from the authentication service
#[async_trait]
pub trait Refresher: Send + Sync {
    /// Perform exactly one refresh call
    async fn refresh(&self) -> Result<String, RefreshError>;

    /// Tear down the server-side session artifact
    async fn end_session(&self) -> Result<(), ClientError>;
}

/// Refreshes using the `refreshToken` cookie issued at login
pub struct CookieRefresher {
    client: Client,
    base_url: Url,
    store: Arc<dyn SessionStore>,
}

impl CookieRefresher {
    pub fn new(client: Client, base_url: Url, store: Arc<dyn SessionStore>) -> Self {
        Self {
            client,
            base_url,
            store,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        endpoint(&self.base_url, path)
    }
}

#[async_trait]
impl Refresher for CookieRefresher {
    async fn refresh(&self) -> Result<String, RefreshError> {
        tracing::info!("Refreshing bearer token...");

        let url = self
            .endpoint(REFRESH_PATH)
            .map_err(|e| RefreshError::Network(format!("Invalid refresh URL: {}", e)))?;

        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(&serde_json::json!({}));
        if let Some(cookie) = cookie::header_value(self.store.as_ref()) {
            request = request.header(COOKIE, cookie);
        } else {
            tracing::debug!("No refresh cookie held, server will likely reject refresh");
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!(error = %e, "Refresh request did not complete");
            RefreshError::Network(e.to_string())
        })?;

        let status = response.status();
        cookie::capture(self.store.as_ref(), response.headers());

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %error_text, "Refresh rejected");
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let data: AuthResponse = response
            .json()
            .await
            .map_err(|e| RefreshError::Malformed(e.to_string()))?;

        if data.token.is_empty() {
            return Err(RefreshError::Malformed(
                "Refresh response does not contain token".to_string(),
            ));
        }

        let preview: String = data.token.chars().take(12).collect();
        tracing::info!("Bearer token refreshed (token: {}...)", preview);

        Ok(data.token)
    }

    async fn end_session(&self) -> Result<(), ClientError> {
        let url = self
            .endpoint(LOGOUT_PATH)
            .map_err(|e| ClientError::Internal(e.into()))?;

        let mut request = self.client.post(url).json(&serde_json::json!({}));
        if let Some(cookie) = cookie::header_value(self.store.as_ref()) {
            request = request.header(COOKIE, cookie);
        }

        let result = request.send().await;

        // Local credential goes regardless of what the server says
        if let Err(e) = self.store.remove(REFRESH_COOKIE_KEY) {
            tracing::warn!("Failed to clear refresh cookie: {:#}", e);
        }

        let response = result.map_err(|e| ClientError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::from_status(status.as_u16(), &body));
        }
        Ok(())
    }
}
