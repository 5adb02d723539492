use anyhow::{Context, Result};
use reqwest::header::{AUTHORIZATION, COOKIE};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{cookie, CookieRefresher, SessionManager, SessionStore, TokenInspector};
use crate::error::ClientError;

/// Endpoints of the authentication service itself
const AUTH_PREFIX: &str = "/auth/";

/// Join an API path onto the base URL, keeping any base path prefix
pub fn endpoint(base_url: &Url, path: &str) -> Result<Url, url::ParseError> {
    let base = base_url.as_str().trim_end_matches('/');
    Url::parse(&format!("{}/{}", base, path.trim_start_matches('/')))
}

/// Outbound request descriptor
///
/// Records its own retry state so "retried at most once" does not depend on
/// the transport's request type.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    segments: Vec<String>,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            segments: Vec::new(),
            query: Vec::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a percent-encoded path segment
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, ClientError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ClientError::Internal(anyhow::anyhow!("Failed to encode body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// Requests to the authentication service carry no bearer token and
    /// never trigger a refresh
    pub fn is_auth_route(&self) -> bool {
        self.path.starts_with(AUTH_PREFIX)
    }

    /// Whether a 401 on this request may be recovered by refreshing
    pub fn may_refresh(&self) -> bool {
        !self.is_auth_route() && !self.retried
    }

    fn mark_retried(&mut self) {
        self.retried = true;
    }
}

/// HTTP client for the bookshelf API
/// Attaches the bearer token and recovers from rejected tokens by refreshing
/// once and replaying the request.
pub struct BookshelfHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// API origin
    base_url: Url,

    /// Token lifecycle and refresh coordination
    session: Arc<SessionManager>,
}

impl BookshelfHttpClient {
    pub fn new(client: Client, base_url: Url, session: Arc<SessionManager>) -> Self {
        Self {
            client,
            base_url,
            session,
        }
    }

    /// Build the underlying HTTP client
    pub fn build_client(connect_timeout: u64, request_timeout: u64) -> Result<Client> {
        Client::builder()
            .pool_max_idle_per_host(8)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")
    }

    /// Wire a client whose refresh uses the server's refresh cookie
    pub fn connect(
        base_url: Url,
        store: Arc<dyn SessionStore>,
        inspector: TokenInspector,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Self::build_client(connect_timeout, request_timeout)?;
        let refresher = CookieRefresher::new(client.clone(), base_url.clone(), store.clone());
        let session = Arc::new(SessionManager::new(store, Arc::new(refresher), inspector));
        Ok(Self::new(client, base_url, session))
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Execute a request, refreshing the session at most once on 401
    pub async fn execute(&self, mut request: ApiRequest) -> Result<Response, ClientError> {
        let mut fresh_token: Option<String> = None;

        tracing::debug!(
            method = %request.method,
            path = %request.path,
            "Sending HTTP request"
        );

        loop {
            let bearer = if request.is_auth_route() {
                None
            } else {
                // Re-read after every suspension, the token may have rotated
                fresh_token.take().or_else(|| self.session.current_token())
            };

            let req = self.build(&request, bearer.as_deref())?;
            let url = req.url().clone();

            let response = match self.client.execute(req).await {
                Ok(response) => response,
                Err(e) => {
                    let error_kind = if e.is_timeout() {
                        "timeout"
                    } else if e.is_connect() {
                        "connection_failed"
                    } else if e.is_request() {
                        "request_error"
                    } else if e.is_body() {
                        "body_error"
                    } else {
                        "unknown"
                    };

                    tracing::warn!(
                        error_kind = error_kind,
                        error = %e,
                        url = %url,
                        "HTTP request error"
                    );
                    return Err(ClientError::Network(format!("{} (kind: {})", e, error_kind)));
                }
            };

            cookie::capture(self.session.store().as_ref(), response.headers());

            let status = response.status();
            tracing::debug!(status = %status, url = %url, "Received HTTP response");

            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::UNAUTHORIZED && request.may_refresh() {
                tracing::info!(url = %url, "Received 401, refreshing session and retrying");
                request.mark_retried();
                let token = self.session.refresh_after_unauthorized().await?;
                fresh_token = Some(token);
                continue;
            }

            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                url = %url,
                retried = request.is_retried(),
                response_body = %error_text,
                "HTTP request failed with error response"
            );
            return Err(ClientError::from_status(status.as_u16(), &error_text));
        }
    }

    /// Execute and decode a JSON response body
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ClientError> {
        let response = self.execute(request).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Internal(anyhow::anyhow!("Failed to parse response: {}", e)))
    }

    /// Execute and discard the response body
    pub async fn send_empty(&self, request: ApiRequest) -> Result<(), ClientError> {
        self.execute(request).await.map(|_| ())
    }

    fn build(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<reqwest::Request, ClientError> {
        let mut url = endpoint(&self.base_url, &request.path)
            .map_err(|e| ClientError::Internal(anyhow::anyhow!("Invalid request URL: {}", e)))?;

        if !request.segments.is_empty() {
            url.path_segments_mut()
                .map_err(|_| ClientError::Internal(anyhow::anyhow!("Base URL cannot take a path")))?
                .extend(&request.segments);
        }

        let mut builder = self.client.request(request.method.clone(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        if let Some(token) = bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(cookie) = cookie::header_value(self.session.store().as_ref()) {
            builder = builder.header(COOKIE, cookie);
        }

        builder
            .build()
            .map_err(|e| ClientError::Internal(anyhow::anyhow!("Failed to build request: {}", e)))
    }
}
