//! Calls the keeper makes against the arena's session endpoint and the identity provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE};
use reqwest::Client;
use serde::Serialize;

use crate::http::{browser_headers, ApiError, HttpReply};

const SESSION_TIMEOUT: Duration = Duration::from_secs(15);
const REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// `GET /api/auth/session` with the given cookie
    async fn session(&self, cookie: &str) -> Result<HttpReply, ApiError>;

    /// `POST /auth/v1/token?grant_type=refresh_token` on the identity provider
    async fn refresh(&self, anon_key: &str, refresh_token: &str) -> Result<HttpReply, ApiError>;
}

pub struct HttpSessionTransport {
    client: Client,
    base_url: String,
    identity_url: String,
}

impl HttpSessionTransport {
    pub fn new(client: Client, base_url: impl Into<String>, identity_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            identity_url: identity_url.into(),
        }
    }
}

#[async_trait]
impl SessionTransport for HttpSessionTransport {
    async fn session(&self, cookie: &str) -> Result<HttpReply, ApiError> {
        let url = format!("{}/api/auth/session", self.base_url);
        let response = self
            .client
            .get(&url)
            .headers(browser_headers(&self.base_url, &format!("{}/", self.base_url))?)
            .header(ACCEPT, "application/json")
            .header(COOKIE, cookie)
            .timeout(SESSION_TIMEOUT)
            .send()
            .await?;
        let reply = HttpReply::from_response(response).await?;
        tracing::debug!(status = reply.status, "Session check");
        Ok(reply)
    }

    async fn refresh(&self, anon_key: &str, refresh_token: &str) -> Result<HttpReply, ApiError> {
        let url = format!("{}/auth/v1/token?grant_type=refresh_token", self.identity_url);
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header("apikey", anon_key)
            .json(&RefreshRequest { refresh_token })
            .timeout(REFRESH_TIMEOUT)
            .send()
            .await?;
        let reply = HttpReply::from_response(response).await?;
        tracing::debug!(status = reply.status, "Identity token refresh");
        Ok(reply)
    }
}
