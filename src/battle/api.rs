//! Battle service client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, COOKIE};
use reqwest::{Client, RequestBuilder};

use crate::battle::models::{CreateBattleRequest, VoteRequest};
use crate::http::{browser_headers, ApiError, HttpReply};

const API_TIMEOUT: Duration = Duration::from_secs(30);
const VOTE_TIMEOUT: Duration = Duration::from_secs(15);

/// Calls the orchestrator makes against the arena.
///
/// Replies come back whatever their status; classification is the caller's job.
#[async_trait]
pub trait ArenaApi: Send + Sync {
    /// `POST /deploy/battle`, bearer-authenticated
    async fn create_battle(&self, request: &CreateBattleRequest) -> Result<HttpReply, ApiError>;

    /// `POST /battles/{id}/run` with an empty body, bearer-authenticated and
    /// carrying the session cookie when one is known
    async fn run_battle(&self, battle_id: &str, cookie: Option<&str>)
        -> Result<HttpReply, ApiError>;

    /// `GET /battles/{id}`
    async fn get_battle(&self, battle_id: &str) -> Result<HttpReply, ApiError>;

    /// `POST /battles/{id}/vote`, cookie-authenticated
    async fn vote(&self, battle_id: &str, agent_id: &str, cookie: &str)
        -> Result<HttpReply, ApiError>;
}

pub struct HttpArenaApi {
    client: Client,
    api_base: String,
    api_key: String,
    headers: HeaderMap,
}

impl HttpArenaApi {
    pub fn new(client: Client, base_url: &str, api_key: impl Into<String>) -> Result<Self, ApiError> {
        let headers = browser_headers(base_url, &format!("{base_url}/battles/new"))?;
        Ok(Self {
            client,
            api_base: format!("{base_url}/api"),
            api_key: api_key.into(),
            headers,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    fn run_request(&self, battle_id: &str, cookie: Option<&str>) -> RequestBuilder {
        let request = self
            .client
            .post(self.url(&format!("/battles/{battle_id}/run")))
            .headers(self.same_origin_headers())
            .header(AUTHORIZATION, self.bearer())
            .header(CONTENT_LENGTH, "0")
            .timeout(API_TIMEOUT);
        match cookie {
            Some(cookie) => request.header(COOKIE, cookie),
            None => request,
        }
    }

    /// Fetch-metadata headers the browser attaches to same-origin calls
    fn same_origin_headers(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        headers.insert(
            "sec-ch-ua",
            HeaderValue::from_static(r#""Not:A-Brand";v="99","Google Chrome";v="145""#),
        );
        headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
        headers.insert("sec-fetch-dest", HeaderValue::from_static("empty"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("cors"));
        headers.insert("sec-fetch-site", HeaderValue::from_static("same-origin"));
        headers
    }
}

#[async_trait]
impl ArenaApi for HttpArenaApi {
    async fn create_battle(&self, request: &CreateBattleRequest) -> Result<HttpReply, ApiError> {
        let response = self
            .client
            .post(self.url("/deploy/battle"))
            .headers(self.headers.clone())
            .header(AUTHORIZATION, self.bearer())
            .json(request)
            .timeout(API_TIMEOUT)
            .send()
            .await?;
        let reply = HttpReply::from_response(response).await?;
        tracing::debug!(status = reply.status, "POST /deploy/battle");
        Ok(reply)
    }

    async fn run_battle(
        &self,
        battle_id: &str,
        cookie: Option<&str>,
    ) -> Result<HttpReply, ApiError> {
        let response = self.run_request(battle_id, cookie).send().await?;
        let reply = HttpReply::from_response(response).await?;
        tracing::debug!(status = reply.status, battle_id = %battle_id, "POST /run");
        Ok(reply)
    }

    async fn get_battle(&self, battle_id: &str) -> Result<HttpReply, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/battles/{battle_id}")))
            .headers(self.headers.clone())
            .timeout(API_TIMEOUT)
            .send()
            .await?;
        Ok(HttpReply::from_response(response).await?)
    }

    async fn vote(
        &self,
        battle_id: &str,
        agent_id: &str,
        cookie: &str,
    ) -> Result<HttpReply, ApiError> {
        let response = self
            .client
            .post(self.url(&format!("/battles/{battle_id}/vote")))
            .headers(self.same_origin_headers())
            .header(COOKIE, cookie)
            .json(&VoteRequest { agent_id })
            .timeout(VOTE_TIMEOUT)
            .send()
            .await?;
        let reply = HttpReply::from_response(response).await?;
        tracing::debug!(status = reply.status, battle_id = %battle_id, "POST /vote");
        Ok(reply)
    }
}
