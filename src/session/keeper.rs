//! Keeps the voting session cookie alive for the life of the process.
//!
//! The identity provider's access token expires after an hour. A background
//! task refreshes it every [`REFRESH_INTERVAL`], preferring the structured
//! token-refresh call and falling back to a session ping that harvests any
//! renewed `Set-Cookie` values.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::CredentialStore;
use crate::http::is_truthy;
use crate::session::anon_key::AnonKeyDiscovery;
use crate::session::cookie::{AuthCookie, CookieError, CookieJar};
use crate::session::transport::SessionTransport;
use crate::session::CredentialSource;
use crate::util::truncate_chars;

/// Conservative against the provider's 60 minute token lifetime.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(45 * 60);

#[derive(Debug, Clone)]
pub struct KeeperSettings {
    pub refresh_interval: Duration,
    pub auto_refresh: bool,
    pub auth_cookie: AuthCookie,
}

impl KeeperSettings {
    pub fn for_project(project: &str) -> Self {
        Self {
            refresh_interval: REFRESH_INTERVAL,
            auto_refresh: true,
            auth_cookie: AuthCookie::for_project(project),
        }
    }
}

/// Result of a successful session introspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub expires: Option<String>,
}

#[derive(Debug, Default)]
struct TokenState {
    refresh_token: Option<String>,
    anon_key: Option<String>,
    analytics: CookieJar,
}

#[derive(Debug, Default)]
struct Health {
    last_success: Option<DateTime<Local>>,
    failures: u32,
}

struct KeeperCore {
    cookie: RwLock<String>,
    tokens: Mutex<TokenState>,
    health: Mutex<Health>,
    auth_cookie: AuthCookie,
    transport: Arc<dyn SessionTransport>,
    discovery: Arc<dyn AnonKeyDiscovery>,
    store: Arc<dyn CredentialStore>,
}

pub struct CredentialKeeper {
    core: Arc<KeeperCore>,
    settings: KeeperSettings,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CredentialKeeper {
    /// Parse `cookie` and extract the refresh token; never fails, a cookie
    /// without a decodable token leaves the keeper in ping-only mode.
    pub fn new(
        cookie: &str,
        settings: KeeperSettings,
        transport: Arc<dyn SessionTransport>,
        discovery: Arc<dyn AnonKeyDiscovery>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let core = KeeperCore {
            cookie: RwLock::new(cookie.trim().to_string()),
            tokens: Mutex::new(TokenState::default()),
            health: Mutex::new(Health::default()),
            auth_cookie: settings.auth_cookie.clone(),
            transport,
            discovery,
            store,
        };
        core.load_tokens(true);

        Self {
            core: Arc::new(core),
            settings,
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Validate the session once, then launch the periodic refresh task.
    pub async fn start(&self) {
        if self.core.cookie().is_empty() {
            tracing::warn!("Session cookie is empty; auto-refresh disabled");
            return;
        }
        if !self.settings.auto_refresh {
            tracing::info!("Session auto-refresh disabled");
            return;
        }
        if self.task.lock().is_some() {
            tracing::debug!("Session keeper already running");
            return;
        }

        match self.core.check_session().await {
            Some(info) => {
                let expiry = info
                    .expires
                    .as_deref()
                    .map(|value| truncate_chars(value, 19).replace('T', " "))
                    .unwrap_or_else(|| "unknown".to_string());
                tracing::info!(expiry = %expiry, "Session valid");
            }
            None => {
                tracing::warn!("Session invalid, attempting refresh");
                self.core.refresh().await;
            }
        }

        if self.core.has_refresh_token() && !self.core.has_anon_key() {
            self.core.discover_anon_key().await;
        }

        let interval = self.settings.refresh_interval;
        if self.core.has_refresh_token() {
            tracing::info!(
                interval_minutes = interval.as_secs() / 60,
                "Refresh token found, token refresh scheduled"
            );
        } else {
            tracing::warn!("Refresh token not found, falling back to session ping");
        }

        let core = Arc::clone(&self.core);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        core.refresh().await;
                    }
                }
            }
            tracing::debug!("Session refresh loop stopped");
        });
        *self.task.lock() = Some(handle);
    }

    /// Signal the refresh task to exit; an in-flight refresh runs to completion.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Whether the background task is alive
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Snapshot of the current cookie header
    pub fn cookie(&self) -> String {
        self.core.cookie()
    }

    /// Run one refresh cycle now.
    pub async fn refresh_now(&self) -> bool {
        self.core.refresh().await
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.core.tokens.lock().refresh_token.clone()
    }

    pub fn last_success(&self) -> Option<DateTime<Local>> {
        self.core.health.lock().last_success
    }

    pub fn failure_count(&self) -> u32 {
        self.core.health.lock().failures
    }

    /// One-line description for status output
    pub fn status(&self) -> String {
        if self.core.cookie().is_empty() {
            return "no cookie".to_string();
        }
        match self.last_success() {
            Some(at) => {
                let minutes = (Local::now() - at).num_minutes();
                format!("active (refreshed {minutes} minutes ago)")
            }
            None => "never refreshed".to_string(),
        }
    }
}

#[async_trait]
impl CredentialSource for CredentialKeeper {
    fn credential(&self) -> Option<String> {
        Some(self.core.cookie()).filter(|cookie| !cookie.is_empty())
    }

    async fn handle_unauthorized(&self) -> bool {
        tracing::info!("Credential rejected, refreshing session immediately");
        if self.core.refresh().await {
            tracing::info!("Session renewed, request can be retried");
            return true;
        }
        tracing::error!(
            "Session refresh failed; the session has fully expired. \
             Re-run setup and paste a fresh session cookie. \
             Battles continue, only auto-vote is skipped."
        );
        false
    }
}

impl Drop for CredentialKeeper {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl KeeperCore {
    fn cookie(&self) -> String {
        self.cookie.read().clone()
    }

    fn has_refresh_token(&self) -> bool {
        self.tokens.lock().refresh_token.is_some()
    }

    fn has_anon_key(&self) -> bool {
        self.tokens.lock().anon_key.is_some()
    }

    /// Re-read refresh token and analytics fields from the current cookie.
    ///
    /// On the initial load every outcome is recorded; afterwards a cookie
    /// without a decodable token keeps the previously known refresh token.
    fn load_tokens(&self, initial: bool) {
        let jar = CookieJar::parse(&self.cookie());
        let decoded = self.auth_cookie.refresh_token(&jar);

        let mut tokens = self.tokens.lock();
        tokens.analytics = jar.analytics();
        match decoded {
            Ok(token) => {
                tracing::debug!(prefix = %truncate_chars(&token, 8), "Refresh token extracted");
                tokens.refresh_token = Some(token);
            }
            Err(CookieError::MissingAuthToken) => {
                if initial {
                    tracing::debug!(
                        cookie = %self.auth_cookie.chunk_name(0),
                        "Auth token cookie not found"
                    );
                }
            }
            Err(error) => {
                if initial {
                    tracing::debug!(error = %error, "Could not decode auth token, using session ping only");
                }
            }
        }
    }

    async fn check_session(&self) -> Option<SessionInfo> {
        let reply = match self.transport.session(&self.cookie()).await {
            Ok(reply) => reply,
            Err(error) => {
                tracing::debug!(error = %error, "Session check failed");
                return None;
            }
        };
        if reply.status != 200 {
            return None;
        }
        let body: Value = reply.json().ok()?;
        session_info(&body)
    }

    /// One refresh cycle; the first strategy that succeeds wins.
    async fn refresh(&self) -> bool {
        let (refresh_token, anon_key) = {
            let tokens = self.tokens.lock();
            (tokens.refresh_token.clone(), tokens.anon_key.clone())
        };

        if let Some(refresh_token) = refresh_token {
            let anon_key = match anon_key {
                Some(key) => Some(key),
                None => self.discover_anon_key().await,
            };
            if let Some(anon_key) = anon_key {
                if self.token_refresh(&anon_key, &refresh_token).await {
                    return true;
                }
            }
        }

        self.session_ping().await
    }

    async fn discover_anon_key(&self) -> Option<String> {
        if let Some(key) = self.tokens.lock().anon_key.clone() {
            return Some(key);
        }
        let key = self.discovery.discover().await?;
        tracing::info!("Identity anon key discovered");
        self.tokens.lock().anon_key = Some(key.clone());
        Some(key)
    }

    async fn token_refresh(&self, anon_key: &str, refresh_token: &str) -> bool {
        let reply = match self.transport.refresh(anon_key, refresh_token).await {
            Ok(reply) => reply,
            Err(error) => {
                tracing::error!(error = %error, "Token refresh request failed");
                return false;
            }
        };
        if reply.status != 200 {
            tracing::warn!(
                status = reply.status,
                body = %reply.snippet(80),
                "Token refresh rejected"
            );
            return false;
        }

        let token: Value = match reply.json() {
            Ok(token) => token,
            Err(error) => {
                tracing::warn!(error = %error, "Token refresh returned an unreadable body");
                return false;
            }
        };
        let has_access = token
            .get("access_token")
            .and_then(Value::as_str)
            .is_some_and(|access| !access.is_empty());
        if !has_access {
            tracing::warn!("Token refresh response had no access token");
            return false;
        }

        let analytics = {
            let mut tokens = self.tokens.lock();
            if let Some(next) = token
                .get("refresh_token")
                .and_then(Value::as_str)
                .filter(|next| !next.is_empty())
            {
                tokens.refresh_token = Some(next.to_string());
            }
            tokens.analytics.clone()
        };

        let cookie = self.auth_cookie.rebuild(&analytics, &token);
        *self.cookie.write() = cookie.clone();
        self.persist(&cookie);
        self.mark_success();
        tracing::info!(at = %Local::now().format("%H:%M:%S"), "Session token refreshed");
        true
    }

    async fn session_ping(&self) -> bool {
        let reply = match self.transport.session(&self.cookie()).await {
            Ok(reply) => reply,
            Err(error) => {
                self.mark_failure();
                tracing::error!(error = %error, "Session ping failed");
                return false;
            }
        };
        if reply.status != 200 {
            self.mark_failure();
            tracing::debug!(status = reply.status, "Session ping rejected");
            return false;
        }
        let alive = reply
            .json::<Value>()
            .ok()
            .and_then(|body| session_info(&body))
            .is_some();
        if !alive {
            self.mark_failure();
            tracing::debug!("Session ping returned no user");
            return false;
        }

        let renewed = CookieJar::from_set_cookies(&reply.set_cookies);
        if !renewed.is_empty() {
            let merged = {
                let mut cookie = self.cookie.write();
                let mut jar = CookieJar::parse(&cookie);
                if jar.merge(&renewed) {
                    *cookie = jar.to_header();
                    Some(cookie.clone())
                } else {
                    None
                }
            };
            if let Some(merged) = merged {
                self.persist(&merged);
                self.load_tokens(false);
                tracing::info!(
                    fields = renewed.len(),
                    at = %Local::now().format("%H:%M:%S"),
                    "Cookie renewed via session ping"
                );
            }
        }

        self.mark_success();
        true
    }

    fn persist(&self, cookie: &str) {
        if let Err(error) = self.store.persist(cookie) {
            tracing::error!(error = %error, "Failed to save refreshed cookie");
        }
    }

    fn mark_success(&self) {
        let mut health = self.health.lock();
        health.last_success = Some(Local::now());
        health.failures = 0;
    }

    fn mark_failure(&self) {
        self.health.lock().failures += 1;
    }
}

fn session_info(body: &Value) -> Option<SessionInfo> {
    let user = body.get("user").is_some_and(is_truthy);
    let expires = body
        .get("expires")
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    (user || expires.is_some()).then_some(SessionInfo { expires })
}
