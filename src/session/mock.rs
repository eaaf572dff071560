//! Scripted session collaborators for deterministic testing
//!
//! Each mock records what it was asked to do so tests can assert on call
//! order without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::{CredentialStore, StoreError};
use crate::http::{ApiError, HttpReply};
use crate::session::anon_key::AnonKeyDiscovery;
use crate::session::transport::SessionTransport;

/// A call observed by [`MockSessionTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Session {
        cookie: String,
    },
    Refresh {
        anon_key: String,
        refresh_token: String,
    },
}

#[derive(Default)]
struct Script {
    session: VecDeque<Result<HttpReply, String>>,
    refresh: VecDeque<Result<HttpReply, String>>,
    calls: Vec<SessionCall>,
}

/// Session transport that replays queued replies.
///
/// When a queue runs dry the session endpoint answers 401 and the refresh
/// endpoint answers 400.
#[derive(Clone, Default)]
pub struct MockSessionTransport {
    script: Arc<Mutex<Script>>,
}

impl MockSessionTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_replies(self, replies: Vec<HttpReply>) -> Self {
        self.script
            .lock()
            .session
            .extend(replies.into_iter().map(Ok));
        self
    }

    pub fn with_refresh_replies(self, replies: Vec<HttpReply>) -> Self {
        self.script
            .lock()
            .refresh
            .extend(replies.into_iter().map(Ok));
        self
    }

    /// Queue a transport failure on the session endpoint
    pub fn with_session_error(self, message: impl Into<String>) -> Self {
        self.script.lock().session.push_back(Err(message.into()));
        self
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        self.script.lock().calls.clone()
    }
}

#[async_trait]
impl SessionTransport for MockSessionTransport {
    async fn session(&self, cookie: &str) -> Result<HttpReply, ApiError> {
        let mut script = self.script.lock();
        script.calls.push(SessionCall::Session {
            cookie: cookie.to_string(),
        });
        script
            .session
            .pop_front()
            .unwrap_or_else(|| Ok(HttpReply::new(401, "{}")))
            .map_err(ApiError::Transport)
    }

    async fn refresh(&self, anon_key: &str, refresh_token: &str) -> Result<HttpReply, ApiError> {
        let mut script = self.script.lock();
        script.calls.push(SessionCall::Refresh {
            anon_key: anon_key.to_string(),
            refresh_token: refresh_token.to_string(),
        });
        script
            .refresh
            .pop_front()
            .unwrap_or_else(|| Ok(HttpReply::new(400, r#"{"error":"invalid_grant"}"#)))
            .map_err(ApiError::Transport)
    }
}

/// Discovery that always yields the same answer and counts lookups
#[derive(Clone)]
pub struct StaticDiscovery {
    key: Option<String>,
    lookups: Arc<AtomicUsize>,
}

impl StaticDiscovery {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            lookups: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn none() -> Self {
        Self {
            key: None,
            lookups: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnonKeyDiscovery for StaticDiscovery {
    async fn discover(&self) -> Option<String> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.key.clone()
    }
}

/// In-memory credential store
#[derive(Clone, Default)]
pub struct MemoryStore {
    saved: Arc<Mutex<Vec<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<String> {
        self.saved.lock().clone()
    }
}

impl CredentialStore for MemoryStore {
    fn persist(&self, cookie: &str) -> Result<(), StoreError> {
        self.saved.lock().push(cookie.to_string());
        Ok(())
    }
}
