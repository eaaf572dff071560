//! Scripted arena for deterministic testing
//!
//! Replies are queued per endpoint. Every call is recorded with the tokio
//! clock, so paused-time tests can assert on the spacing between calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

use crate::battle::api::ArenaApi;
use crate::battle::models::CreateBattleRequest;
use crate::http::{ApiError, HttpReply};
use crate::session::CredentialSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Create,
    Run,
    Get,
    Vote,
}

/// A call observed by [`MockArenaApi`]
#[derive(Debug, Clone)]
pub struct ArenaCall {
    pub endpoint: Endpoint,
    pub battle_id: Option<String>,
    /// Cookie sent with `run` or `vote`
    pub cookie: Option<String>,
    pub at: Instant,
}

#[derive(Default)]
struct Script {
    create: VecDeque<Result<HttpReply, String>>,
    run: VecDeque<Result<HttpReply, String>>,
    get: VecDeque<Result<HttpReply, String>>,
    vote: VecDeque<Result<HttpReply, String>>,
    /// Served once the `get` queue is empty
    sticky_get: Option<HttpReply>,
    calls: Vec<ArenaCall>,
}

impl Script {
    fn queue(&mut self, endpoint: Endpoint) -> &mut VecDeque<Result<HttpReply, String>> {
        match endpoint {
            Endpoint::Create => &mut self.create,
            Endpoint::Run => &mut self.run,
            Endpoint::Get => &mut self.get,
            Endpoint::Vote => &mut self.vote,
        }
    }

    fn next(
        &mut self,
        endpoint: Endpoint,
        battle_id: Option<&str>,
        cookie: Option<&str>,
    ) -> Result<HttpReply, ApiError> {
        self.calls.push(ArenaCall {
            endpoint,
            battle_id: battle_id.map(str::to_string),
            cookie: cookie.map(str::to_string),
            at: Instant::now(),
        });
        let sticky = match endpoint {
            Endpoint::Get => self.sticky_get.clone(),
            _ => None,
        };
        match self.queue(endpoint).pop_front() {
            Some(reply) => reply.map_err(ApiError::Transport),
            None => sticky.ok_or_else(|| ApiError::Transport(format!("no reply scripted for {endpoint:?}"))),
        }
    }
}

/// Arena client that replays queued replies.
///
/// An endpoint with nothing queued fails with a transport error, except
/// `get`, which falls back to the sticky reply when one is set.
#[derive(Clone, Default)]
pub struct MockArenaApi {
    script: Arc<Mutex<Script>>,
}

impl MockArenaApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(self, endpoint: Endpoint, replies: Vec<HttpReply>) -> Self {
        self.script
            .lock()
            .queue(endpoint)
            .extend(replies.into_iter().map(Ok));
        self
    }

    pub fn with_error(self, endpoint: Endpoint, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .queue(endpoint)
            .push_back(Err(message.into()));
        self
    }

    pub fn with_create(self, status: u16, body: Value) -> Self {
        self.with_replies(Endpoint::Create, vec![HttpReply::json_body(status, &body)])
    }

    pub fn with_run(self, statuses: &[u16]) -> Self {
        let replies = statuses
            .iter()
            .map(|status| HttpReply::json_body(*status, &serde_json::json!({})))
            .collect();
        self.with_replies(Endpoint::Run, replies)
    }

    pub fn with_battles(self, battles: Vec<Value>) -> Self {
        let replies = battles
            .iter()
            .map(|battle| HttpReply::json_body(200, battle))
            .collect();
        self.with_replies(Endpoint::Get, replies)
    }

    /// Answer every unscripted `get` with this battle
    pub fn with_sticky_battle(self, battle: Value) -> Self {
        self.script.lock().sticky_get = Some(HttpReply::json_body(200, &battle));
        self
    }

    pub fn with_votes(self, statuses: &[u16]) -> Self {
        let replies = statuses
            .iter()
            .map(|status| {
                HttpReply::json_body(
                    *status,
                    &serde_json::json!({"vote": {"voteWeight": 1}, "voteCounts": {"a": 1, "b": 0}}),
                )
            })
            .collect();
        self.with_replies(Endpoint::Vote, replies)
    }

    pub fn calls(&self) -> Vec<ArenaCall> {
        self.script.lock().calls.clone()
    }

    pub fn calls_to(&self, endpoint: Endpoint) -> Vec<ArenaCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.endpoint == endpoint)
            .collect()
    }
}

#[async_trait]
impl ArenaApi for MockArenaApi {
    async fn create_battle(&self, _request: &CreateBattleRequest) -> Result<HttpReply, ApiError> {
        self.script.lock().next(Endpoint::Create, None, None)
    }

    async fn run_battle(&self, battle_id: &str, cookie: Option<&str>) -> Result<HttpReply, ApiError> {
        self.script.lock().next(Endpoint::Run, Some(battle_id), cookie)
    }

    async fn get_battle(&self, battle_id: &str) -> Result<HttpReply, ApiError> {
        self.script.lock().next(Endpoint::Get, Some(battle_id), None)
    }

    async fn vote(&self, battle_id: &str, _agent_id: &str, cookie: &str) -> Result<HttpReply, ApiError> {
        self.script.lock().next(Endpoint::Vote, Some(battle_id), Some(cookie))
    }
}

/// Credential source with a fixed cookie and a scripted refresh answer
#[derive(Clone)]
pub struct MockCredentials {
    cookie: Arc<Mutex<Option<String>>>,
    refreshed_cookie: Option<String>,
    refreshes: Arc<AtomicUsize>,
}

impl MockCredentials {
    pub fn cookie(cookie: impl Into<String>) -> Self {
        Self {
            cookie: Arc::new(Mutex::new(Some(cookie.into()))),
            refreshed_cookie: None,
            refreshes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make `handle_unauthorized` succeed and swap in `cookie`
    pub fn refreshing_to(mut self, cookie: impl Into<String>) -> Self {
        self.refreshed_cookie = Some(cookie.into());
        self
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialSource for MockCredentials {
    fn credential(&self) -> Option<String> {
        self.cookie.lock().clone()
    }

    async fn handle_unauthorized(&self) -> bool {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        match &self.refreshed_cookie {
            Some(cookie) => {
                *self.cookie.lock() = Some(cookie.clone());
                true
            }
            None => false,
        }
    }
}
