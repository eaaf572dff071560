//! Drives one battle from creation to a terminal outcome.
//!
//! The cycle is `create -> run -> poll -> [vote -> finalize] -> outcome`.
//! Every remote call has an attempt ceiling or a wall-clock ceiling, and
//! every wait can be interrupted through the cycle's cancellation token.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::battle::api::ArenaApi;
use crate::battle::error::BattleError;
use crate::battle::models::{server_message, Battle, CreateBattleRequest, CreatedBattle, VoteReceipt};
use crate::battle::outcome::{derive_outcome, HistoryEntry, Outcome, Perspective};
use crate::http::ApiError;
use crate::session::CredentialSource;
use crate::util::{format_minutes, sleep_or_cancel, truncate_chars};

/// Words in a 400 message meaning the agent is still tied up in another battle.
///
/// Matching the server's free text is brittle; keep this list in sync with
/// the arena's wording.
pub const BUSY_KEYWORDS: [&str; 11] = [
    "already",
    "active",
    "ongoing",
    "in progress",
    "sedang",
    "berlangsung",
    "cooldown",
    "busy",
    "pending",
    "running",
    "duplicate",
];

/// Waits and ceilings of the battle cycle.
#[derive(Debug, Clone)]
pub struct BattleTimings {
    /// Pause after `run` before the first status poll
    pub first_poll_delay: Duration,
    pub poll_interval: Duration,
    /// Give up waiting for voting/completion after this long
    pub poll_ceiling: Duration,
    pub run_attempts: u32,
    /// Backoff after the n-th 500 from `run` is `n * run_backoff_step`
    pub run_backoff_step: Duration,
    /// Added to the remaining voting time before polling for the winner
    pub voting_buffer: Duration,
    /// Used when the battle carries no usable `votingEndsAt`
    pub voting_fallback: Duration,
    /// Longest single sleep while waiting out the vote
    pub wait_chunk: Duration,
    pub result_poll_ceiling: Duration,
    pub rate_limit_pause: Duration,
    pub busy_pause: Duration,
}

impl Default for BattleTimings {
    fn default() -> Self {
        Self {
            first_poll_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(15),
            poll_ceiling: Duration::from_secs(300),
            run_attempts: 3,
            run_backoff_step: Duration::from_secs(10),
            voting_buffer: Duration::from_secs(25),
            voting_fallback: Duration::from_secs(340),
            wait_chunk: Duration::from_secs(60),
            result_poll_ceiling: Duration::from_secs(480),
            rate_limit_pause: Duration::from_secs(300),
            busy_pause: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub agent_id: String,
    pub rounds: u32,
    /// Site root, used for battle links in the result log
    pub base_url: String,
    /// Configured cookie sent on the run call when the credential source has none
    pub session_cookie: Option<String>,
}

/// Classified reply to the create call
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(CreatedBattle),
    /// HTTP 401/403: the API key is no good
    Rejected { status: u16 },
    /// HTTP 429
    RateLimited,
    /// HTTP 400 whose message says the agent is mid-battle
    AgentBusy { message: String },
    /// Anything else, including transport failures
    Failed { status: Option<u16>, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    Cast { weight: String },
    AlreadyVoted,
    Unauthorized,
    /// No credential to vote with
    Skipped,
    Failed,
}

impl VoteOutcome {
    pub fn is_cast(&self) -> bool {
        matches!(self, VoteOutcome::Cast { .. })
    }
}

/// What the pre-voting poll observed
#[derive(Debug, Clone)]
pub struct PollResult {
    pub battle: Battle,
    /// Set when the poll saw the voting phase and voted inline
    pub vote: Option<VoteOutcome>,
}

/// Everything the loop needs to account for one battle
#[derive(Debug, Clone)]
pub struct BattleReport {
    pub battle_id: Option<String>,
    pub entry: HistoryEntry,
    pub battle: Option<Battle>,
    pub vote: Option<VoteOutcome>,
}

impl BattleReport {
    fn not_created() -> Self {
        Self {
            battle_id: None,
            entry: HistoryEntry::skipped(),
            battle: None,
            vote: None,
        }
    }

    pub fn outcome(&self) -> Outcome {
        self.entry.outcome
    }

    pub fn voted(&self) -> bool {
        self.vote.as_ref().is_some_and(VoteOutcome::is_cast)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    RateLimited,
    AgentBusy,
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// A battle was attempted and counts toward the tally
    Finished(BattleReport),
    /// Nothing was attempted; retry after `pause` without counting
    Deferred { reason: DeferReason, pause: Duration },
}

pub struct BattleOrchestrator {
    api: Arc<dyn ArenaApi>,
    credentials: Arc<dyn CredentialSource>,
    settings: OrchestratorSettings,
    timings: BattleTimings,
}

impl BattleOrchestrator {
    pub fn new(
        api: Arc<dyn ArenaApi>,
        credentials: Arc<dyn CredentialSource>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            api,
            credentials,
            settings,
            timings: BattleTimings::default(),
        }
    }

    pub fn with_timings(mut self, timings: BattleTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn timings(&self) -> &BattleTimings {
        &self.timings
    }

    /// Run one battle through to an outcome.
    ///
    /// Errors only for a rejected API key or cancellation; every other
    /// failure becomes a skip or a deferral.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleOutcome, BattleError> {
        tracing::info!("Step 1: creating battle");
        let created = match self.create().await {
            CreateOutcome::Created(created) => created,
            CreateOutcome::Rejected { status } => {
                tracing::error!(status, "API key rejected, stopping");
                return Err(BattleError::CredentialRejected { status });
            }
            CreateOutcome::RateLimited => {
                tracing::warn!(
                    pause = %format_minutes(self.timings.rate_limit_pause),
                    "Rate limited, pausing before retry"
                );
                return Ok(CycleOutcome::Deferred {
                    reason: DeferReason::RateLimited,
                    pause: self.timings.rate_limit_pause,
                });
            }
            CreateOutcome::AgentBusy { message } => {
                tracing::warn!(
                    message = %message,
                    pause_secs = self.timings.busy_pause.as_secs(),
                    "Agent still in an active battle, retrying later"
                );
                return Ok(CycleOutcome::Deferred {
                    reason: DeferReason::AgentBusy,
                    pause: self.timings.busy_pause,
                });
            }
            CreateOutcome::Failed { status, message } => {
                tracing::warn!(
                    status = ?status,
                    message = %message,
                    "Failed to create battle, skipping"
                );
                return Ok(CycleOutcome::Finished(BattleReport::not_created()));
            }
        };

        let battle_id = created.id.clone();
        let battle_number = created.battle.number_label();
        let opponent = created.battle.opponent_name();
        tracing::info!(
            battle_id = %battle_id,
            battle_number = %battle_number,
            topic = %created.battle.topic_label(),
            opponent = %opponent,
            "Battle created"
        );

        tracing::info!("Step 2: starting battle");
        if self.run(&battle_id, cancel).await? {
            tracing::info!(battle_id = %battle_id, "Battle running");
        } else {
            tracing::warn!(battle_id = %battle_id, "Run step failed, polling anyway");
        }

        tracing::info!("Step 3: polling for result");
        self.pause(cancel, self.timings.first_poll_delay).await?;
        let (battle, vote) = match self.poll(&battle_id, cancel).await? {
            None => {
                tracing::warn!(battle_id = %battle_id, "Polling timed out");
                (None, None)
            }
            Some(PollResult { battle, vote }) if battle.is_voting() => {
                tracing::info!("Step 5: waiting for final result");
                let finalized = self.finalize(&battle_id, &battle, cancel).await?;
                (Some(finalized), vote)
            }
            Some(PollResult { battle, vote }) => {
                tracing::info!(status = %battle.status(), "Battle finished without a voting phase");
                (Some(battle), vote)
            }
        };

        let outcome = derive_outcome(battle.as_ref(), &self.settings.agent_id);
        if let Some(battle) = &battle {
            self.log_result(&battle_id, battle, outcome);
        }

        Ok(CycleOutcome::Finished(BattleReport {
            battle_id: Some(battle_id),
            entry: HistoryEntry {
                battle_number,
                opponent,
                outcome,
            },
            battle,
            vote,
        }))
    }

    /// Create a battle and classify the reply.
    pub async fn create(&self) -> CreateOutcome {
        let request = CreateBattleRequest::public(&self.settings.agent_id, self.settings.rounds);
        let reply = match self.api.create_battle(&request).await {
            Ok(reply) => reply,
            Err(error) => {
                tracing::error!(error = %error, "POST /deploy/battle failed");
                return CreateOutcome::Failed {
                    status: None,
                    message: error.to_string(),
                };
            }
        };

        if reply.is_success() {
            let parsed = reply
                .json::<Value>()
                .and_then(|value| CreatedBattle::from_value(value).map_err(ApiError::from));
            return match parsed {
                Ok(created) if !created.id.is_empty() => CreateOutcome::Created(created),
                Ok(_) => CreateOutcome::Failed {
                    status: Some(reply.status),
                    message: "response carried no battle id".to_string(),
                },
                Err(error) => CreateOutcome::Failed {
                    status: Some(reply.status),
                    message: error.to_string(),
                },
            };
        }

        let message = server_message(&reply.body);
        match reply.status {
            401 | 403 => CreateOutcome::Rejected {
                status: reply.status,
            },
            429 => CreateOutcome::RateLimited,
            400 if is_busy_message(&message) => CreateOutcome::AgentBusy { message },
            status => CreateOutcome::Failed {
                status: Some(status),
                message,
            },
        }
    }

    /// Start the battle. `Ok(false)` means the run call never succeeded;
    /// the battle may still execute server-side.
    pub async fn run(&self, battle_id: &str, cancel: &CancellationToken) -> Result<bool, BattleError> {
        let cookie = self
            .credentials
            .credential()
            .or_else(|| self.settings.session_cookie.clone());
        let attempts = self.timings.run_attempts;

        for attempt in 1..=attempts {
            match self.api.run_battle(battle_id, cookie.as_deref()).await {
                Ok(reply) if reply.is_success() => return Ok(true),
                Ok(reply) if reply.status == 500 => {
                    tracing::warn!(
                        attempt,
                        attempts,
                        body = %reply.snippet(100),
                        "Run returned HTTP 500"
                    );
                    if attempt < attempts {
                        let wait = self.timings.run_backoff_step * attempt;
                        tracing::info!(wait_secs = wait.as_secs(), "Retrying run");
                        self.pause(cancel, wait).await?;
                    }
                }
                Ok(reply) => {
                    tracing::warn!(status = reply.status, body = %reply.snippet(150), "Run rejected");
                    return Ok(false);
                }
                Err(error) => {
                    tracing::warn!(attempt, attempts, error = %error, "Run request failed");
                    if attempt < attempts {
                        self.pause(cancel, self.timings.run_backoff_step).await?;
                    }
                }
            }
        }

        tracing::warn!(
            attempts,
            "Run failed on every attempt; the battle may still be running, continuing to poll"
        );
        Ok(false)
    }

    /// Poll until the battle is voting or finished. Votes inline when
    /// voting opens. `None` when the ceiling passes first.
    pub async fn poll(
        &self,
        battle_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<PollResult>, BattleError> {
        let interval = self.timings.poll_interval;
        let mut elapsed = Duration::ZERO;

        while elapsed < self.timings.poll_ceiling {
            self.pause(cancel, interval).await?;
            elapsed += interval;

            let Some(battle) = self.fetch(battle_id).await else {
                continue;
            };
            tracing::info!(
                status = %battle.status().to_uppercase(),
                round = %format!("{}/{}", battle.round_label(), self.settings.rounds),
                elapsed_secs = elapsed.as_secs(),
                "Polling battle"
            );

            if battle.is_settled() {
                let vote = if battle.is_voting() {
                    tracing::info!("Step 4: voting is open, casting vote");
                    Some(self.vote(battle_id).await)
                } else {
                    None
                };
                return Ok(Some(PollResult { battle, vote }));
            }
        }

        Ok(None)
    }

    /// Vote for our agent. A 401 gets one credential refresh and one retry.
    pub async fn vote(&self, battle_id: &str) -> VoteOutcome {
        let agent_id = &self.settings.agent_id;

        for attempt in 0..2 {
            let Some(cookie) = self.credentials.credential() else {
                tracing::warn!("Vote skipped: no session cookie configured");
                return VoteOutcome::Skipped;
            };

            let reply = match self.api.vote(battle_id, agent_id, &cookie).await {
                Ok(reply) => reply,
                Err(error) => {
                    tracing::error!(error = %error, "Vote request failed");
                    return VoteOutcome::Failed;
                }
            };

            match reply.status {
                200 | 201 => {
                    let receipt = reply.json::<VoteReceipt>().unwrap_or_default();
                    let weight = receipt.weight_label();
                    tracing::info!(
                        weight = %weight,
                        votes = %receipt.counts_label(),
                        "Vote cast"
                    );
                    return VoteOutcome::Cast { weight };
                }
                409 => {
                    tracing::info!("Already voted on this battle");
                    return VoteOutcome::AlreadyVoted;
                }
                401 if attempt == 0 => {
                    if self.credentials.handle_unauthorized().await {
                        continue;
                    }
                    tracing::warn!("Vote rejected: session expired, re-run setup to supply a fresh cookie");
                    return VoteOutcome::Unauthorized;
                }
                401 => {
                    tracing::warn!("Vote rejected again after session refresh");
                    return VoteOutcome::Unauthorized;
                }
                status => {
                    tracing::warn!(status, body = %reply.snippet(150), "Vote failed");
                    return VoteOutcome::Failed;
                }
            }
        }

        VoteOutcome::Unauthorized
    }

    /// Wait out the voting window, then poll for the winner.
    ///
    /// Falls back to the last snapshot seen (or `voting` itself) when the
    /// winner never shows up.
    pub async fn finalize(
        &self,
        battle_id: &str,
        voting: &Battle,
        cancel: &CancellationToken,
    ) -> Result<Battle, BattleError> {
        let current = self
            .fetch(battle_id)
            .await
            .unwrap_or_else(|| voting.clone());
        if current.is_finished() && current.has_winner() {
            tracing::info!("Battle already completed");
            return Ok(current);
        }

        let wait = voting_wait(current.voting_ends_at.as_deref(), Utc::now(), &self.timings);
        match current.voting_ends_at.as_deref().and_then(parse_timestamp) {
            Some(ends_at) => tracing::info!(
                voting_ends_at = %ends_at.format("%H:%M:%S"),
                wait = %format_minutes(wait),
                "Sleeping until voting closes"
            ),
            None => tracing::info!(
                wait = %format_minutes(wait),
                "votingEndsAt not available, using estimate"
            ),
        }
        self.wait_out(wait, cancel).await?;

        tracing::info!("Voting closed, fetching final result");
        let interval = self.timings.poll_interval;
        let mut last = current;
        let mut elapsed = Duration::ZERO;
        while elapsed < self.timings.result_poll_ceiling {
            if let Some(battle) = self.fetch(battle_id).await {
                let (votes_a, votes_b) = battle.votes();
                tracing::info!(
                    status = %battle.status().to_uppercase(),
                    winner = battle.has_winner(),
                    votes = %format!("{votes_a}:{votes_b}"),
                    elapsed_secs = elapsed.as_secs(),
                    "Polling final result"
                );
                if battle.has_winner() {
                    tracing::info!("Final result received");
                    return Ok(battle);
                }
                if battle.is_finished() {
                    tracing::info!("Battle completed");
                    return Ok(battle);
                }
                last = battle;
            }
            self.pause(cancel, interval).await?;
            elapsed += interval;
        }

        tracing::warn!("Timed out waiting for the final result, using last snapshot");
        Ok(self.fetch(battle_id).await.unwrap_or(last))
    }

    async fn wait_out(&self, total: Duration, cancel: &CancellationToken) -> Result<(), BattleError> {
        let mut slept = Duration::ZERO;
        while slept < total {
            let chunk = self.timings.wait_chunk.min(total - slept);
            self.pause(cancel, chunk).await?;
            slept += chunk;
            let remaining = total - slept;
            if remaining > Duration::from_secs(10) {
                tracing::info!(remaining_secs = remaining.as_secs(), "Voting in progress");
            }
        }
        Ok(())
    }

    async fn fetch(&self, battle_id: &str) -> Option<Battle> {
        let reply = match self.api.get_battle(battle_id).await {
            Ok(reply) => reply,
            Err(error) => {
                tracing::error!(battle_id = %battle_id, error = %error, "GET battle failed");
                return None;
            }
        };
        if reply.status != 200 {
            tracing::error!(
                battle_id = %battle_id,
                status = reply.status,
                body = %reply.snippet(100),
                "GET battle failed"
            );
            return None;
        }
        match reply
            .json::<Value>()
            .and_then(|value| Battle::from_value(value).map_err(ApiError::from))
        {
            Ok(battle) => Some(battle),
            Err(error) => {
                tracing::warn!(battle_id = %battle_id, error = %error, "Unreadable battle descriptor");
                None
            }
        }
    }

    async fn pause(&self, cancel: &CancellationToken, duration: Duration) -> Result<(), BattleError> {
        if sleep_or_cancel(cancel, duration).await {
            Ok(())
        } else {
            Err(BattleError::Cancelled)
        }
    }

    fn log_result(&self, battle_id: &str, battle: &Battle, outcome: Outcome) {
        let view = Perspective::of(battle, &self.settings.agent_id);
        tracing::info!(
            "{} BATTLE #{} RESULT: {}",
            outcome.icon(),
            battle.number_label(),
            outcome.as_str().to_uppercase()
        );
        tracing::info!("Topic : {}", truncate_chars(battle.topic_label(), 42));
        tracing::info!(
            "Match : {} vs {}",
            truncate_chars(&view.my_name, 12),
            truncate_chars(&view.opponent_name, 12)
        );
        tracing::info!(
            "Votes : {}={} | {}={}",
            truncate_chars(&view.my_name, 8),
            view.my_votes,
            truncate_chars(&view.opponent_name, 8),
            view.opponent_votes
        );
        tracing::info!("Link  : {}/battle/{}", self.settings.base_url, battle_id);
    }
}

/// Whether a create-battle 400 message means "agent busy".
pub fn is_busy_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    BUSY_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

/// How long to sleep before polling for the winner.
///
/// Remaining time until `ends_at` (rounded up to whole seconds, never
/// negative) plus the buffer; the fixed fallback when `ends_at` is missing or
/// unparseable.
pub fn voting_wait(ends_at: Option<&str>, now: DateTime<Utc>, timings: &BattleTimings) -> Duration {
    match ends_at.and_then(parse_timestamp) {
        Some(ends_at) => {
            let remaining_ms = (ends_at - now).num_milliseconds().max(0) as u64;
            Duration::from_secs(remaining_ms.div_ceil(1000)) + timings.voting_buffer
        }
        None => timings.voting_fallback,
    }
}

/// RFC 3339, or a naive ISO timestamp taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}
