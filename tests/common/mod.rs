//! Shared test utilities for arena-autopilot
//!
//! Battle descriptor builders, a preconfigured orchestrator and helpers for
//! measuring the spacing of recorded calls.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use arena_autopilot::battle::mock::{ArenaCall, MockArenaApi, MockCredentials};
use arena_autopilot::battle::{BattleOrchestrator, OrchestratorSettings};
use arena_autopilot::session::cookie::{encode_payload, AuthCookie};
use chrono::Utc;
use serde_json::{json, Value};

pub const AGENT_ID: &str = "agent-me";
pub const OPPONENT_ID: &str = "agent-rival";
pub const BATTLE_ID: &str = "battle-1";
pub const PROJECT: &str = "proj";

pub fn orchestrator(api: &MockArenaApi, credentials: &MockCredentials) -> BattleOrchestrator {
    BattleOrchestrator::new(
        Arc::new(api.clone()),
        Arc::new(credentials.clone()),
        OrchestratorSettings {
            agent_id: AGENT_ID.to_string(),
            rounds: 3,
            base_url: "https://arena.test".to_string(),
            session_cookie: None,
        },
    )
}

/// Create-battle reply body
pub fn created() -> Value {
    json!({
        "battle": {
            "id": BATTLE_ID,
            "battleNumber": 101,
            "topic": "Cats or dogs",
            "participants": {"agent2": {"name": "Rival"}}
        }
    })
}

pub fn battle(status: &str) -> Value {
    json!({
        "id": BATTLE_ID,
        "status": status,
        "currentRound": 2,
        "agentA": {"id": AGENT_ID, "name": "Mine"},
        "agentB": {"id": OPPONENT_ID, "name": "Rival"}
    })
}

pub fn voting_until(ends_in: Duration) -> Value {
    let ends_at = Utc::now() + chrono::Duration::from_std(ends_in).unwrap_or_default();
    let mut value = battle("voting");
    value["votingEndsAt"] = json!(ends_at.to_rfc3339());
    value
}

pub fn won_by(winner: &str) -> Value {
    let mut value = battle("completed");
    value["winnerId"] = json!(winner);
    value["voteCountA"] = json!(7);
    value["voteCountB"] = json!(3);
    value
}

/// Cookie header carrying a decodable auth token
pub fn auth_cookie(token: &Value) -> String {
    format!(
        "_ga=GA1.1; {}={}",
        AuthCookie::for_project(PROJECT).chunk_name(0),
        encode_payload(token)
    )
}

/// Virtual time between consecutive calls
pub fn gaps(calls: &[ArenaCall]) -> Vec<Duration> {
    calls.windows(2).map(|pair| pair[1].at - pair[0].at).collect()
}
