use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::util::truncate_chars;

pub const VOTING_STATUS: &str = "voting";

/// Statuses after which the remote will not change the battle any more.
pub const FINISHED_STATUSES: [&str; 4] = ["completed", "finished", "done", "ended"];

/// Body of `POST /deploy/battle`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBattleRequest {
    pub agent1_id: String,
    pub rounds: u32,
    pub language: String,
    pub visibility: String,
}

impl CreateBattleRequest {
    pub fn public(agent_id: impl Into<String>, rounds: u32) -> Self {
        Self {
            agent1_id: agent_id.into(),
            rounds,
            language: "en".to_string(),
            visibility: "public".to_string(),
        }
    }
}

/// Body of `POST /battles/{id}/vote`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest<'a> {
    pub agent_id: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRef {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl AgentRef {
    pub fn label(&self) -> Option<&str> {
        self.name.as_deref().or(self.display_name.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Participants {
    #[serde(default)]
    pub agent2: Option<AgentRef>,
}

/// Battle descriptor as returned by the arena. Every field is optional;
/// the server omits what it has not decided yet.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Battle {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default)]
    pub battle_number: Option<Value>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub current_round: Option<Value>,
    #[serde(default)]
    pub voting_ends_at: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub winner_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub vote_count_a: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub vote_count_b: Option<f64>,
    #[serde(default)]
    pub agent_a: Option<AgentRef>,
    #[serde(default)]
    pub agent_b: Option<AgentRef>,
    #[serde(default)]
    pub participants: Option<Participants>,
}

impl Battle {
    /// Parse a descriptor, unwrapping a `{"battle": {...}}` envelope if present.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(unwrap_envelope(value))
    }

    /// Status normalized to lowercase
    pub fn status(&self) -> String {
        self.status.as_deref().unwrap_or_default().to_lowercase()
    }

    pub fn is_voting(&self) -> bool {
        self.status() == VOTING_STATUS
    }

    pub fn is_finished(&self) -> bool {
        FINISHED_STATUSES.contains(&self.status().as_str())
    }

    /// Finished or voting: the pre-voting poll stops on either.
    pub fn is_settled(&self) -> bool {
        self.is_voting() || self.is_finished()
    }

    pub fn has_winner(&self) -> bool {
        self.winner_id.is_some()
    }

    pub fn number_label(&self) -> String {
        value_label(self.battle_number.as_ref())
    }

    pub fn round_label(&self) -> String {
        value_label(self.current_round.as_ref())
    }

    pub fn topic_label(&self) -> &str {
        self.topic.as_deref().unwrap_or("?")
    }

    /// Opponent as named on the create response
    pub fn opponent_name(&self) -> String {
        self.participants
            .as_ref()
            .and_then(|p| p.agent2.as_ref())
            .or(self.agent_b.as_ref())
            .and_then(AgentRef::label)
            .unwrap_or("Random")
            .to_string()
    }

    pub fn votes(&self) -> (f64, f64) {
        (
            self.vote_count_a.unwrap_or(0.0),
            self.vote_count_b.unwrap_or(0.0),
        )
    }
}

/// A freshly created battle and the id used for every follow-up call.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedBattle {
    pub id: String,
    pub battle: Battle,
}

impl CreatedBattle {
    /// The id comes from the descriptor or, failing that, a top-level `battleId`.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let fallback_id = value
            .get("battleId")
            .and_then(value_as_string)
            .unwrap_or_default();
        let battle = Battle::from_value(value)?;
        let id = battle.id.clone().unwrap_or(fallback_id);
        Ok(Self { id, battle })
    }
}

/// Body of a successful vote
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    #[serde(default)]
    pub vote: Option<VoteDetail>,
    #[serde(default)]
    pub vote_counts: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteDetail {
    #[serde(default)]
    pub vote_weight: Option<Value>,
}

impl VoteReceipt {
    pub fn weight_label(&self) -> String {
        value_label(self.vote.as_ref().and_then(|v| v.vote_weight.as_ref()))
    }

    pub fn counts_label(&self) -> String {
        self.vote_counts
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_else(|| "{}".to_string())
    }
}

/// Human-readable message from an error body: `message`, `error` or `detail`,
/// else the head of the raw body.
pub fn server_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["message", "error", "detail"] {
            if let Some(text) = value.get(key).and_then(Value::as_str) {
                if !text.is_empty() {
                    return text.to_string();
                }
            }
        }
        if value.is_object() {
            return String::new();
        }
    }
    truncate_chars(body, 120).to_string()
}

fn unwrap_envelope(mut value: Value) -> Value {
    match value.get_mut("battle").map(Value::take) {
        Some(inner) if inner.is_object() => inner,
        _ => value,
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn value_label(value: Option<&Value>) -> String {
    value.and_then(value_as_string).unwrap_or_else(|| "?".to_string())
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_string))
}

/// Vote tallies may be weighted or stringly typed; anything unreadable counts as absent.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    })
}
