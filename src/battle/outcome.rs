//! Battle outcomes and session-wide statistics.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use crate::battle::models::Battle;
use crate::util::{format_hms, truncate_chars};

/// Number of battles kept for the summary history
pub const HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Win,
    Lose,
    Draw,
    Skip,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Win => "win",
            Outcome::Lose => "lose",
            Outcome::Draw => "draw",
            Outcome::Skip => "skip",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Outcome::Win => "🏆",
            Outcome::Lose => "💀",
            Outcome::Draw => "🤝",
            Outcome::Skip => "⏭️",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// No record means polling gave up; no winner means the vote tied.
pub fn derive_outcome(battle: Option<&Battle>, my_agent_id: &str) -> Outcome {
    match battle {
        None => Outcome::Skip,
        Some(battle) => match battle.winner_id.as_deref() {
            None => Outcome::Draw,
            Some(winner) if winner == my_agent_id => Outcome::Win,
            Some(_) => Outcome::Lose,
        },
    }
}

/// A finished battle seen from our agent's side.
#[derive(Debug, Clone, PartialEq)]
pub struct Perspective {
    pub my_name: String,
    pub opponent_name: String,
    pub my_votes: f64,
    pub opponent_votes: f64,
}

impl Perspective {
    pub fn of(battle: &Battle, my_agent_id: &str) -> Self {
        let agent_a = battle.agent_a.clone().unwrap_or_default();
        let agent_b = battle.agent_b.clone().unwrap_or_default();
        let name_a = agent_a.name.unwrap_or_else(|| "Agent A".to_string());
        let name_b = agent_b.name.unwrap_or_else(|| "Agent B".to_string());
        let (votes_a, votes_b) = battle.votes();

        if agent_a.id.as_deref() == Some(my_agent_id) {
            Self {
                my_name: name_a,
                opponent_name: name_b,
                my_votes: votes_a,
                opponent_votes: votes_b,
            }
        } else {
            Self {
                my_name: name_b,
                opponent_name: name_a,
                my_votes: votes_b,
                opponent_votes: votes_a,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub battle_number: String,
    pub opponent: String,
    pub outcome: Outcome,
}

impl HistoryEntry {
    /// Entry for a battle that never got created
    pub fn skipped() -> Self {
        Self {
            battle_number: "?".to_string(),
            opponent: "?".to_string(),
            outcome: Outcome::Skip,
        }
    }
}

/// Counters for the life of the process.
#[derive(Debug, Clone)]
pub struct SessionStats {
    started: Instant,
    pub total: u32,
    pub win: u32,
    pub lose: u32,
    pub draw: u32,
    pub skip: u32,
    pub voted: u32,
    history: VecDeque<HistoryEntry>,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total: 0,
            win: 0,
            lose: 0,
            draw: 0,
            skip: 0,
            voted: 0,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
        }
    }

    /// Count one attempted battle.
    pub fn record(&mut self, entry: HistoryEntry) {
        self.total += 1;
        match entry.outcome {
            Outcome::Win => self.win += 1,
            Outcome::Lose => self.lose += 1,
            Outcome::Draw => self.draw += 1,
            Outcome::Skip => self.skip += 1,
        }
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    pub fn record_vote(&mut self) {
        self.voted += 1;
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Percentage of wins over all attempted battles
    pub fn win_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| f64::from(self.win) / f64::from(self.total) * 100.0)
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let win_rate = self
            .win_rate()
            .map(|rate| format!("{rate:.1}%"))
            .unwrap_or_else(|| "N/A".to_string());

        let mut lines = vec![
            "SESSION SUMMARY".to_string(),
            format!("Duration     : {}", format_hms(self.elapsed())),
            format!("Total battles: {}", self.total),
            format!("Won          : {}", self.win),
            format!("Lost         : {}", self.lose),
            format!("Draw         : {}", self.draw),
            format!("Skipped      : {}", self.skip),
            format!("Auto-votes   : {}", self.voted),
            format!("Win rate     : {win_rate}"),
        ];
        if !self.history.is_empty() {
            lines.push(format!("Last {HISTORY_LIMIT} battles:"));
            for entry in &self.history {
                lines.push(format!(
                    "  {} #{:<6} vs {:<15} {}",
                    entry.outcome.icon(),
                    entry.battle_number,
                    truncate_chars(&entry.opponent, 15),
                    entry.outcome.as_str().to_uppercase()
                ));
            }
        }
        lines
    }

    pub fn log_summary(&self) {
        for line in self.summary_lines() {
            tracing::info!("{line}");
        }
    }
}
