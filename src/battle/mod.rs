//! Battle automation: the arena client, the per-battle state machine and
//! the loop that keeps it going.

pub mod api;
pub mod error;
pub mod mock;
pub mod models;
pub mod orchestrator;
pub mod outcome;
pub mod runner;

pub use api::{ArenaApi, HttpArenaApi};
pub use error::BattleError;
pub use models::{Battle, CreateBattleRequest, CreatedBattle};
pub use orchestrator::{
    is_busy_message, voting_wait, BattleOrchestrator, BattleReport, BattleTimings, CreateOutcome,
    CycleOutcome, DeferReason, OrchestratorSettings, VoteOutcome,
};
pub use outcome::{derive_outcome, HistoryEntry, Outcome, SessionStats};
pub use runner::{BattleLoop, LoopExit, LoopSettings};
