//! Integration tests for arena-autopilot
//!
//! These tests drive the orchestrator, the battle loop and the credential
//! keeper through the in-crate mocks on a paused tokio clock.

#[path = "../common/mod.rs"]
pub mod common;

pub mod battle_cycle;
pub mod cli;
pub mod session_refresh;
