//! The outer loop: battle, tally, cool down, repeat.

use std::time::Duration;

use chrono::Local;
use tokio_util::sync::CancellationToken;

use crate::battle::error::BattleError;
use crate::battle::orchestrator::{BattleOrchestrator, CycleOutcome, DeferReason};
use crate::battle::outcome::SessionStats;
use crate::util::{format_minutes, sleep_or_cancel};

const COOLDOWN_TICK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Stop after this many attempted battles; 0 runs until interrupted
    pub max_battles: u32,
    pub cooldown: Duration,
}

/// Why the loop stopped
#[derive(Debug)]
pub enum LoopExit {
    /// The battle ceiling was reached
    Completed,
    /// Shutdown was requested
    Interrupted,
    Fatal(BattleError),
}

impl LoopExit {
    pub fn is_failure(&self) -> bool {
        matches!(self, LoopExit::Fatal(_))
    }
}

pub struct BattleLoop {
    orchestrator: BattleOrchestrator,
    settings: LoopSettings,
    stats: SessionStats,
}

impl BattleLoop {
    pub fn new(orchestrator: BattleOrchestrator, settings: LoopSettings) -> Self {
        Self {
            orchestrator,
            settings,
            stats: SessionStats::new(),
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Run battles until the ceiling, a fatal error or cancellation.
    ///
    /// Deferred attempts (rate limit, agent busy) are retried after their
    /// pause and never count toward the ceiling.
    pub async fn run(&mut self, cancel: &CancellationToken) -> LoopExit {
        loop {
            if cancel.is_cancelled() {
                return LoopExit::Interrupted;
            }

            let number = self.stats.total + 1;
            match self.settings.max_battles {
                0 => tracing::info!("BATTLE {number} | {}", Local::now().format("%H:%M:%S")),
                max => tracing::info!("BATTLE {number}/{max} | {}", Local::now().format("%H:%M:%S")),
            }

            match self.orchestrator.run_cycle(cancel).await {
                Ok(CycleOutcome::Finished(report)) => {
                    if report.voted() {
                        self.stats.record_vote();
                    }
                    self.stats.record(report.entry);
                }
                Ok(CycleOutcome::Deferred { reason, pause }) => {
                    let reason = match reason {
                        DeferReason::RateLimited => "rate limited",
                        DeferReason::AgentBusy => "agent busy",
                    };
                    tracing::info!(reason, pause = %format_minutes(pause), "Retrying after pause");
                    if !sleep_or_cancel(cancel, pause).await {
                        return LoopExit::Interrupted;
                    }
                    continue;
                }
                Err(BattleError::Cancelled) => return LoopExit::Interrupted,
                Err(error) => {
                    tracing::error!(error = %error, "Stopping battle loop");
                    return LoopExit::Fatal(error);
                }
            }

            if self.settings.max_battles > 0 && self.stats.total >= self.settings.max_battles {
                tracing::info!(battles = self.stats.total, "Battle target reached");
                return LoopExit::Completed;
            }

            if !self.cool_down(cancel).await {
                return LoopExit::Interrupted;
            }
        }
    }

    async fn cool_down(&self, cancel: &CancellationToken) -> bool {
        let total = self.settings.cooldown;
        tracing::info!(cooldown = %format_minutes(total), "Cooling down before next battle");

        let mut remaining = total;
        while !remaining.is_zero() {
            let tick = COOLDOWN_TICK.min(remaining);
            if !sleep_or_cancel(cancel, tick).await {
                return false;
            }
            remaining -= tick;
            if !remaining.is_zero() {
                tracing::info!(remaining = %format_minutes(remaining), "Cooldown");
            }
        }
        tracing::info!("Cooldown finished");
        true
    }
}
