//! Process wiring: config to collaborators, signals to cancellation, loop to
//! exit status.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::battle::{
    BattleLoop, BattleOrchestrator, HttpArenaApi, LoopExit, LoopSettings, OrchestratorSettings,
};
use crate::config::{Config, EnvFileStore, SESSION_COOKIE_KEY};
use crate::http::build_client;
use crate::session::{
    CredentialKeeper, CredentialSource, HttpSessionTransport, KeeperSettings, NoCredential,
    PageScrapeDiscovery,
};
use crate::util::format_minutes;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Fight exactly one battle regardless of the configured ceiling
    pub once: bool,
}

/// Run the bot until it completes, fails fatally or `cancel` fires.
///
/// The session summary is logged on every exit path.
pub async fn run(config: Config, options: RunOptions, cancel: CancellationToken) -> Result<LoopExit> {
    let client = build_client().context("failed to build HTTP client")?;
    let max_battles = if options.once { 1 } else { config.max_battles };

    log_banner(&config, max_battles);

    let keeper = start_keeper(&config, client.clone()).await;
    let credentials: Arc<dyn CredentialSource> = match &keeper {
        Some(keeper) => Arc::clone(keeper) as Arc<dyn CredentialSource>,
        None => Arc::new(NoCredential),
    };

    let api = HttpArenaApi::new(client, &config.base_url, config.api_key.clone())
        .context("failed to build arena client")?;
    let orchestrator = BattleOrchestrator::new(
        Arc::new(api),
        credentials,
        OrchestratorSettings {
            agent_id: config.agent_id.clone(),
            rounds: config.rounds,
            base_url: config.base_url.clone(),
            session_cookie: config.session_cookie.clone(),
        },
    );
    let mut battles = BattleLoop::new(
        orchestrator,
        LoopSettings {
            max_battles,
            cooldown: config.cooldown,
        },
    );

    let exit = battles.run(&cancel).await;
    match &exit {
        LoopExit::Completed => tracing::info!("All battles done"),
        LoopExit::Interrupted => tracing::info!("Stopped by user"),
        LoopExit::Fatal(error) => tracing::error!(
            error = %error,
            "Fatal error, check {} at {}/settings/api",
            crate::config::API_KEY_KEY,
            config.base_url
        ),
    }

    if let Some(keeper) = &keeper {
        tracing::info!(status = %keeper.status(), "Session keeper");
        keeper.stop();
    }
    battles.stats().log_summary();
    Ok(exit)
}

/// Cancel `token` on SIGINT or SIGTERM (Ctrl+C elsewhere).
pub fn spawn_signal_watcher(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown requested, finishing up");
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(error) => {
            tracing::warn!(error = %error, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn start_keeper(config: &Config, client: reqwest::Client) -> Option<Arc<CredentialKeeper>> {
    if !config.auto_vote {
        tracing::info!("Auto-vote disabled");
        return None;
    }
    let Some(cookie) = config.session_cookie.as_deref() else {
        tracing::warn!(
            "{} not set; battles will run without voting",
            SESSION_COOKIE_KEY
        );
        return None;
    };

    let keeper = Arc::new(CredentialKeeper::new(
        cookie,
        KeeperSettings::for_project(&config.supabase_project),
        Arc::new(HttpSessionTransport::new(
            client.clone(),
            config.base_url.clone(),
            config.identity_url(),
        )),
        Arc::new(PageScrapeDiscovery::new(client, config.base_url.clone())),
        Arc::new(EnvFileStore::new(config.env_path.clone(), SESSION_COOKIE_KEY)),
    ));
    keeper.start().await;
    Some(keeper)
}

fn log_banner(config: &Config, max_battles: u32) {
    let ceiling = match max_battles {
        0 => "unlimited".to_string(),
        max => max.to_string(),
    };
    let vote = if config.voting_enabled() {
        "on"
    } else if config.auto_vote {
        "on (no session cookie)"
    } else {
        "off"
    };
    tracing::info!("ARENA AUTOPILOT");
    tracing::info!("API key  : {}", config.masked_api_key());
    tracing::info!("Agent    : {}", config.agent_id);
    tracing::info!("Rounds   : {}", config.rounds);
    tracing::info!("Cooldown : {}", format_minutes(config.cooldown));
    tracing::info!("Battles  : {ceiling}");
    tracing::info!("Auto-vote: {vote}");
}
