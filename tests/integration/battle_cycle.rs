//! Integration tests for a single battle cycle
//!
//! Each test scripts the arena, drives one orchestrator step (or a whole
//! cycle) on a paused clock and checks both the result and the virtual time
//! spent waiting.

use std::sync::Arc;
use std::time::Duration;

use arena_autopilot::battle::mock::{Endpoint, MockArenaApi, MockCredentials};
use arena_autopilot::battle::{
    Battle, BattleError, BattleOrchestrator, CreateOutcome, CycleOutcome, DeferReason,
    OrchestratorSettings, Outcome, VoteOutcome,
};
use arena_autopilot::session::NoCredential;
use serde_json::json;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use super::common::{
    battle, created, gaps, orchestrator, voting_until, won_by, AGENT_ID, BATTLE_ID, OPPONENT_ID,
};

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

// Create classification

#[tokio::test]
async fn test_create_classifies_replies() {
    let credentials = MockCredentials::cookie("sid=1");
    let cases = [
        (429, json!({"error": "slow down"})),
        (400, json!({"message": "Agent is already in an ongoing battle"})),
        (400, json!({"message": "rounds must be between 1 and 10"})),
        (403, json!({"error": "forbidden"})),
    ];
    let mut outcomes = Vec::new();
    for (status, body) in cases {
        let api = MockArenaApi::new().with_create(status, body);
        outcomes.push(orchestrator(&api, &credentials).create().await);
    }

    assert_eq!(outcomes[0], CreateOutcome::RateLimited);
    assert_eq!(
        outcomes[1],
        CreateOutcome::AgentBusy {
            message: "Agent is already in an ongoing battle".into()
        }
    );
    assert_eq!(
        outcomes[2],
        CreateOutcome::Failed {
            status: Some(400),
            message: "rounds must be between 1 and 10".into()
        }
    );
    assert_eq!(outcomes[3], CreateOutcome::Rejected { status: 403 });
}

#[tokio::test]
async fn test_create_reads_enveloped_and_top_level_ids() {
    let credentials = MockCredentials::cookie("sid=1");

    let api = MockArenaApi::new().with_create(201, created());
    match orchestrator(&api, &credentials).create().await {
        CreateOutcome::Created(created) => {
            assert_eq!(created.id, BATTLE_ID);
            assert_eq!(created.battle.number_label(), "101");
            assert_eq!(created.battle.opponent_name(), "Rival");
        }
        other => panic!("Expected Created, got {:?}", other),
    }

    let api = MockArenaApi::new().with_create(200, json!({"battleId": "b-77"}));
    match orchestrator(&api, &credentials).create().await {
        CreateOutcome::Created(created) => {
            assert_eq!(created.id, "b-77");
            assert_eq!(created.battle.opponent_name(), "Random");
        }
        other => panic!("Expected Created, got {:?}", other),
    }

    let api = MockArenaApi::new().with_create(200, json!({"ok": true}));
    assert!(matches!(
        orchestrator(&api, &credentials).create().await,
        CreateOutcome::Failed { status: Some(200), .. }
    ));
}

#[tokio::test]
async fn test_create_transport_error_is_uncategorized_failure() {
    let api = MockArenaApi::new().with_error(Endpoint::Create, "connection reset");
    let outcome = orchestrator(&api, &MockCredentials::cookie("sid=1"))
        .create()
        .await;
    assert!(matches!(outcome, CreateOutcome::Failed { status: None, .. }));
}

// Run step

#[tokio::test(start_paused = true)]
async fn test_run_backs_off_linearly_on_server_errors() {
    let api = MockArenaApi::new().with_run(&[500, 500, 201]);
    let orchestrator = orchestrator(&api, &MockCredentials::cookie("sid=1"));

    let started = Instant::now();
    let running = assert_ok!(orchestrator.run(BATTLE_ID, &CancellationToken::new()).await);

    assert!(running);
    assert_eq!(started.elapsed(), secs(30));
    let runs = api.calls_to(Endpoint::Run);
    assert_eq!(runs.len(), 3);
    assert_eq!(gaps(&runs), vec![secs(10), secs(20)]);
    assert!(runs
        .iter()
        .all(|call| call.cookie.as_deref() == Some("sid=1")));
}

#[tokio::test(start_paused = true)]
async fn test_run_gives_up_after_three_attempts() {
    let api = MockArenaApi::new().with_run(&[500, 500, 500]);
    let orchestrator = orchestrator(&api, &MockCredentials::cookie("sid=1"));

    let started = Instant::now();
    let running = orchestrator
        .run(BATTLE_ID, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!running);
    assert_eq!(api.calls_to(Endpoint::Run).len(), 3);
    assert_eq!(started.elapsed(), secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_run_retries_transport_errors_and_stops_on_other_statuses() {
    let api = MockArenaApi::new()
        .with_error(Endpoint::Run, "timed out")
        .with_run(&[200]);
    let orchestrator_a = orchestrator(&api, &MockCredentials::cookie("sid=1"));
    assert!(orchestrator_a
        .run(BATTLE_ID, &CancellationToken::new())
        .await
        .unwrap());
    assert_eq!(gaps(&api.calls_to(Endpoint::Run)), vec![secs(10)]);

    let api = MockArenaApi::new().with_run(&[404, 201]);
    let orchestrator_b = orchestrator(&api, &MockCredentials::cookie("sid=1"));
    assert!(!orchestrator_b
        .run(BATTLE_ID, &CancellationToken::new())
        .await
        .unwrap());
    assert_eq!(api.calls_to(Endpoint::Run).len(), 1);
}

#[tokio::test]
async fn test_run_falls_back_to_configured_cookie_without_keeper() {
    let api = MockArenaApi::new().with_run(&[201]);
    let orchestrator = BattleOrchestrator::new(
        Arc::new(api.clone()),
        Arc::new(NoCredential),
        OrchestratorSettings {
            agent_id: AGENT_ID.into(),
            rounds: 3,
            base_url: "https://arena.test".into(),
            session_cookie: Some("sid=static".into()),
        },
    );

    assert!(assert_ok!(orchestrator.run(BATTLE_ID, &CancellationToken::new()).await));

    let runs = api.calls_to(Endpoint::Run);
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].cookie.as_deref(), Some("sid=static"));
}

// Voting

#[tokio::test]
async fn test_vote_unauthorized_refreshes_and_retries_once() {
    let api = MockArenaApi::new().with_votes(&[401, 201]);
    let credentials = MockCredentials::cookie("stale=1").refreshing_to("fresh=1");

    let outcome = orchestrator(&api, &credentials).vote(BATTLE_ID).await;

    assert!(outcome.is_cast());
    assert_eq!(credentials.refreshes(), 1);
    let votes = api.calls_to(Endpoint::Vote);
    assert_eq!(votes.len(), 2);
    assert_eq!(votes[0].cookie.as_deref(), Some("stale=1"));
    assert_eq!(votes[1].cookie.as_deref(), Some("fresh=1"));
}

#[tokio::test]
async fn test_vote_second_unauthorized_is_final() {
    let api = MockArenaApi::new().with_votes(&[401, 401, 201]);
    let credentials = MockCredentials::cookie("stale=1").refreshing_to("fresh=1");

    let outcome = orchestrator(&api, &credentials).vote(BATTLE_ID).await;

    assert_eq!(outcome, VoteOutcome::Unauthorized);
    assert_eq!(credentials.refreshes(), 1);
    assert_eq!(api.calls_to(Endpoint::Vote).len(), 2);
}

#[tokio::test]
async fn test_vote_failed_refresh_does_not_retry() {
    let api = MockArenaApi::new().with_votes(&[401, 201]);
    let credentials = MockCredentials::cookie("stale=1");

    let outcome = orchestrator(&api, &credentials).vote(BATTLE_ID).await;

    assert_eq!(outcome, VoteOutcome::Unauthorized);
    assert_eq!(credentials.refreshes(), 1);
    assert_eq!(api.calls_to(Endpoint::Vote).len(), 1);
}

#[tokio::test]
async fn test_vote_conflict_and_missing_credential() {
    let api = MockArenaApi::new().with_votes(&[409]);
    let outcome = orchestrator(&api, &MockCredentials::cookie("sid=1"))
        .vote(BATTLE_ID)
        .await;
    assert_eq!(outcome, VoteOutcome::AlreadyVoted);

    let api = MockArenaApi::new().with_votes(&[201]);
    let orchestrator = BattleOrchestrator::new(
        Arc::new(api.clone()),
        Arc::new(NoCredential),
        OrchestratorSettings {
            agent_id: AGENT_ID.into(),
            rounds: 3,
            base_url: "https://arena.test".into(),
            session_cookie: None,
        },
    );
    assert_eq!(orchestrator.vote(BATTLE_ID).await, VoteOutcome::Skipped);
    assert!(api.calls_to(Endpoint::Vote).is_empty());
}

// Finalization

#[tokio::test(start_paused = true)]
async fn test_finalize_waits_until_voting_closes_plus_buffer() {
    let api = MockArenaApi::new()
        .with_battles(vec![voting_until(secs(50))])
        .with_sticky_battle(won_by(AGENT_ID));
    let orchestrator = orchestrator(&api, &MockCredentials::cookie("sid=1"));
    let voting = Battle::from_value(voting_until(secs(50))).unwrap();

    let result = orchestrator
        .finalize(BATTLE_ID, &voting, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.winner_id.as_deref(), Some(AGENT_ID));
    let gets = api.calls_to(Endpoint::Get);
    assert_eq!(gets.len(), 2);
    let waited = gets[1].at - gets[0].at;
    assert!(
        waited >= secs(75) && waited < secs(90),
        "waited {waited:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_finalize_falls_back_to_fixed_wait() {
    let api = MockArenaApi::new()
        .with_battles(vec![battle("voting")])
        .with_sticky_battle(won_by(OPPONENT_ID));
    let orchestrator = orchestrator(&api, &MockCredentials::cookie("sid=1"));
    let voting = Battle::from_value(battle("voting")).unwrap();

    orchestrator
        .finalize(BATTLE_ID, &voting, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(gaps(&api.calls_to(Endpoint::Get)), vec![secs(340)]);
}

#[tokio::test(start_paused = true)]
async fn test_finalize_returns_last_snapshot_on_timeout() {
    let api = MockArenaApi::new().with_sticky_battle(battle("voting"));
    let orchestrator = orchestrator(&api, &MockCredentials::cookie("sid=1"));
    let voting = Battle::from_value(battle("voting")).unwrap();

    let started = Instant::now();
    let result = orchestrator
        .finalize(BATTLE_ID, &voting, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.is_voting());
    assert!(!result.has_winner());
    assert_eq!(started.elapsed(), secs(340 + 480));
    assert_eq!(api.calls_to(Endpoint::Get).len(), 34);
}

#[tokio::test(start_paused = true)]
async fn test_finalize_returns_immediately_when_already_won() {
    let api = MockArenaApi::new().with_sticky_battle(won_by(AGENT_ID));
    let orchestrator = orchestrator(&api, &MockCredentials::cookie("sid=1"));
    let voting = Battle::from_value(battle("voting")).unwrap();

    let started = Instant::now();
    orchestrator
        .finalize(BATTLE_ID, &voting, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(started.elapsed(), Duration::ZERO);
}

// Whole cycles

#[tokio::test(start_paused = true)]
async fn test_cycle_votes_inline_and_reports_win() {
    let api = MockArenaApi::new()
        .with_create(201, created())
        .with_run(&[200])
        .with_battles(vec![battle("running"), voting_until(secs(30))])
        .with_votes(&[201])
        .with_battles(vec![voting_until(secs(30))])
        .with_sticky_battle(won_by(AGENT_ID));
    let orchestrator = orchestrator(&api, &MockCredentials::cookie("sid=1"));

    let cycle = orchestrator.run_cycle(&CancellationToken::new()).await.unwrap();

    let CycleOutcome::Finished(report) = cycle else {
        panic!("Expected a finished cycle");
    };
    assert_eq!(report.outcome(), Outcome::Win);
    assert!(report.voted());
    assert_eq!(report.entry.battle_number, "101");
    assert_eq!(report.entry.opponent, "Rival");
    assert_eq!(api.calls_to(Endpoint::Vote).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cycle_without_voting_phase_does_not_vote() {
    let api = MockArenaApi::new()
        .with_create(201, created())
        .with_run(&[200])
        .with_battles(vec![battle("running"), won_by(OPPONENT_ID)]);
    let orchestrator = orchestrator(&api, &MockCredentials::cookie("sid=1"));

    let started = Instant::now();
    let cycle = orchestrator.run_cycle(&CancellationToken::new()).await.unwrap();

    let CycleOutcome::Finished(report) = cycle else {
        panic!("Expected a finished cycle");
    };
    assert_eq!(report.outcome(), Outcome::Lose);
    assert!(report.vote.is_none());
    assert!(api.calls_to(Endpoint::Vote).is_empty());
    assert_eq!(started.elapsed(), secs(5 + 15 + 15));
}

#[tokio::test(start_paused = true)]
async fn test_cycle_with_weighted_vote_counts_still_resolves() {
    let mut result = won_by(AGENT_ID);
    result["voteCountA"] = json!(3.5);
    result["voteCountB"] = json!("1.25");
    let api = MockArenaApi::new()
        .with_create(201, created())
        .with_run(&[200])
        .with_sticky_battle(result);
    let orchestrator = orchestrator(&api, &MockCredentials::cookie("sid=1"));

    let cycle = orchestrator.run_cycle(&CancellationToken::new()).await.unwrap();

    let CycleOutcome::Finished(report) = cycle else {
        panic!("Expected a finished cycle");
    };
    assert_eq!(report.outcome(), Outcome::Win);
    let battle = report.battle.expect("final battle");
    assert_eq!(battle.votes(), (3.5, 1.25));
}

#[tokio::test(start_paused = true)]
async fn test_cycle_poll_ceiling_yields_skip() {
    let api = MockArenaApi::new()
        .with_create(201, created())
        .with_run(&[200])
        .with_sticky_battle(battle("running"));
    let orchestrator = orchestrator(&api, &MockCredentials::cookie("sid=1"));

    let started = Instant::now();
    let cycle = orchestrator.run_cycle(&CancellationToken::new()).await.unwrap();

    let CycleOutcome::Finished(report) = cycle else {
        panic!("Expected a finished cycle");
    };
    assert_eq!(report.outcome(), Outcome::Skip);
    assert!(report.battle.is_none());
    assert_eq!(started.elapsed(), secs(5 + 300));
    assert_eq!(api.calls_to(Endpoint::Get).len(), 20);
}

#[tokio::test(start_paused = true)]
async fn test_cycle_defers_on_rate_limit_without_running() {
    let api = MockArenaApi::new().with_create(429, json!({"error": "rate limited"}));
    let orchestrator = orchestrator(&api, &MockCredentials::cookie("sid=1"));

    let cycle = orchestrator.run_cycle(&CancellationToken::new()).await.unwrap();

    match cycle {
        CycleOutcome::Deferred { reason, pause } => {
            assert_eq!(reason, DeferReason::RateLimited);
            assert_eq!(pause, secs(300));
        }
        other => panic!("Expected Deferred, got {:?}", other),
    }
    assert!(api.calls_to(Endpoint::Run).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cycle_rejected_key_is_fatal() {
    let api = MockArenaApi::new().with_create(401, json!({"error": "bad key"}));
    let orchestrator = orchestrator(&api, &MockCredentials::cookie("sid=1"));

    let error = assert_err!(orchestrator.run_cycle(&CancellationToken::new()).await);
    assert!(error.is_fatal());
    assert!(matches!(error, BattleError::CredentialRejected { status: 401 }));
}

#[tokio::test(start_paused = true)]
async fn test_cycle_cancellation_interrupts_polling() {
    let api = MockArenaApi::new()
        .with_create(201, created())
        .with_run(&[200])
        .with_sticky_battle(battle("running"));
    let orchestrator = orchestrator(&api, &MockCredentials::cookie("sid=1"));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(secs(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let error = orchestrator.run_cycle(&cancel).await.unwrap_err();
    assert!(matches!(error, BattleError::Cancelled));
    assert_eq!(started.elapsed(), secs(100));
}
