//! Integration tests for the credential keeper
//!
//! Tests the flow: CredentialKeeper -> MockSessionTransport, and the keeper
//! acting as the orchestrator's credential source when a vote is rejected.

use std::sync::Arc;
use std::time::Duration;

use arena_autopilot::battle::mock::{Endpoint, MockArenaApi};
use arena_autopilot::battle::{BattleOrchestrator, OrchestratorSettings};
use arena_autopilot::http::HttpReply;
use arena_autopilot::session::mock::{MemoryStore, MockSessionTransport, SessionCall, StaticDiscovery};
use arena_autopilot::session::{CredentialKeeper, CredentialSource, KeeperSettings, REFRESH_INTERVAL};
use serde_json::json;

use super::common::{auth_cookie, AGENT_ID, BATTLE_ID, PROJECT};

fn valid_session() -> HttpReply {
    HttpReply::json_body(
        200,
        &json!({"user": {"id": "u-1"}, "expires": "2030-01-01T00:00:00.000Z"}),
    )
}

fn fresh_tokens(refresh_token: &str) -> HttpReply {
    HttpReply::json_body(
        200,
        &json!({"access_token": "new-access", "refresh_token": refresh_token, "expires_in": 3600}),
    )
}

fn keeper(
    cookie: &str,
    transport: &MockSessionTransport,
    discovery: &StaticDiscovery,
    store: &MemoryStore,
) -> Arc<CredentialKeeper> {
    Arc::new(CredentialKeeper::new(
        cookie,
        KeeperSettings::for_project(PROJECT),
        Arc::new(transport.clone()),
        Arc::new(discovery.clone()),
        Arc::new(store.clone()),
    ))
}

#[tokio::test(start_paused = true)]
async fn test_timer_uses_structured_refresh_before_ping() {
    let cookie = auth_cookie(&json!({"access_token": "old", "refresh_token": "rt-1"}));
    let transport = MockSessionTransport::new()
        .with_session_replies(vec![valid_session()])
        .with_refresh_replies(vec![fresh_tokens("rt-2")]);
    let discovery = StaticDiscovery::key("anon-key");
    let store = MemoryStore::new();
    let keeper = keeper(&cookie, &transport, &discovery, &store);

    keeper.start().await;
    assert!(keeper.is_running());
    assert_eq!(discovery.lookups(), 1);
    assert_eq!(transport.calls().len(), 1);

    tokio::time::sleep(REFRESH_INTERVAL + Duration::from_secs(1)).await;

    let calls = transport.calls();
    assert_eq!(calls.len(), 2, "calls: {calls:?}");
    assert!(matches!(calls[0], SessionCall::Session { .. }));
    assert_eq!(
        calls[1],
        SessionCall::Refresh {
            anon_key: "anon-key".into(),
            refresh_token: "rt-1".into()
        }
    );
    assert_eq!(keeper.refresh_token().as_deref(), Some("rt-2"));
    assert_eq!(store.saved(), vec![keeper.cookie()]);

    keeper.stop();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(!keeper.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_session_at_start_refreshes_immediately() {
    let cookie = auth_cookie(&json!({"refresh_token": "rt-1"}));
    let transport = MockSessionTransport::new()
        .with_session_replies(vec![HttpReply::new(401, "{}")])
        .with_refresh_replies(vec![fresh_tokens("rt-2")]);
    let store = MemoryStore::new();
    let keeper = keeper(&cookie, &transport, &StaticDiscovery::key("anon"), &store);

    keeper.start().await;

    let calls = transport.calls();
    assert!(matches!(
        calls.as_slice(),
        [SessionCall::Session { .. }, SessionCall::Refresh { .. }]
    ));
    assert_eq!(store.saved().len(), 1);
    assert!(keeper.status().starts_with("active"));
    keeper.stop();
}

#[tokio::test(start_paused = true)]
async fn test_timer_falls_back_to_ping_without_refresh_token() {
    let renewed = valid_session()
        .with_set_cookie("_ga_XYZ=GS1.1.2; Path=/; Max-Age=63072000; SameSite=Lax");
    let transport =
        MockSessionTransport::new().with_session_replies(vec![valid_session(), renewed]);
    let discovery = StaticDiscovery::key("anon");
    let store = MemoryStore::new();
    let keeper = keeper("_ga=GA1.1; theme=dark", &transport, &discovery, &store);

    keeper.start().await;
    assert_eq!(discovery.lookups(), 0);

    tokio::time::sleep(REFRESH_INTERVAL + Duration::from_secs(1)).await;

    assert_eq!(transport.calls().len(), 2);
    assert!(transport
        .calls()
        .iter()
        .all(|call| matches!(call, SessionCall::Session { .. })));
    assert_eq!(keeper.cookie(), "_ga=GA1.1; theme=dark; _ga_XYZ=GS1.1.2");
    assert_eq!(store.saved().len(), 1);
    keeper.stop();
}

#[tokio::test]
async fn test_keeper_recovers_rejected_vote() {
    let cookie = auth_cookie(&json!({"access_token": "old", "refresh_token": "rt-1"}));
    let transport = MockSessionTransport::new().with_refresh_replies(vec![fresh_tokens("rt-2")]);
    let store = MemoryStore::new();
    let keeper = keeper(&cookie, &transport, &StaticDiscovery::key("anon"), &store);

    let api = MockArenaApi::new().with_votes(&[401, 201]);
    let orchestrator = BattleOrchestrator::new(
        Arc::new(api.clone()),
        Arc::clone(&keeper) as Arc<dyn CredentialSource>,
        OrchestratorSettings {
            agent_id: AGENT_ID.into(),
            rounds: 3,
            base_url: "https://arena.test".into(),
            session_cookie: None,
        },
    );

    let outcome = orchestrator.vote(BATTLE_ID).await;

    assert!(outcome.is_cast());
    let votes = api.calls_to(Endpoint::Vote);
    assert_eq!(votes.len(), 2);
    assert_eq!(votes[0].cookie.as_deref(), Some(cookie.as_str()));
    assert_eq!(votes[1].cookie, Some(keeper.cookie()));
    assert_ne!(keeper.cookie(), cookie);
}
