//! End-to-end registration flow against the real router, mirroring
//! `hr-auth/tests/integration.rs`'s style of driving the production
//! types directly rather than through a collection of unit mocks.
//! Covers scenarios S1 (happy path) and S6 (brute-force code entry).

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use fleet_api::{build_router, ApiState};
use fleet_auth::{RateLimiter, UserResolver};
use fleet_broker::InMemoryBroker;
use fleet_notify::{BrokerChangeNotifier, ChangeNotifier, LoggingNotifier};
use fleet_session::{sleeper::fakes::ManualSleeper, AgentSession};
use fleet_store::{SqliteStore, Store};
use fleet_types::collaborators::fakes::{FixedClock, SequentialCodeGen, SequentialUuidGen};
use fleet_types::UserId;
use serde_json::{json, Value};
use tower::ServiceExt;

const TEST_USER: UserId = 7;
const TEST_TOKEN: &str = "test-session-token";

struct FixedResolver;

#[async_trait::async_trait]
impl UserResolver for FixedResolver {
    async fn resolve(&self, token: &str) -> Option<UserId> {
        (token == TEST_TOKEN).then_some(TEST_USER)
    }
}

fn test_state() -> ApiState {
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open_in_memory(
            Arc::new(FixedClock::new(chrono::Utc::now())),
            Arc::new(SequentialCodeGen::default()),
            Arc::new(SequentialUuidGen::default()),
            30,
        )
        .unwrap(),
    );
    let broker = Arc::new(InMemoryBroker::new());
    let notifier: Arc<dyn ChangeNotifier> = Arc::new(BrokerChangeNotifier::new(
        broker.clone(),
        store.clone(),
        Arc::new(LoggingNotifier::default()),
    ));
    let broker_dyn: Arc<dyn fleet_broker::Broker> = broker;
    let session = Arc::new(AgentSession::new(
        store.clone(),
        broker_dyn.clone(),
        notifier.clone(),
        Arc::new(ManualSleeper::default()),
        Duration::from_secs(30),
    ));

    ApiState {
        store,
        broker: broker_dyn,
        notifier,
        session,
        resolver: Arc::new(FixedResolver),
        rate_limiter: RateLimiter::new(),
        cors_allowlist: Arc::new(Vec::new()),
        heartbeat_interval: Duration::from_secs(30),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn happy_path_registration_and_finalize() {
    let router = build_router(test_state());

    let initiate = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/agents/register/initiate")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(initiate.status(), StatusCode::CREATED);
    let initiate_body = body_json(initiate).await;
    let reg_id = initiate_body["id"].as_str().unwrap().to_string();
    let code = initiate_body["code"].as_str().unwrap().to_string();

    let complete = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/agents/register/complete")
                .header("content-type", "application/json")
                .header("X-Session-Token", TEST_TOKEN)
                .body(Body::from(json!({ "code": code }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(complete.status(), StatusCode::OK);

    let status = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/agents/register/status/{reg_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(status.status(), StatusCode::OK);
    let status_body = body_json(status).await;
    assert_eq!(status_body["status"], "completed");
    let key = status_body["credentials"]["key"].as_str().unwrap().to_string();

    // polling again after delete returns 404: the registration row is gone.
    let second_poll = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/agents/register/status/{reg_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second_poll.status(), StatusCode::NOT_FOUND);

    let finalize = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/agents/register/finalize")
                .header("Authorization", format!("Agent {key}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(finalize.status(), StatusCode::OK);

    // now registered, so the Agent-key-authorized surface accepts it.
    let me = router
        .oneshot(
            Request::builder()
                .uri("/api/agents/me")
                .header("Authorization", format!("Agent {key}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(me.status(), StatusCode::OK);
}

#[tokio::test]
async fn brute_force_code_entry_locks_out_after_five_failures() {
    let state = test_state();
    let store = state.store.clone();
    store.create_registration().unwrap();
    let router = build_router(state);

    for attempt in 0..5 {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/agents/register/complete")
                    .header("content-type", "application/json")
                    .header("X-Session-Token", TEST_TOKEN)
                    .body(Body::from(json!({ "code": "000000" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "attempt {attempt} should be rejected as a wrong code"
        );
    }

    // the 6th attempt, even with the right code, now reports lockout
    // rather than re-evaluating the guess: the registration already
    // escalated to Expired on the store side.
    let sixth = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/agents/register/complete")
                .header("content-type", "application/json")
                .header("X-Session-Token", TEST_TOKEN)
                .body(Body::from(json!({ "code": "000000" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(sixth.status(), StatusCode::BAD_REQUEST);
    let body = body_json(sixth).await;
    assert!(body["detail"].as_str().unwrap().contains("Invalid or expired"));
}

#[tokio::test]
async fn unregister_publishes_force_disconnect_and_lists_drop_the_agent() {
    let state = test_state();
    let store = state.store.clone();
    let reg = store.create_registration().unwrap();
    let agent = store.claim_registration(&reg.code, TEST_USER).unwrap();
    let agent = store.finalize_registration(agent.id).unwrap();
    let key = agent.key;

    let router = build_router(state);

    let unregister = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/agents/unregister/")
                .header("Authorization", format!("Agent {key}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    // the agent is no longer Registered by the time the handler
    // returns, so a second call can't even authenticate.
    assert_eq!(unregister.status(), StatusCode::OK);

    let second = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/agents/unregister/")
                .header("Authorization", format!("Agent {key}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::UNAUTHORIZED);
}
