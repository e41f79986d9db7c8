//! `GET /api/sse/agents/` — the Client Stream (spec §4.6). Grounded
//! on `examples/original_source/core/consumers/client_consumer.py`'s
//! `AsyncHttpConsumer.handle` loop (manual SSE headers,
//! `asyncio.wait_for(..., timeout=30)` + heartbeat comment), expressed
//! as an axum streaming body the way the teacher's
//! `hr-api/src/routes/traffic.rs::sse_events` builds one with
//! `async-stream`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use fleet_auth::AuthUser;
use fleet_broker::{Broker, Received};
use fleet_store::Store;
use fleet_types::{ClientAgent, ClientEvent, client_group_name};

use crate::state::ApiState;

pub fn router() -> Router<ApiState> {
    Router::new().route("/api/sse/agents/", get(sse_handler))
}

/// Drops the channel and leaves its group once the client disconnects
/// and the stream is torn down. `Drop` can't await, so the cleanup
/// itself is a short fire-and-forget task — matches the `finally:`
/// block's `group_discard`/cleanup in the original consumer, just
/// phrased for a type without destructors that can yield.
struct SseCleanup {
    broker: Arc<dyn Broker>,
    group: String,
    channel: fleet_broker::ChannelId,
}

impl Drop for SseCleanup {
    fn drop(&mut self) {
        let broker = self.broker.clone();
        let group = self.group.clone();
        let channel = self.channel;
        tokio::spawn(async move {
            broker.leave(&group, channel).await.ok();
            broker.close_channel(channel).await;
        });
    }
}

async fn sse_handler(
    axum::extract::State(state): axum::extract::State<ApiState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
) -> Response {
    let store = state.store.clone();
    let snapshot = match tokio::task::spawn_blocking(move || store.list_user_agents(user_id)).await
    {
        Ok(Ok(agents)) => agents,
        _ => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "failed to load agents").into_response();
        }
    };
    let initial = ClientEvent::InitialStatus {
        agents: snapshot
            .iter()
            .map(|(agent, services)| ClientAgent::from_agent_and_services(agent, services))
            .collect(),
    };
    let Ok(initial_json) = serde_json::to_string(&initial) else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to serialize snapshot").into_response();
    };

    let group = client_group_name(user_id);
    let channel = state.broker.new_channel();
    if state.broker.join(&group, channel).await.is_err() {
        tracing::warn!(user_id, "failed to join client group");
    }

    let cleanup = SseCleanup {
        broker: state.broker.clone(),
        group: group.clone(),
        channel,
    };
    let broker = state.broker.clone();
    let heartbeat = state.heartbeat_interval;

    let body_stream = async_stream::stream! {
        let _cleanup = cleanup;
        yield Ok::<Bytes, std::convert::Infallible>(Bytes::from(format!("data: {initial_json}\n\n")));
        loop {
            match broker.receive(channel, heartbeat).await {
                Received::Message(raw) => {
                    // §4.6 step 5: re-validate against the Client event
                    // schema before relaying — a malformed or stale
                    // payload is logged and skipped, the subscriber
                    // stays connected (§4.6's failure policy).
                    if let Err(err) = serde_json::from_str::<ClientEvent>(&raw) {
                        tracing::warn!(%err, user_id, "dropping invalid client event before relay");
                        continue;
                    }
                    yield Ok(Bytes::from(format!("data: {raw}\n\n")));
                }
                Received::Timeout => {
                    yield Ok(Bytes::from_static(b":heartbeat\n\n"));
                }
                Received::Closed => break,
            }
        }
    };

    let mut response = Response::new(Body::from_stream(body_stream));
    *response.status_mut() = StatusCode::OK;
    let h = response.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    h.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    h.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    if let Some(origin) = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .filter(|origin| state.cors_allowlist.iter().any(|allowed| allowed == origin))
    {
        if let Ok(value) = HeaderValue::from_str(origin) {
            h.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
    }
    response
}
