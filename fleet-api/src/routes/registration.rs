//! `/api/agents/register/*` and `/api/agents/unregister/` (spec §4.7,
//! §6). Grounded on `original_source/core/views.py`'s
//! `InitiateAgentRegistrationView`/`CompleteAgentRegistrationView`/
//! `AgentRegistrationStatusView`/`AgentUnregisterView`, with the
//! two-step Pending→Registered split spec.md itself spells out rather
//! than the original's single-shot completion.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use fleet_auth::{AuthUser, AuthorizedAgent, Decision, Rule};
use fleet_store::{RegistrationPoll, Store, StoreError};
use fleet_types::{agent_group_name, ControlMessage, RegId};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client_ip::client_ip;
use crate::error::ApiError;
use crate::state::ApiState;

const INITIATE_RULE: Rule = Rule::new(5, Duration::from_secs(15 * 60));
const COMPLETE_RULE: Rule = Rule::new(5, Duration::from_secs(15 * 60));
const STATUS_RULE: Rule = Rule::new(120, Duration::from_secs(15 * 60));

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/api/agents/register/initiate", post(initiate))
        .route("/api/agents/register/complete", post(complete))
        .route("/api/agents/register/status/{reg_id}", get(status))
        .route("/api/agents/register/finalize", post(finalize))
        .route("/api/agents/unregister/", post(unregister))
}

#[derive(Serialize)]
struct InitiateResponse {
    id: RegId,
    code: String,
    status: &'static str,
    expires_at: chrono::DateTime<chrono::Utc>,
}

async fn initiate(
    State(state): State<ApiState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Result<impl IntoResponse, ApiError> {
    let ip = client_ip(&headers, peer.as_ref()).unwrap_or_else(|| "unknown".to_string());
    if state.rate_limiter.check(&format!("register-initiate:{ip}"), INITIATE_RULE) == Decision::Deny {
        return Err(ApiError::RateLimited);
    }

    let store = state.store.clone();
    let reg = tokio::task::spawn_blocking(move || store.create_registration())
        .await
        .map_err(|_| ApiError::Internal)??;

    Ok((
        StatusCode::CREATED,
        Json(InitiateResponse {
            id: reg.reg_id,
            code: reg.code,
            status: "pending",
            expires_at: reg.expires_at,
        }),
    ))
}

#[derive(Deserialize)]
struct CompleteRequest {
    code: String,
}

async fn complete(
    State(state): State<ApiState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(body): Json<CompleteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ip = client_ip(&headers, peer.as_ref()).unwrap_or_else(|| "unknown".to_string());
    if state.rate_limiter.check(&format!("register-complete:{ip}"), COMPLETE_RULE) == Decision::Deny {
        return Err(ApiError::RateLimited);
    }

    let store = state.store.clone();
    let code = body.code;
    // The claimed agent is freshly Pending and has never held a live
    // session, so there is no online/offline transition to announce
    // here — the first broadcast is its WS connect (spec S1 step 5).
    tokio::task::spawn_blocking(move || store.claim_registration(&code, user_id))
        .await
        .map_err(|_| ApiError::Internal)?
        .map_err(|err| match err {
            StoreError::TooManyAttempts => ApiError::TooManyAttempts,
            other => other.into(),
        })?;

    Ok(Json(json!({ "message": "registration completed" })))
}

#[derive(Serialize)]
#[serde(untagged)]
enum StatusResponse {
    Pending {
        status: &'static str,
    },
    Completed {
        status: &'static str,
        credentials: Credentials,
    },
    Expired {
        status: &'static str,
    },
}

#[derive(Serialize)]
struct Credentials {
    key: fleet_types::AgentKey,
}

async fn status(
    State(state): State<ApiState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Path(reg_id): Path<RegId>,
) -> Result<impl IntoResponse, ApiError> {
    let ip = client_ip(&headers, peer.as_ref()).unwrap_or_else(|| "unknown".to_string());
    if state.rate_limiter.check(&format!("register-status:{ip}"), STATUS_RULE) == Decision::Deny {
        return Err(ApiError::RateLimited);
    }

    let store = state.store.clone();
    let poll = tokio::task::spawn_blocking(move || store.poll_registration(reg_id))
        .await
        .map_err(|_| ApiError::Internal)??;

    match poll {
        RegistrationPoll::Pending => Ok((
            StatusCode::OK,
            Json(StatusResponse::Pending { status: "pending" }),
        )),
        RegistrationPoll::Completed { key } => Ok((
            StatusCode::OK,
            Json(StatusResponse::Completed {
                status: "completed",
                credentials: Credentials { key },
            }),
        )),
        RegistrationPoll::Expired => Ok((
            StatusCode::GONE,
            Json(StatusResponse::Expired { status: "expired" }),
        )),
    }
}

/// `AuthorizedAgent` enforces `RegistrationStatus::Registered`, which
/// is exactly the status a Pending agent doesn't have yet — finalize
/// looks the key up directly instead, same header shape as
/// `fleet_auth::agent_key` but via `get_agent_by_key_any`, which skips
/// the Registered gate.
fn parse_agent_key_header(headers: &HeaderMap) -> Option<fleet_types::AgentKey> {
    let raw = headers.get("Authorization")?.to_str().ok()?;
    raw.strip_prefix("Agent ")?.trim().parse().ok()
}

async fn finalize(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let key = parse_agent_key_header(&headers).ok_or(ApiError::Unauthenticated)?;

    let store = state.store.clone();
    let agent = tokio::task::spawn_blocking(move || store.get_agent_by_key_any(key))
        .await
        .map_err(|_| ApiError::Internal)?
        .map_err(|_| ApiError::Unauthenticated)?;

    let store = state.store.clone();
    let agent_id = agent.id;
    let updated = tokio::task::spawn_blocking(move || store.finalize_registration(agent_id))
        .await
        .map_err(|_| ApiError::Internal)?
        .map_err(|err| match err {
            StoreError::NotPending => ApiError::BadRequest("agent is not pending".into()),
            other => other.into(),
        })?;

    state.notifier.agent_status_changed(&updated).await;

    Ok(Json(json!({ "message": "finalized" })))
}

async fn unregister(
    State(state): State<ApiState>,
    AuthorizedAgent(agent): AuthorizedAgent,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.clone();
    let agent_id = agent.id;
    tokio::task::spawn_blocking(move || store.unregister(agent_id))
        .await
        .map_err(|_| ApiError::Internal)??;

    let group = agent_group_name(&agent.key);
    let msg = serde_json::to_string(&ControlMessage::ForceDisconnect).unwrap_or_default();
    state.broker.publish(&group, msg).await.ok();

    let store = state.store.clone();
    if let Ok(updated) = tokio::task::spawn_blocking(move || store.get_agent(agent_id))
        .await
        .map_err(|_| ApiError::Internal)?
    {
        state.notifier.agent_status_changed(&updated).await;
    }

    Ok(Json(json!({ "message": "unregistered" })))
}
