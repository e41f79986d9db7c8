//! `GET /api/agents`, `GET /api/agents/{id}`, `PATCH /api/agents/{id}`,
//! `GET /api/agents/me` — the read/rename surface supplementing
//! spec.md's core Registration Flow (SPEC_FULL.md §3/§4.7), grounded
//! on `original_source/core/views.py::AgentViewSet`/`AgentMeView`.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, patch};
use axum::Router;
use fleet_auth::{AuthUser, AuthorizedAgent};
use fleet_store::Store;
use fleet_types::{Agent, AgentId, ClientAgent, Service};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::ApiState;

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/api/agents", get(list))
        .route("/api/agents/{id}", get(get_one).patch(rename))
        .route("/api/agents/me", get(me))
}

fn to_client_agent((agent, services): (Agent, Vec<Service>)) -> ClientAgent {
    ClientAgent::from_agent_and_services(&agent, &services)
}

async fn list(
    State(state): State<ApiState>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.clone();
    let agents = tokio::task::spawn_blocking(move || store.list_user_agents(user_id))
        .await
        .map_err(|_| ApiError::Internal)??;

    Ok(Json(
        agents.into_iter().map(to_client_agent).collect::<Vec<_>>(),
    ))
}

async fn get_one(
    State(state): State<ApiState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<AgentId>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.clone();
    let agent = tokio::task::spawn_blocking(move || store.get_agent_owned(id, user_id))
        .await
        .map_err(|_| ApiError::Internal)??;

    let store = state.store.clone();
    let services = tokio::task::spawn_blocking(move || store.list_services(id))
        .await
        .map_err(|_| ApiError::Internal)??;

    Ok(Json(ClientAgent::from_agent_and_services(&agent, &services)))
}

#[derive(Deserialize)]
struct RenameRequest {
    name: String,
}

async fn rename(
    State(state): State<ApiState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<AgentId>,
    Json(body): Json<RenameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".into()));
    }

    let store = state.store.clone();
    let name = body.name;
    let agent = tokio::task::spawn_blocking(move || store.rename_agent(id, user_id, &name))
        .await
        .map_err(|_| ApiError::Internal)??;

    let store = state.store.clone();
    let services = tokio::task::spawn_blocking(move || store.list_services(id))
        .await
        .map_err(|_| ApiError::Internal)??;

    state.notifier.agent_status_changed(&agent).await;

    Ok(Json(ClientAgent::from_agent_and_services(&agent, &services)))
}

async fn me(
    State(state): State<ApiState>,
    AuthorizedAgent(agent): AuthorizedAgent,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.clone();
    let agent_id = agent.id;
    let services = tokio::task::spawn_blocking(move || store.list_services(agent_id))
        .await
        .map_err(|_| ApiError::Internal)??;

    Ok(Json(ClientAgent::from_agent_and_services(&agent, &services)))
}
