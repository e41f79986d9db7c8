//! `/ws/agent/{key}/` — the agent transport's upgrade handler (spec
//! §6). All protocol behavior after the upgrade lives in
//! `fleet_session::AgentSession::run`; this module only adapts the
//! transport and the peer IP. Grounded on `hr-api/src/routes/ws.rs`'s
//! `ws.on_upgrade(move |socket| ...)` shape.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use axum::http::HeaderMap;

use crate::client_ip::client_ip;
use crate::state::ApiState;
use crate::ws_transport::WsTransport;

pub fn router() -> Router<ApiState> {
    Router::new().route("/ws/agent/{key}/", get(agent_ws_handler))
}

async fn agent_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> impl IntoResponse {
    let peer_ip = client_ip(&headers, peer.as_ref());
    ws.on_upgrade(move |socket| async move {
        let transport = WsTransport::new(socket, peer_ip);
        state.session.run(&key, transport).await;
    })
}
