pub mod client_ip;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws_transport;

use axum::Router;
use tower_http::trace::TraceLayer;

pub use state::ApiState;

/// Build the complete HTTP/WS surface (spec §6), grounded on
/// `hr-api::build_router`'s merge-of-full-path-routers shape, minus
/// the static-asset fallback this system has no use for.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .merge(routes::agent_ws::router())
        .merge(routes::client_sse::router())
        .merge(routes::registration::router())
        .merge(routes::agents::router())
        .merge(routes::health::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
