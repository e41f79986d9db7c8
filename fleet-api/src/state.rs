use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use fleet_auth::{RateLimiter, UserResolver};
use fleet_broker::Broker;
use fleet_notify::ChangeNotifier;
use fleet_session::AgentSession;
use fleet_store::Store;

/// Shared application state for all `fleet-api` routes, grounded on
/// `hr-api::state::ApiState`'s plain-struct-of-`Arc`s shape.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn Store>,
    pub broker: Arc<dyn Broker>,
    pub notifier: Arc<dyn ChangeNotifier>,
    pub session: Arc<AgentSession>,
    pub resolver: Arc<dyn UserResolver>,
    pub rate_limiter: RateLimiter,
    /// Allowed `Origin` values for the SSE endpoint's CORS header
    /// (spec §4.6 item 2). Empty means no cross-origin access.
    pub cors_allowlist: Arc<Vec<String>>,
    /// Client Stream heartbeat cadence (spec §4.6 item 5, default 30s).
    pub heartbeat_interval: Duration,
}

impl FromRef<ApiState> for Arc<dyn Store> {
    fn from_ref(state: &ApiState) -> Self {
        state.store.clone()
    }
}

impl FromRef<ApiState> for Arc<dyn UserResolver> {
    fn from_ref(state: &ApiState) -> Self {
        state.resolver.clone()
    }
}
