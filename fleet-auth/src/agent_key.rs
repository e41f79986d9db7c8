//! Agent-key authorization: `Authorization: Agent <UUID>` (spec §6),
//! grounded on `examples/original_source/core/authentication.py`'s
//! `AgentAuthentication.authenticate` — header prefix check, key
//! lookup, `RegistrationStatus == Registered` gate, else 401.

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Json;
use fleet_store::Store;
use fleet_types::{Agent, AgentKey, RegistrationStatus};
use serde_json::json;

const HEADER_PREFIX: &str = "Agent ";

/// Extracted, registered agent identified by its bearer key.
#[derive(Debug, Clone)]
pub struct AuthorizedAgent(pub Agent);

impl<S> FromRequestParts<S> for AuthorizedAgent
where
    S: Send + Sync,
    Arc<dyn Store>: FromRef<S>,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let key = extract_key(parts).ok_or_else(invalid)?;

        let store = Arc::<dyn Store>::from_ref(state);

        let agent = tokio::task::spawn_blocking(move || store.get_agent_by_key(key))
            .await
            .map_err(|_| invalid())?
            .map_err(|_| invalid())?;

        if agent.registration_status != RegistrationStatus::Registered {
            return Err(invalid());
        }

        Ok(AuthorizedAgent(agent))
    }
}

fn extract_key(parts: &Parts) -> Option<AgentKey> {
    let header = parts.headers.get("Authorization")?.to_str().ok()?;
    let raw = header.strip_prefix(HEADER_PREFIX)?;
    raw.trim().parse().ok()
}

fn invalid() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "invalid or not registered agent key" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn parts_with_auth(value: &str) -> Parts {
        let mut req = axum::http::Request::new(());
        req.headers_mut()
            .insert("Authorization", HeaderValue::from_str(value).unwrap());
        let (parts, _) = req.into_parts();
        parts
    }

    #[test]
    fn extracts_key_from_well_formed_header() {
        let key = uuid::Uuid::new_v4();
        let parts = parts_with_auth(&format!("Agent {key}"));
        assert_eq!(extract_key(&parts), Some(key));
    }

    #[test]
    fn rejects_missing_prefix() {
        let key = uuid::Uuid::new_v4();
        let parts = parts_with_auth(&key.to_string());
        assert_eq!(extract_key(&parts), None);
    }

    #[test]
    fn rejects_malformed_uuid() {
        let parts = parts_with_auth("Agent not-a-uuid");
        assert_eq!(extract_key(&parts), None);
    }
}
