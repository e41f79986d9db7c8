use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AgentKey, ClientAgent, ClientService, ServiceStatus};

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("unknown event type")]
    UnknownType,
    #[error("invalid event payload: {0}")]
    Invalid(String),
}

/// One service entry as reported inside `agent.ready` /
/// `agent.service_added`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentServiceReport {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub schedule: String,
}

/// Events an agent sends over its WebSocket connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "agent.ready")]
    Ready { services: Vec<AgentServiceReport> },

    #[serde(rename = "agent.service_added")]
    ServiceAdded { service: AgentServiceReport },

    #[serde(rename = "agent.service_removed")]
    ServiceRemoved { service_id: String },

    #[serde(rename = "agent.service_status_update")]
    ServiceStatusUpdate {
        service_id: String,
        status: ServiceStatus,
        #[serde(default)]
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl AgentEvent {
    /// Parse a single inbound frame, distinguishing an unrecognized
    /// discriminant from a malformed payload for a known one.
    pub fn parse(raw: &str) -> Result<Self, EventError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| EventError::Invalid(e.to_string()))?;
        let Some(ty) = value.get("type").and_then(|v| v.as_str()) else {
            return Err(EventError::Invalid("missing `type` field".into()));
        };
        const KNOWN: &[&str] = &[
            "agent.ready",
            "agent.service_added",
            "agent.service_removed",
            "agent.service_status_update",
        ];
        if !KNOWN.contains(&ty) {
            return Err(EventError::UnknownType);
        }
        serde_json::from_value(value).map_err(|e| EventError::Invalid(e.to_string()))
    }
}

/// Events broadcast to client subscribers (`client.*` namespace).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "client.initial_status")]
    InitialStatus { agents: Vec<ClientAgent> },

    #[serde(rename = "client.status_update")]
    StatusUpdate { agent: ClientAgent },

    #[serde(rename = "client.service_added")]
    ServiceAdded {
        agent_id: i64,
        service: ClientService,
    },

    #[serde(rename = "client.service_removed")]
    ServiceRemoved { agent_id: i64, service_id: String },

    #[serde(rename = "client.service_status_update")]
    ServiceStatusUpdate {
        agent_id: i64,
        service_id: String,
        status: ServiceStatus,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ClientEvent {
    pub fn validate(raw: &str) -> Result<Self, EventError> {
        serde_json::from_str(raw).map_err(|e| EventError::Invalid(e.to_string()))
    }
}

/// Internal control-plane messages carried on an agent's own group
/// (`agent_{key}`), never exposed to end users.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Sent by a new session before it joins the group, to evict any
    /// prior session holding the same key.
    #[serde(rename = "supersede")]
    Supersede { new_channel: uuid::Uuid },
    /// Sent when the agent is unregistered while a session is live.
    #[serde(rename = "force_disconnect")]
    ForceDisconnect,
}

pub fn agent_key_channel_target(key: &AgentKey) -> String {
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_ready_round_trips() {
        let event = AgentEvent::Ready {
            services: vec![AgentServiceReport {
                id: "svc-1".into(),
                name: "nginx".into(),
                description: String::new(),
                version: "1.0".into(),
                schedule: String::new(),
            }],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"agent.ready"#));
        let parsed = AgentEvent::parse(&json).unwrap();
        match parsed {
            AgentEvent::Ready { services } => assert_eq!(services.len(), 1),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_type_is_rejected_distinctly() {
        let raw = r#"{"type":"agent.reboot"}"#;
        match AgentEvent::parse(raw) {
            Err(EventError::UnknownType) => {}
            other => panic!("expected UnknownType, got {other:?}"),
        }
    }

    #[test]
    fn missing_required_field_is_invalid() {
        let raw = r#"{"type":"agent.service_removed"}"#;
        match AgentEvent::parse(raw) {
            Err(EventError::Invalid(_)) => {}
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn client_status_update_round_trips() {
        let event = ClientEvent::ServiceRemoved {
            agent_id: 7,
            service_id: "svc-1".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: ClientEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            ClientEvent::ServiceRemoved { agent_id, .. } => assert_eq!(agent_id, 7),
            _ => panic!("wrong variant"),
        }
    }
}
