use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AgentId = i64;
pub type UserId = i64;
pub type RegId = Uuid;

/// The agent's bearer credential. Unique, immutable, never reused
/// after an agent is unregistered.
pub type AgentKey = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Pending,
    Registered,
    Unregistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    Ok,
    Warning,
    Error,
    Update,
    Failure,
    Unknown,
}

impl Default for ServiceStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub key: AgentKey,
    pub name: String,
    pub owner: Option<UserId>,
    pub registration_status: RegistrationStatus,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    /// `None` iff the agent currently holds a live session.
    pub last_seen: Option<DateTime<Utc>>,
    pub is_online: bool,
    pub grace_period_secs: u64,
}

impl Agent {
    pub fn default_name(key: &AgentKey) -> String {
        format!("Agent-{}", &key.to_string()[..8])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub agent_id: AgentId,
    pub service_id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub schedule: String,
    pub last_status: ServiceStatus,
    pub last_message: String,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    Pending,
    Completed,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub reg_id: RegId,
    pub code: String,
    pub status: RegistrationState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub failed_attempts: u32,
    /// Populated once `status == Completed`; carries the claimed
    /// agent's key.
    pub agent_key: Option<AgentKey>,
}

/// Client-facing projection of a [`Service`], embedded in
/// [`ClientAgent`](crate::events::ClientAgent).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClientService {
    pub service_id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub schedule: String,
    pub last_status: ServiceStatus,
    pub last_message: String,
    pub last_seen: Option<DateTime<Utc>>,
}

impl From<&Service> for ClientService {
    fn from(s: &Service) -> Self {
        Self {
            service_id: s.service_id.clone(),
            name: s.name.clone(),
            description: s.description.clone(),
            version: s.version.clone(),
            schedule: s.schedule.clone(),
            last_status: s.last_status,
            last_message: s.last_message.clone(),
            last_seen: s.last_seen,
        }
    }
}

/// Client-facing projection of an [`Agent`] plus its services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClientAgent {
    pub id: AgentId,
    pub name: String,
    pub ip_address: Option<String>,
    pub registration_status: RegistrationStatus,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub services: Vec<ClientService>,
}

impl ClientAgent {
    pub fn from_agent_and_services(agent: &Agent, services: &[Service]) -> Self {
        Self {
            id: agent.id,
            name: agent.name.clone(),
            ip_address: agent.ip_address.clone(),
            registration_status: agent.registration_status,
            is_online: agent.is_online,
            last_seen: agent.last_seen,
            services: services.iter().map(ClientService::from).collect(),
        }
    }
}
