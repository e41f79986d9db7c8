pub mod error;
pub mod sqlite;

use chrono::{DateTime, Utc};
use fleet_types::events::AgentServiceReport;
use fleet_types::{Agent, AgentId, AgentKey, AgentRegistration, RegId, Service, ServiceStatus, UserId};

pub use error::StoreError;
pub use sqlite::SqliteStore;

/// Outcome of polling a registration (§4.7 item 3): the registration
/// may be claimed, expired, or still in flight. Completing or expiring
/// it is a one-shot read — the row is deleted as part of the poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationPoll {
    Pending,
    Completed { key: AgentKey },
    Expired,
}

/// Narrow transactional operations over Agent/Service/AgentRegistration
/// state (spec §4.2). Every method is synchronous and may block on
/// disk I/O: callers running on the async runtime should execute them
/// via `tokio::task::spawn_blocking` rather than holding an executor
/// thread (§5's "Store mutation/query (may block on DB)" suspension
/// point) — this mirrors the teacher's own `SessionStore`, which is
/// likewise a plain `Mutex<Connection>` called directly rather than
/// wrapped in an async trait.
pub trait Store: Send + Sync {
    fn get_agent_by_key(&self, key: AgentKey) -> Result<Agent, StoreError>;
    /// Same lookup as `get_agent_by_key` but without the
    /// `registration_status = 'registered'` filter — for callers that
    /// must find a Pending agent by its key (finalize, §4.7 item 4).
    fn get_agent_by_key_any(&self, key: AgentKey) -> Result<Agent, StoreError>;
    fn get_agent(&self, id: AgentId) -> Result<Agent, StoreError>;
    fn get_agent_owned(&self, id: AgentId, owner: UserId) -> Result<Agent, StoreError>;
    fn list_user_agents(&self, owner: UserId) -> Result<Vec<(Agent, Vec<Service>)>, StoreError>;
    fn list_services(&self, agent_id: AgentId) -> Result<Vec<Service>, StoreError>;
    fn rename_agent(&self, id: AgentId, owner: UserId, name: &str) -> Result<Agent, StoreError>;

    fn create_registration(&self) -> Result<AgentRegistration, StoreError>;
    /// On a code mismatch, penalizes the single most-recently-created
    /// outstanding registration (see DESIGN.md's Open Question
    /// resolution on attempt scoping) rather than the record the code
    /// would have matched, since no caller-supplied `RegId`
    /// disambiguates which registration a wrong guess targets.
    fn claim_registration(&self, code: &str, user: UserId) -> Result<Agent, StoreError>;
    fn finalize_registration(&self, agent_id: AgentId) -> Result<Agent, StoreError>;
    fn poll_registration(&self, reg_id: RegId) -> Result<RegistrationPoll, StoreError>;

    fn unregister(&self, agent_id: AgentId) -> Result<(), StoreError>;
    fn update_agent_ip(&self, agent_id: AgentId, ip: Option<&str>) -> Result<(), StoreError>;
    /// Returns the updated agent plus whether this call is the one
    /// that flipped it from offline to online.
    fn mark_connected(&self, agent_id: AgentId) -> Result<(Agent, bool), StoreError>;
    /// Returns the updated agent plus whether this call is the one
    /// that flipped it from online to offline.
    fn mark_disconnected(&self, agent_id: AgentId) -> Result<(Agent, bool), StoreError>;
    /// `agent.ready`'s combined upsert-then-delete-excluded sync, plus
    /// `MarkConnected`, inside one transaction (§4.2/§4.5). Returns the
    /// post-image Agent (for the `agent_status_changed` notification)
    /// alongside the synced services and the online-transition flag.
    fn sync_services_and_connect(
        &self,
        agent_id: AgentId,
        incoming: &[AgentServiceReport],
    ) -> Result<(Agent, Vec<Service>, bool), StoreError>;

    fn add_service(&self, agent_id: AgentId, service: &AgentServiceReport) -> Result<Service, StoreError>;
    /// Idempotent: a missing row is logged and treated as success.
    /// Returns whether a row was actually deleted, so callers only
    /// emit a change notification for a real removal.
    fn remove_service(&self, agent_id: AgentId, service_id: &str) -> Result<bool, StoreError>;
    /// `Ok(None)` when the service row is missing (logged, non-fatal);
    /// otherwise the updated service and its pre-image status, read
    /// inside the same transaction as the write.
    fn update_service_status(
        &self,
        agent_id: AgentId,
        service_id: &str,
        status: ServiceStatus,
        message: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<(Service, ServiceStatus)>, StoreError>;
}
