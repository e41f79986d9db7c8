pub mod broker_notifier;
pub mod logging;

use async_trait::async_trait;
use fleet_types::{Agent, AgentId, Service, ServiceStatus, UserId};

/// Device push delivery (`Notify.Push` in the external-interfaces
/// contract). Fire and forget: implementations must never propagate
/// an error back into a Store mutation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn push(&self, user_id: UserId, title: &str, body: &str, channel: &str, icon: &str);
}

/// Post-commit hook invoked by `fleet-store` after every mutation
/// that changes externally visible state. Implementations must be
/// cheap and must not fail the caller — the DB commit is always
/// authoritative, the broadcast is best-effort.
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    /// Called once after `MarkConnected`/`MarkDisconnected` actually
    /// flips `is_online`.
    async fn agent_status_changed(&self, agent: &Agent);

    async fn service_added(&self, owner: UserId, agent_id: AgentId, service: &Service);

    async fn service_removed(&self, owner: UserId, agent_id: AgentId, service_id: &str);

    /// `old_status` is the pre-image captured inside the same
    /// transaction as the write, never via a second read.
    async fn service_status_changed(
        &self,
        owner: UserId,
        agent_id: AgentId,
        service: &Service,
        old_status: ServiceStatus,
    );
}

pub use broker_notifier::BrokerChangeNotifier;
pub use logging::LoggingNotifier;

/// Maps a service's new status to a push-notification channel id,
/// matching the fixed set of categories the original notification
/// channel registration recognized.
pub fn status_push_channel(status: ServiceStatus) -> &'static str {
    match status {
        ServiceStatus::Ok => "ok",
        ServiceStatus::Warning => "warning",
        ServiceStatus::Error => "error",
        ServiceStatus::Update => "update",
        ServiceStatus::Failure => "failure",
        ServiceStatus::Unknown => "unknown",
    }
}
