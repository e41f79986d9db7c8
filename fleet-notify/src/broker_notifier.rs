use std::sync::Arc;

use async_trait::async_trait;
use fleet_broker::Broker;
use fleet_store::Store;
use fleet_types::{
    Agent, AgentId, ClientAgent, ClientEvent, ClientService, Service, ServiceStatus, UserId,
    client_group_name,
};

use crate::{ChangeNotifier, Notifier, status_push_channel};

/// Translates Store post-images into `client.*` broadcasts on the
/// owner's client group, plus a push notification. Grounded on
/// `core/receivers.py`'s Django signal handlers and
/// `core/consumers/events/broadcasting.py`'s `group_send` helpers —
/// here there's no ORM signal to hang off, so callers invoke this
/// directly after a Store mutation commits (spec §9's REDESIGN FLAG).
pub struct BrokerChangeNotifier<B: Broker> {
    broker: Arc<B>,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
}

impl<B: Broker> BrokerChangeNotifier<B> {
    pub fn new(broker: Arc<B>, store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self { broker, store, notifier }
    }

    async fn broadcast(&self, owner: UserId, event: &ClientEvent) {
        let Ok(payload) = serde_json::to_string(event) else {
            tracing::warn!("failed to serialize client event");
            return;
        };
        if let Err(err) = self.broker.publish(&client_group_name(owner), payload).await {
            tracing::warn!(%err, owner, "failed to publish client event");
        }
    }
}

#[async_trait]
impl<B: Broker> ChangeNotifier for BrokerChangeNotifier<B> {
    async fn agent_status_changed(&self, agent: &Agent) {
        let Some(owner) = agent.owner else { return };

        let (title, icon) = if agent.is_online {
            (format!("\"{}\" is online", agent.name), "ok.png")
        } else {
            (format!("\"{}\" went offline", agent.name), "server.png")
        };
        self.notifier.push(owner, &title, "", "agent-status", icon).await;

        let store = self.store.clone();
        let agent_id = agent.id;
        let services = tokio::task::spawn_blocking(move || store.list_services(agent_id))
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default();

        let client_agent = ClientAgent::from_agent_and_services(agent, &services);
        self.broadcast(owner, &ClientEvent::StatusUpdate { agent: client_agent }).await;
    }

    async fn service_added(&self, owner: UserId, agent_id: AgentId, service: &Service) {
        self.broadcast(
            owner,
            &ClientEvent::ServiceAdded {
                agent_id,
                service: ClientService::from(service),
            },
        )
        .await;
    }

    async fn service_removed(&self, owner: UserId, agent_id: AgentId, service_id: &str) {
        self.broadcast(
            owner,
            &ClientEvent::ServiceRemoved {
                agent_id,
                service_id: service_id.to_string(),
            },
        )
        .await;
    }

    async fn service_status_changed(
        &self,
        owner: UserId,
        agent_id: AgentId,
        service: &Service,
        old_status: ServiceStatus,
    ) {
        self.broadcast(
            owner,
            &ClientEvent::ServiceStatusUpdate {
                agent_id,
                service_id: service.service_id.clone(),
                status: service.last_status,
                message: service.last_message.clone(),
                timestamp: service.last_seen.unwrap_or_default(),
            },
        )
        .await;

        if old_status == service.last_status {
            return;
        }
        let channel = format!("service-{}", status_push_channel(service.last_status));
        let icon = format!("{}.png", status_push_channel(service.last_status));
        let title = format!("{} - {:?}", service.name, service.last_status);
        self.notifier.push(owner, &title, &service.last_message, &channel, &icon).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleet_broker::InMemoryBroker;
    use fleet_broker::Received;
    use fleet_store::SqliteStore;
    use fleet_types::collaborators::{SystemClock, SystemCodeGen, SystemUuidGen};
    use std::time::Duration;

    struct NoopNotifier;

    #[async_trait]
    impl Notifier for NoopNotifier {
        async fn push(&self, _user_id: UserId, _title: &str, _body: &str, _channel: &str, _icon: &str) {}
    }

    fn in_memory_store() -> Arc<dyn Store> {
        Arc::new(
            SqliteStore::open_in_memory(
                Arc::new(SystemClock),
                Arc::new(SystemCodeGen),
                Arc::new(SystemUuidGen),
                5,
            )
            .unwrap(),
        )
    }

    fn service() -> Service {
        Service {
            agent_id: 1,
            service_id: "svc-a".into(),
            name: "nginx".into(),
            description: String::new(),
            version: String::new(),
            schedule: String::new(),
            last_status: ServiceStatus::Error,
            last_message: "crashed".into(),
            last_seen: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn service_status_change_reaches_subscriber() {
        let broker = Arc::new(InMemoryBroker::default());
        let notifier = BrokerChangeNotifier::new(broker.clone(), in_memory_store(), Arc::new(NoopNotifier));

        let channel = broker.new_channel();
        broker.join(&client_group_name(7), channel).await.unwrap();

        notifier
            .service_status_changed(7, 1, &service(), ServiceStatus::Unknown)
            .await;

        match broker.receive(channel, Duration::from_millis(100)).await {
            Received::Message(payload) => assert!(payload.contains("client.service_status_update")),
            other => panic!("expected a message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn agent_status_changed_embeds_the_agents_services() {
        use fleet_types::events::AgentServiceReport;

        let store = in_memory_store();
        let reg = store.create_registration().unwrap();
        let agent = store.claim_registration(&reg.code, 7).unwrap();
        let agent = store.finalize_registration(agent.id).unwrap();
        store
            .add_service(
                agent.id,
                &AgentServiceReport {
                    id: "svc-a".into(),
                    name: "nginx".into(),
                    description: String::new(),
                    version: String::new(),
                    schedule: String::new(),
                },
            )
            .unwrap();
        let agent = store.mark_connected(agent.id).unwrap().0;

        let broker = Arc::new(InMemoryBroker::default());
        let notifier = BrokerChangeNotifier::new(broker.clone(), store, Arc::new(NoopNotifier));

        let channel = broker.new_channel();
        broker.join(&client_group_name(7), channel).await.unwrap();

        notifier.agent_status_changed(&agent).await;

        match broker.receive(channel, Duration::from_millis(100)).await {
            Received::Message(payload) => assert!(payload.contains("svc-a")),
            other => panic!("expected a message, got {other:?}"),
        }
    }
}
