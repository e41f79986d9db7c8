//! Pure routing of an `AgentEvent` into Store mutations and Change
//! Notifier calls (spec §4.5). Grounded on
//! `examples/original_source/core/consumers/events/__init__.py`'s
//! `handle_agent_event` dispatch table, with the notifier call made
//! explicit rather than riding on a Django post-save signal.

use std::sync::Arc;

use fleet_notify::ChangeNotifier;
use fleet_store::{Store, StoreError};
use fleet_types::{Agent, AgentEvent};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("store task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Applies one agent-sourced event to `store`, then fires whatever
/// `notifier` calls its post-commit effects require. Never called for
/// a malformed frame — callers (the Agent Session receive loop) must
/// have already parsed the event; a bad *discriminant* is filtered out
/// before reaching here, per §4.5's "dispatcher never crashes the
/// session on a single bad event".
pub async fn dispatch(
    store: &Arc<dyn Store>,
    notifier: &Arc<dyn ChangeNotifier>,
    agent: &Agent,
    event: AgentEvent,
) -> Result<(), DispatchError> {
    match event {
        AgentEvent::Ready { services } => {
            let store = store.clone();
            let agent_id = agent.id;
            let (updated, _services, became_online) =
                tokio::task::spawn_blocking(move || store.sync_services_and_connect(agent_id, &services))
                    .await??;
            if became_online {
                notifier.agent_status_changed(&updated).await;
            }
        }

        AgentEvent::ServiceAdded { service } => {
            let store = store.clone();
            let agent_id = agent.id;
            let added =
                tokio::task::spawn_blocking(move || store.add_service(agent_id, &service)).await??;
            if let Some(owner) = agent.owner {
                notifier.service_added(owner, agent_id, &added).await;
            }
        }

        AgentEvent::ServiceRemoved { service_id } => {
            let store = store.clone();
            let agent_id = agent.id;
            let sid = service_id.clone();
            let removed =
                tokio::task::spawn_blocking(move || store.remove_service(agent_id, &sid)).await??;
            if removed {
                if let Some(owner) = agent.owner {
                    notifier.service_removed(owner, agent_id, &service_id).await;
                }
            }
        }

        AgentEvent::ServiceStatusUpdate {
            service_id,
            status,
            message,
            timestamp,
        } => {
            let store = store.clone();
            let agent_id = agent.id;
            let sid = service_id.clone();
            let msg = message.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                store.update_service_status(agent_id, &sid, status, &msg, timestamp)
            })
            .await??;
            if let Some((service, old_status)) = outcome {
                if let Some(owner) = agent.owner {
                    if old_status != service.last_status {
                        notifier
                            .service_status_changed(owner, agent_id, &service, old_status)
                            .await;
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleet_broker::InMemoryBroker;
    use fleet_notify::BrokerChangeNotifier;
    use fleet_store::SqliteStore;
    use fleet_types::collaborators::fakes::{FixedClock, SequentialCodeGen, SequentialUuidGen};
    use fleet_types::{ServiceStatus, UserId};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingNotifier {
        pushed: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl fleet_notify::Notifier for RecordingNotifier {
        async fn push(&self, _user_id: UserId, title: &str, _body: &str, _channel: &str, _icon: &str) {
            self.pushed.lock().unwrap().push(title.to_string());
        }
    }

    fn make_store() -> Arc<dyn Store> {
        Arc::new(
            SqliteStore::open_in_memory(
                Arc::new(FixedClock::new(chrono::Utc::now())),
                Arc::new(SequentialCodeGen::default()),
                Arc::new(SequentialUuidGen::default()),
                30,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn ready_event_syncs_services_and_marks_online_once() {
        let store = make_store();
        let reg = store.create_registration().unwrap();
        let agent = store.claim_registration(&reg.code, 7).unwrap();
        let agent = store.finalize_registration(agent.id).unwrap();
        store.mark_disconnected(agent.id).unwrap();

        let broker = Arc::new(InMemoryBroker::default());
        let recorder = Arc::new(RecordingNotifier::default());
        let notifier: Arc<dyn ChangeNotifier> =
            Arc::new(BrokerChangeNotifier::new(broker, store.clone(), recorder.clone()));

        let event = AgentEvent::Ready {
            services: vec![fleet_types::events::AgentServiceReport {
                id: "svc-a".into(),
                name: "nginx".into(),
                description: String::new(),
                version: String::new(),
                schedule: String::new(),
            }],
        };
        dispatch(&store, &notifier, &agent, event).await.unwrap();

        assert_eq!(store.list_services(agent.id).unwrap().len(), 1);
        assert_eq!(recorder.pushed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_update_to_same_status_does_not_notify() {
        let store = make_store();
        let reg = store.create_registration().unwrap();
        let agent = store.claim_registration(&reg.code, 7).unwrap();
        let agent = store.finalize_registration(agent.id).unwrap();
        store
            .sync_services_and_connect(
                agent.id,
                &[fleet_types::events::AgentServiceReport {
                    id: "svc-a".into(),
                    name: "nginx".into(),
                    description: String::new(),
                    version: String::new(),
                    schedule: String::new(),
                }],
            )
            .unwrap();

        let broker = Arc::new(InMemoryBroker::default());
        let recorder = Arc::new(RecordingNotifier::default());
        let notifier: Arc<dyn ChangeNotifier> =
            Arc::new(BrokerChangeNotifier::new(broker, store.clone(), recorder.clone()));

        let event = AgentEvent::ServiceStatusUpdate {
            service_id: "svc-a".into(),
            status: ServiceStatus::Unknown,
            message: String::new(),
            timestamp: chrono::Utc::now(),
        };
        dispatch(&store, &notifier, &agent, event).await.unwrap();
        assert!(recorder.pushed.lock().unwrap().is_empty());
    }
}
