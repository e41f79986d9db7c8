//! The Agent Session state machine (spec §4.4): authenticate,
//! supersede, ingest, update liveness, disconnect-with-grace.
//! Grounded on `examples/original_source/core/consumers/agent_consumer.py`'s
//! `connect`/`receive`/`supersede_connection`/`disconnect`/
//! `_grace_period_disconnect` and on `hr-agent/src/connection.rs`'s
//! `tokio::select!`-driven bidirectional loop.

pub mod sleeper;
pub mod transport;

use std::sync::Arc;
use std::time::{Duration, Instant};

use fleet_broker::{Broker, Received};
use fleet_notify::ChangeNotifier;
use fleet_store::Store;
use fleet_types::{Agent, AgentEvent, AgentKey, ControlMessage, agent_group_name};

pub use sleeper::{Sleeper, TokioSleeper};
pub use transport::{Transport, TransportEvent};

/// Missed-heartbeat threshold is informational only (§4.4's
/// "supplemented heartbeat detail"): a gap this long between inbound
/// frames is logged, never forced closed.
const HEARTBEAT_WARN_MULTIPLIER: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitReason {
    TransportClosed,
    Superseded,
    ForceDisconnected,
}

/// Close codes from §6's external-interfaces contract.
pub mod close_code {
    pub const SUPERSEDED: u16 = 4000;
    pub const INVALID_KEY: u16 = 4001;
    pub const UNREGISTERED: u16 = 4002;
}

pub struct AgentSession {
    store: Arc<dyn Store>,
    broker: Arc<dyn Broker>,
    notifier: Arc<dyn ChangeNotifier>,
    sleeper: Arc<dyn Sleeper>,
    heartbeat_interval: Duration,
}

impl AgentSession {
    pub fn new(
        store: Arc<dyn Store>,
        broker: Arc<dyn Broker>,
        notifier: Arc<dyn ChangeNotifier>,
        sleeper: Arc<dyn Sleeper>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            store,
            broker,
            notifier,
            sleeper,
            heartbeat_interval,
        }
    }

    /// Drives one agent connection end to end. Returns once the
    /// transport is closed for any reason; the grace-period task (if
    /// any) is spawned independently and outlives this call, per §5's
    /// fire-and-forget requirement.
    pub async fn run<T: Transport>(&self, raw_key: &str, mut transport: T) {
        let Ok(key) = raw_key.parse::<AgentKey>() else {
            transport.close(close_code::INVALID_KEY, "invalid agent key").await;
            return;
        };

        let agent = {
            let store = self.store.clone();
            match tokio::task::spawn_blocking(move || store.get_agent_by_key(key)).await {
                Ok(Ok(agent)) => agent,
                _ => {
                    transport.close(close_code::INVALID_KEY, "invalid agent key").await;
                    return;
                }
            }
        };

        let channel = self.broker.new_channel();
        let group = agent_group_name(&key);

        if let Ok(msg) = serde_json::to_string(&ControlMessage::Supersede { new_channel: channel }) {
            let _ = self.broker.publish(&group, msg).await;
        }
        let _ = self.broker.join(&group, channel).await;

        if let Some(ip) = transport.peer_ip() {
            let store = self.store.clone();
            let agent_id = agent.id;
            let _ = tokio::task::spawn_blocking(move || store.update_agent_ip(agent_id, Some(&ip))).await;
        }

        let agent = {
            let store = self.store.clone();
            let agent_id = agent.id;
            match tokio::task::spawn_blocking(move || store.mark_connected(agent_id)).await {
                Ok(Ok((agent, became_online))) => {
                    if became_online {
                        self.notifier.agent_status_changed(&agent).await;
                    }
                    agent
                }
                _ => agent,
            }
        };

        let mut last_frame_at = Instant::now();
        let exit = loop {
            tokio::select! {
                frame = transport.read_frame() => {
                    match frame {
                        TransportEvent::Text(raw) => {
                            last_frame_at = Instant::now();
                            self.handle_frame(&agent, &raw).await;
                        }
                        TransportEvent::Closed | TransportEvent::Error => break ExitReason::TransportClosed,
                    }
                }

                received = self.broker.receive(channel, self.heartbeat_interval) => {
                    match received {
                        Received::Message(raw) => {
                            match serde_json::from_str::<ControlMessage>(&raw) {
                                Ok(ControlMessage::Supersede { new_channel }) if new_channel != channel => {
                                    transport.close(close_code::SUPERSEDED, "superseded").await;
                                    break ExitReason::Superseded;
                                }
                                Ok(ControlMessage::Supersede { .. }) => {}
                                Ok(ControlMessage::ForceDisconnect) => {
                                    transport.close(close_code::UNREGISTERED, "unregistered").await;
                                    break ExitReason::ForceDisconnected;
                                }
                                Err(err) => {
                                    tracing::debug!(%err, agent_id = agent.id, "dropping unrecognized control message");
                                }
                            }
                        }
                        Received::Timeout => {
                            let gap = HEARTBEAT_WARN_MULTIPLIER as u64 * self.heartbeat_interval.as_secs();
                            if last_frame_at.elapsed() >= Duration::from_secs(gap) {
                                tracing::warn!(agent_id = agent.id, "no frames from agent in over {gap}s");
                            }
                        }
                        Received::Closed => break ExitReason::TransportClosed,
                    }
                }
            }
        };

        self.broker.leave(&group, channel).await.ok();
        self.broker.close_channel(channel).await;

        match exit {
            ExitReason::Superseded | ExitReason::ForceDisconnected => {}
            ExitReason::TransportClosed => self.drain(agent).await,
        }
    }

    async fn handle_frame(&self, agent: &Agent, raw: &str) {
        match AgentEvent::parse(raw) {
            Ok(event) => {
                if let Err(err) = fleet_dispatch::dispatch(&self.store, &self.notifier, agent, event).await {
                    tracing::warn!(%err, agent_id = agent.id, "failed to dispatch agent event");
                }
            }
            Err(err) => {
                tracing::debug!(%err, agent_id = agent.id, "dropping invalid agent frame");
            }
        }
    }

    /// Draining entry (§4.4). Only reached when the transport closed
    /// naturally (not superseded, not force-disconnected). Flips
    /// `LastSeen`/`IsOnline` together right away, to preserve the
    /// stored `IsOnline ⇔ LastSeen == null` invariant on every commit
    /// (§8 property 1); the "debounced view" §4.8 describes is a
    /// property of *when the broadcast fires*, not of the row state —
    /// the notification itself waits for the grace deadline.
    async fn drain(&self, agent: Agent) {
        let store = self.store.clone();
        let agent_id = agent.id;
        let disconnected = tokio::task::spawn_blocking(move || store.mark_disconnected(agent_id)).await;
        let Ok(Ok((agent, was_online))) = disconnected else {
            return;
        };
        if !was_online {
            // another session already marked us offline (superseded
            // races notwithstanding); nothing new to debounce.
            return;
        }

        let grace = Duration::from_secs(agent.grace_period_secs);
        if grace.is_zero() {
            self.notifier.agent_status_changed(&agent).await;
            return;
        }

        let store = self.store.clone();
        let notifier = self.notifier.clone();
        let sleeper = self.sleeper.clone();
        tokio::spawn(async move {
            sleeper.sleep(grace).await;
            let reloaded = tokio::task::spawn_blocking(move || store.get_agent(agent_id)).await;
            let Ok(Ok(reloaded)) = reloaded else { return };
            if reloaded.last_seen.is_none() {
                return; // reconnected within the grace window.
            }
            notifier.agent_status_changed(&reloaded).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleet_broker::InMemoryBroker;
    use fleet_notify::BrokerChangeNotifier;
    use fleet_store::SqliteStore;
    use fleet_types::UserId;
    use fleet_types::collaborators::fakes::{FixedClock, SequentialCodeGen, SequentialUuidGen};
    use sleeper::fakes::ManualSleeper;
    use std::sync::Mutex as StdMutex;
    use transport::fakes::MockTransport;

    #[derive(Default)]
    struct RecordingNotifier {
        transitions: StdMutex<Vec<bool>>,
    }

    #[async_trait]
    impl fleet_notify::Notifier for RecordingNotifier {
        async fn push(&self, _user_id: UserId, _title: &str, _body: &str, _channel: &str, _icon: &str) {}
    }

    fn harness() -> (Arc<dyn Store>, AgentSession, Arc<ManualSleeper>) {
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open_in_memory(
                Arc::new(FixedClock::new(chrono::Utc::now())),
                Arc::new(SequentialCodeGen::default()),
                Arc::new(SequentialUuidGen::default()),
                5,
            )
            .unwrap(),
        );
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::default());
        let inner_broker = Arc::new(InMemoryBroker::default());
        let notifier: Arc<dyn ChangeNotifier> = Arc::new(BrokerChangeNotifier::new(
            inner_broker,
            store.clone(),
            Arc::new(RecordingNotifier::default()),
        ));
        let sleeper = Arc::new(ManualSleeper::default());
        let session = AgentSession::new(
            store.clone(),
            broker,
            notifier,
            sleeper.clone(),
            Duration::from_secs(30),
        );
        (store, session, sleeper)
    }

    #[tokio::test]
    async fn invalid_key_closes_4001_without_touching_store() {
        let (_store, session, _sleeper) = harness();
        let transport = MockTransport::new(vec![]);
        session.run("not-a-uuid", transport.clone()).await;
        assert_eq!(transport.close_code(), Some(close_code::INVALID_KEY));
    }

    #[tokio::test]
    async fn connect_marks_online_and_disconnect_schedules_grace() {
        let (store, session, sleeper) = harness();
        let reg = store.create_registration().unwrap();
        let agent = store.claim_registration(&reg.code, 7).unwrap();
        let agent = store.finalize_registration(agent.id).unwrap();

        let transport = MockTransport::new(vec![]);
        session.run(&agent.key.to_string(), transport.clone()).await;

        let reloaded = store.get_agent(agent.id).unwrap();
        assert!(!reloaded.is_online);
        assert!(reloaded.last_seen.is_some());

        // firing the grace timer with nobody having reconnected leaves
        // the agent offline; no panic, no further store writes needed.
        sleeper.fire();
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn unknown_agent_event_type_does_not_crash_the_session() {
        let (store, session, _sleeper) = harness();
        let reg = store.create_registration().unwrap();
        let agent = store.claim_registration(&reg.code, 7).unwrap();
        let agent = store.finalize_registration(agent.id).unwrap();

        let transport = MockTransport::new(vec![TransportEvent::Text(
            r#"{"type":"agent.reboot"}"#.to_string(),
        )]);
        session.run(&agent.key.to_string(), transport.clone()).await;
        // session ran to completion (transport drained) instead of panicking.
        assert_eq!(transport.close_code(), None);
    }
}
