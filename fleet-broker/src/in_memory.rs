use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::{Broker, BrokerError, ChannelId, Received};

const INBOX_CAPACITY: usize = 256;

struct Inbox {
    tx: mpsc::Sender<String>,
    rx: Mutex<mpsc::Receiver<String>>,
}

/// Single-node `Broker`, valid for test runs and single-replica
/// deployments. One `tokio::mpsc` inbox per channel; groups are
/// plain membership sets.
#[derive(Default)]
pub struct InMemoryBroker {
    channels: DashMap<ChannelId, Inbox>,
    groups: DashMap<String, DashSet<ChannelId>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_deliver(&self, channel: ChannelId, message: &str) {
        if let Some(inbox) = self.channels.get(&channel) {
            if inbox.tx.try_send(message.to_string()).is_err() {
                tracing::debug!(%channel, "broker inbox full or closed, dropping message");
            }
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn new_channel(&self) -> ChannelId {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.channels.insert(
            id,
            Inbox {
                tx,
                rx: Mutex::new(rx),
            },
        );
        id
    }

    async fn join(&self, group: &str, channel: ChannelId) -> Result<(), BrokerError> {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(channel);
        Ok(())
    }

    async fn leave(&self, group: &str, channel: ChannelId) -> Result<(), BrokerError> {
        if let Some(members) = self.groups.get(group) {
            members.remove(&channel);
        }
        Ok(())
    }

    async fn publish(&self, group: &str, message: String) -> Result<(), BrokerError> {
        if let Some(members) = self.groups.get(group) {
            for channel in members.iter() {
                self.try_deliver(*channel, &message);
            }
        }
        Ok(())
    }

    async fn send(&self, channel: ChannelId, message: String) -> Result<(), BrokerError> {
        self.try_deliver(channel, &message);
        Ok(())
    }

    async fn receive(&self, channel: ChannelId, deadline: Duration) -> Received {
        let Some(inbox) = self.channels.get(&channel) else {
            return Received::Closed;
        };
        let mut rx = inbox.rx.lock().await;
        match tokio::time::timeout(deadline, rx.recv()).await {
            Ok(Some(msg)) => Received::Message(msg),
            Ok(None) => Received::Closed,
            Err(_) => Received::Timeout,
        }
    }

    async fn close_channel(&self, channel: ChannelId) {
        self.channels.remove(&channel);
        for group in self.groups.iter() {
            group.remove(&channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_fans_out_to_group_members() {
        let broker = InMemoryBroker::new();
        let a = broker.new_channel();
        let b = broker.new_channel();
        broker.join("user_7_clients", a).await.unwrap();
        broker.join("user_7_clients", b).await.unwrap();

        broker
            .publish("user_7_clients", "hello".into())
            .await
            .unwrap();

        assert_eq!(
            broker.receive(a, Duration::from_millis(50)).await,
            Received::Message("hello".into())
        );
        assert_eq!(
            broker.receive(b, Duration::from_millis(50)).await,
            Received::Message("hello".into())
        );
    }

    #[tokio::test]
    async fn receive_times_out_when_idle() {
        let broker = InMemoryBroker::new();
        let ch = broker.new_channel();
        assert_eq!(
            broker.receive(ch, Duration::from_millis(10)).await,
            Received::Timeout
        );
    }

    #[tokio::test]
    async fn leave_stops_delivery() {
        let broker = InMemoryBroker::new();
        let ch = broker.new_channel();
        broker.join("g", ch).await.unwrap();
        broker.leave("g", ch).await.unwrap();
        broker.publish("g", "x".into()).await.unwrap();
        assert_eq!(
            broker.receive(ch, Duration::from_millis(10)).await,
            Received::Timeout
        );
    }

    #[tokio::test]
    async fn full_inbox_drops_for_that_subscriber_only() {
        let broker = InMemoryBroker::new();
        let slow = broker.new_channel();
        broker.join("g", slow).await.unwrap();
        for i in 0..(INBOX_CAPACITY + 10) {
            broker.publish("g", format!("msg-{i}")).await.unwrap();
        }
        // the channel keeps working afterwards; no panic, no block.
        broker.send(slow, "still alive".into()).await.unwrap();
    }
}
