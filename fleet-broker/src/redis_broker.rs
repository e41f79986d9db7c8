use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{Broker, BrokerError, ChannelId, Received};

const INBOX_CAPACITY: usize = 256;

struct Inbox {
    tx: mpsc::Sender<String>,
    rx: Mutex<mpsc::Receiver<String>>,
}

struct GroupSubscription {
    members: Arc<DashMap<ChannelId, mpsc::Sender<String>>>,
    task: JoinHandle<()>,
}

impl Drop for GroupSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Cluster-wide `Broker` backed by Redis pub/sub. `publish` and
/// `join` are cluster-wide: every replica with a member subscribed
/// to a group receives a copy. `send`/`receive` are local to the
/// channel's owning replica, which matches how every described flow
/// uses them — a session always calls `Receive` on the same node
/// that created the channel.
pub struct RedisBroker {
    client: redis::Client,
    publish_conn: Mutex<redis::aio::MultiplexedConnection>,
    channels: DashMap<ChannelId, Inbox>,
    groups: DashMap<String, GroupSubscription>,
}

impl RedisBroker {
    pub async fn connect(redis_url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        let publish_conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            publish_conn: Mutex::new(publish_conn),
            channels: DashMap::new(),
            groups: DashMap::new(),
        })
    }

    fn deliver_local(members: &DashMap<ChannelId, mpsc::Sender<String>>, message: &str) {
        for entry in members.iter() {
            if entry.value().try_send(message.to_string()).is_err() {
                tracing::debug!(channel = %entry.key(), "broker inbox full or closed, dropping message");
            }
        }
    }

    async fn ensure_group_subscription(&self, group: &str) -> Result<(), BrokerError> {
        if self.groups.contains_key(group) {
            return Ok(());
        }
        let members: Arc<DashMap<ChannelId, mpsc::Sender<String>>> = Arc::new(DashMap::new());
        let client = self.client.clone();
        let group_name = group.to_string();
        let task_members = members.clone();
        let task = tokio::spawn(async move {
            let mut pubsub = match client.get_async_pubsub().await {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(error = %e, "failed to open redis pubsub connection");
                    return;
                }
            };
            if let Err(e) = pubsub.subscribe(&group_name).await {
                tracing::error!(error = %e, group = %group_name, "failed to subscribe to group");
                return;
            }
            let mut stream = pubsub.on_message();
            use futures_util::StreamExt;
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "non-UTF8 broker payload, dropping");
                        continue;
                    }
                };
                Self::deliver_local(&task_members, &payload);
            }
        });
        self.groups
            .insert(group.to_string(), GroupSubscription { members, task });
        Ok(())
    }
}

#[async_trait]
impl Broker for RedisBroker {
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
        self.ensure_group_subscription(group).await?;
        if let (Some(group), Some(inbox)) = (self.groups.get(group), self.channels.get(&channel))
        {
            group.members.insert(channel, inbox.tx.clone());
        }
        Ok(())
    }

    async fn leave(&self, group: &str, channel: ChannelId) -> Result<(), BrokerError> {
        if let Some(group) = self.groups.get(group) {
            group.members.remove(&channel);
        }
        Ok(())
    }

    async fn publish(&self, group: &str, message: String) -> Result<(), BrokerError> {
        let mut conn = self.publish_conn.lock().await;
        conn.publish::<_, _, i64>(group, message)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn send(&self, channel: ChannelId, message: String) -> Result<(), BrokerError> {
        if let Some(inbox) = self.channels.get(&channel) {
            if inbox.tx.try_send(message).is_err() {
                tracing::debug!(%channel, "broker inbox full or closed, dropping message");
            }
        }
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
            group.members.remove(&channel);
        }
    }
}
