pub mod in_memory;
pub mod redis_broker;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

pub type ChannelId = Uuid;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Message(String),
    Timeout,
    Closed,
}

/// Cluster-wide publish/subscribe bus. `Channel` identifies a single
/// subscriber endpoint; `Group` is a fan-out address. See the
/// component design for delivery semantics: at-most-once, per-
/// subscriber FIFO, non-blocking best-effort `publish`.
#[async_trait]
pub trait Broker: Send + Sync {
    fn new_channel(&self) -> ChannelId;

    async fn join(&self, group: &str, channel: ChannelId) -> Result<(), BrokerError>;

    async fn leave(&self, group: &str, channel: ChannelId) -> Result<(), BrokerError>;

    /// Best-effort fan-out: a subscriber whose inbox is full drops
    /// the message. Never blocks on a slow subscriber.
    async fn publish(&self, group: &str, message: String) -> Result<(), BrokerError>;

    /// Direct delivery to one channel, same best-effort semantics.
    async fn send(&self, channel: ChannelId, message: String) -> Result<(), BrokerError>;

    async fn receive(&self, channel: ChannelId, deadline: Duration) -> Received;

    /// Releases the channel's inbox. Idempotent.
    async fn close_channel(&self, channel: ChannelId);
}

pub use in_memory::InMemoryBroker;
pub use redis_broker::RedisBroker;
