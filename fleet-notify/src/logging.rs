use async_trait::async_trait;
use fleet_types::UserId;

use crate::Notifier;

/// Stands in for the out-of-scope push-delivery sink: logs what
/// would have been sent instead of delivering it.
#[derive(Debug, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn push(&self, user_id: UserId, title: &str, body: &str, channel: &str, icon: &str) {
        tracing::info!(user_id, title, body, channel, icon, "push notification");
    }
}
