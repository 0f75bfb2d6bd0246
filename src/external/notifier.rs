use crate::error::AppResult;
use crate::external::TelegramClient;
use crate::models::UserId;
use async_trait::async_trait;

/// Outbound direct messages (broadcast fan-out).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: UserId, text: &str) -> AppResult<()>;
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn notify(&self, user_id: UserId, text: &str) -> AppResult<()> {
        self.send_message(user_id, text).await
    }
}

/// Used when no bot token is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: UserId, text: &str) -> AppResult<()> {
        log::info!("Notification to {user_id}: {text}");
        Ok(())
    }
}
