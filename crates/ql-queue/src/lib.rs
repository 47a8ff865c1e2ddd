use async_trait::async_trait;
use ql_common::NotificationMessage;

pub mod error;
pub mod sqs;

pub use error::QueueError;
pub use sqs::SqsNotificationQueue;

pub type Result<T> = std::result::Result<T, QueueError>;

/// Source of S3 event notifications (one message per notification, each
/// possibly announcing several objects).
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    fn identifier(&self) -> &str;

    /// Long-polls for up to `max_messages` notifications.
    async fn receive(&self, max_messages: u32) -> Result<Vec<NotificationMessage>>;

    /// Removes a notification from the queue once fully processed.
    async fn delete(&self, receipt_token: &str) -> Result<()>;
}
