use async_trait::async_trait;
use aws_sdk_sqs::Client;
use tracing::debug;

use crate::{NotificationQueue, QueueError, Result};
use ql_common::NotificationMessage;

/// AWS SQS-backed notification queue.
pub struct SqsNotificationQueue {
    client: Client,
    queue_url: String,
    queue_name: String,
    wait_time_seconds: i32,
}

impl SqsNotificationQueue {
    /// Default long poll wait time in seconds. 5 seconds balances efficiency
    /// with shutdown responsiveness. AWS SQS max is 20 seconds.
    pub const DEFAULT_WAIT_TIME_SECONDS: i32 = 5;

    pub fn new(client: Client, queue_url: String, queue_name: String) -> Self {
        Self {
            client,
            queue_url,
            queue_name,
            wait_time_seconds: Self::DEFAULT_WAIT_TIME_SECONDS,
        }
    }

    pub fn from_queue_url(client: Client, queue_url: String) -> Self {
        let queue_name = queue_url
            .split('/')
            .last()
            .unwrap_or("unknown")
            .to_string();
        Self::new(client, queue_url, queue_name)
    }

    pub fn with_wait_time_seconds(mut self, seconds: i32) -> Self {
        self.wait_time_seconds = seconds.clamp(0, 20);
        self
    }
}

#[async_trait]
impl NotificationQueue for SqsNotificationQueue {
    fn identifier(&self) -> &str {
        &self.queue_name
    }

    async fn receive(&self, max_messages: u32) -> Result<Vec<NotificationMessage>> {
        let result = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages.min(10) as i32)
            .wait_time_seconds(self.wait_time_seconds)
            .send()
            .await
            .map_err(|e| QueueError::Sqs(e.to_string()))?;

        let sqs_messages = result.messages.unwrap_or_default();
        let mut messages = Vec::with_capacity(sqs_messages.len());
        for msg in sqs_messages {
            let body = msg.body().ok_or(QueueError::EmptyBody)?.to_string();
            let receipt_token = msg
                .receipt_handle()
                .ok_or(QueueError::MissingReceiptHandle)?
                .to_string();
            let message_id = msg.message_id().unwrap_or_default().to_string();
            let mut notification = NotificationMessage::new(message_id, receipt_token, body);
            if let Some(checksum) = msg.md5_of_body() {
                notification = notification.with_body_checksum(checksum);
            }
            messages.push(notification);
        }

        if !messages.is_empty() {
            debug!(
                queue = %self.queue_name,
                count = messages.len(),
                "polled notifications from SQS"
            );
        }
        Ok(messages)
    }

    async fn delete(&self, receipt_token: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_token)
            .send()
            .await
            .map_err(|e| QueueError::Sqs(e.to_string()))?;
        Ok(())
    }
}
