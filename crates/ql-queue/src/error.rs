use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("message is missing a body")]
    EmptyBody,

    #[error("message is missing a receipt handle")]
    MissingReceiptHandle,

    #[error("AWS SQS error: {0}")]
    Sqs(String),

    #[error("queue is stopped")]
    Stopped,
}
