use async_trait::async_trait;
use tracing::info;

use crate::model::OutboxMessage;

#[derive(Debug)]
pub struct DeliveryError(pub String);

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "delivery failed: {}", self.0)
    }
}

impl std::error::Error for DeliveryError {}

/// Outbound notification channel (e.g. mail). Deliveries are at-least-once;
/// implementations should key on the message id so a redelivered message
/// does not produce a second user-visible effect.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn send(&self, msg: &OutboxMessage) -> Result<(), DeliveryError>;
}

/// Logs notifications instead of sending them. Stands in for the real mail
/// transport in development.
pub struct LogDelivery;

#[async_trait]
impl Delivery for LogDelivery {
    async fn send(&self, msg: &OutboxMessage) -> Result<(), DeliveryError> {
        info!(id = %msg.id, kind = %msg.kind, "delivering notification");
        Ok(())
    }
}
