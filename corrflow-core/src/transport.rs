//! Outbound message contracts.

use crate::cancel::CancellationToken;
use crate::error::CoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Delivery semantics of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Point-to-point.
    Command,
    /// Publish-subscribe.
    Notification,
}

/// A serialized outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: MessageKind,
    pub message_type: String,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn command<C: Serialize>(command: &C) -> Result<Self, CoreError> {
        Self::encode(MessageKind::Command, command)
    }

    pub fn notification<N: Serialize>(notification: &N) -> Result<Self, CoreError> {
        Self::encode(MessageKind::Notification, notification)
    }

    fn encode<T: Serialize>(kind: MessageKind, value: &T) -> Result<Self, CoreError> {
        Ok(Self {
            kind,
            message_type: std::any::type_name::<T>().to_string(),
            payload: serde_json::to_value(value)?,
        })
    }

    /// Decodes the payload back into a typed message.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, CoreError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Point-to-point send.
///
/// Implementations are expected to stage the envelope in the current unit of
/// work rather than put it on the wire immediately.
#[async_trait]
pub trait CommandSender: Send + Sync {
    async fn send(&self, command: Envelope, cancel: &CancellationToken) -> Result<(), CoreError>;
}

/// Publish-subscribe send.
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(
        &self,
        notification: Envelope,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct ReserveStock {
        order_id: String,
        quantity: u32,
    }

    #[test]
    fn test_command_envelope() {
        let command = ReserveStock {
            order_id: "o-1".to_string(),
            quantity: 3,
        };
        let envelope = Envelope::command(&command).unwrap();

        assert_eq!(envelope.kind, MessageKind::Command);
        assert!(envelope.message_type.ends_with("ReserveStock"));
        assert_eq!(envelope.payload["quantity"], 3);
        assert_eq!(envelope.decode::<ReserveStock>().unwrap(), command);
    }
}
