//! Inbound webhook wire shapes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::notifications::NotificationContent;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message.data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

/// Who a notification is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Recipient {
    #[serde(alias = "user")]
    Individual { id: String },
    Group { id: String },
    Broadcast {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl Recipient {
    /// Owner recorded in the ledger for notifications sent to this recipient.
    pub fn ledger_user_id(&self) -> String {
        match self {
            Recipient::Individual { id } => id.clone(),
            Recipient::Group { id } => format!("group:{}", id),
            Recipient::Broadcast { .. } => "broadcast".to_string(),
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Individual { id } => write!(f, "user {}", id),
            Recipient::Group { id } => write!(f, "group {}", id),
            Recipient::Broadcast { .. } => f.write_str("broadcast"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The logical webhook event, shared by both wire shapes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMessage {
    pub message_id: String,
    pub recipient: Recipient,
    #[serde(default)]
    pub notification: NotificationContent,
    #[serde(default)]
    pub sender: Option<Sender>,
    #[serde(default)]
    pub system_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PubSubEnvelope {
    message: PubSubMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PubSubMessage {
    data: String,
    #[serde(default)]
    message_id: Option<String>,
}

/// Decodes a Pub/Sub push envelope whose `message.data` is base64 JSON.
///
/// When the inner event has no `messageId`, the Pub/Sub message id is used.
pub fn decode_envelope(body: &[u8]) -> Result<WebhookMessage, PayloadError> {
    let envelope: PubSubEnvelope = serde_json::from_slice(body)?;
    let decoded = STANDARD.decode(envelope.message.data.trim())?;
    let mut inner: serde_json::Value = serde_json::from_slice(&decoded)?;

    if let (Some(object), Some(pubsub_id)) =
        (inner.as_object_mut(), envelope.message.message_id)
    {
        object
            .entry("messageId")
            .or_insert(serde_json::Value::String(pubsub_id));
    }
    from_value(inner)
}

/// Decodes a flat JSON event.
pub fn decode_plain(body: &[u8]) -> Result<WebhookMessage, PayloadError> {
    from_value(serde_json::from_slice(body)?)
}

fn from_value(value: serde_json::Value) -> Result<WebhookMessage, PayloadError> {
    let object = value
        .as_object()
        .ok_or(PayloadError::MissingField("messageId"))?;
    if !object.contains_key("messageId") {
        return Err(PayloadError::MissingField("messageId"));
    }
    if !object.contains_key("recipient") {
        return Err(PayloadError::MissingField("recipient"));
    }

    let message: WebhookMessage = serde_json::from_value(value)?;
    if message.message_id.trim().is_empty() {
        return Err(PayloadError::MissingField("messageId"));
    }
    Ok(message)
}
