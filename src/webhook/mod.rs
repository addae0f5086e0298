//! Inbound webhook events: decoding and dispatch.

mod ingestor;
mod payload;

pub use ingestor::{IngestSettings, WebhookIngestor, WebhookOutcome};
pub use payload::{decode_envelope, decode_plain, PayloadError, Recipient, Sender, WebhookMessage};
