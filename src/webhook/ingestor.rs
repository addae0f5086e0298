//! Webhook-driven dispatch: push first, then live SSE streams, with the
//! ledger recording the outcome.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::payload::{decode_envelope, decode_plain, PayloadError, Recipient, Sender, WebhookMessage};
use crate::notifications::{
    NotificationContent, NotificationLedger, NotificationStatus, TransitionResult,
};
use crate::push::{PushDispatcher, PushMessage};
use crate::server::metrics;
use crate::server::sse::{ConnectionHandle, ConnectionRegistry, SseFrame};
use crate::token_store::FullTokenStore;

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub sse_enabled: bool,
    /// System id recorded for events that carry none.
    pub default_system_id: String,
    /// Skip events whose notification already reached a device.
    pub dedupe: bool,
}

/// What happened to one webhook event. Every variant is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed { sse_writes: usize, push_sent: u32 },
    Duplicate,
    InvalidFormat(String),
    Error(String),
}

impl WebhookOutcome {
    /// Body returned to the webhook caller.
    pub fn ack(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed { .. } | WebhookOutcome::Duplicate => "OK",
            WebhookOutcome::InvalidFormat(_) | WebhookOutcome::Error(_) => "ERROR",
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed { .. } => "processed",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::InvalidFormat(_) => "invalid_format",
            WebhookOutcome::Error(_) => "error",
        }
    }
}

/// `event: notification` payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationEvent<'a> {
    message_id: &'a str,
    notification: &'a NotificationContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    sender: Option<&'a Sender>,
    recipient: &'a Recipient,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<NotificationStatus>,
    timestamp: DateTime<Utc>,
}

pub struct WebhookIngestor {
    registry: Arc<ConnectionRegistry>,
    ledger: Arc<dyn NotificationLedger>,
    token_store: Arc<dyn FullTokenStore>,
    dispatcher: Option<Arc<PushDispatcher>>,
    settings: IngestSettings,
}

impl WebhookIngestor {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        ledger: Arc<dyn NotificationLedger>,
        token_store: Arc<dyn FullTokenStore>,
        dispatcher: Option<Arc<PushDispatcher>>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            registry,
            ledger,
            token_store,
            dispatcher,
            settings,
        }
    }

    /// Handles a Pub/Sub envelope body.
    pub async fn ingest_envelope(&self, body: &[u8]) -> WebhookOutcome {
        self.ingest_decoded(decode_envelope(body)).await
    }

    /// Handles a flat JSON body.
    pub async fn ingest_plain(&self, body: &[u8]) -> WebhookOutcome {
        self.ingest_decoded(decode_plain(body)).await
    }

    async fn ingest_decoded(&self, decoded: Result<WebhookMessage, PayloadError>) -> WebhookOutcome {
        let outcome = match decoded {
            Ok(message) => self.ingest(message).await,
            Err(err) => {
                warn!("Rejected webhook payload: {}", err);
                WebhookOutcome::InvalidFormat(err.to_string())
            }
        };
        metrics::record_webhook_ack(outcome.metric_label());
        outcome
    }

    /// Dispatches one decoded event. Never fails: internal errors are logged
    /// and reported as [`WebhookOutcome::Error`].
    pub async fn ingest(&self, message: WebhookMessage) -> WebhookOutcome {
        let message_id = message.message_id.clone();
        match self.dispatch(message).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("Webhook {} failed: {:#}", message_id, err);
                WebhookOutcome::Error(err.to_string())
            }
        }
    }

    async fn dispatch(&self, message: WebhookMessage) -> Result<WebhookOutcome> {
        let notification_id = message.message_id.as_str();
        let system_id = message
            .system_id
            .clone()
            .unwrap_or_else(|| self.settings.default_system_id.clone());

        match self.ledger.get(notification_id)? {
            Some(existing) if self.settings.dedupe && existing.status.is_delivered() => {
                info!(
                    "Webhook {} already {}, skipping redelivery",
                    notification_id, existing.status
                );
                return Ok(WebhookOutcome::Duplicate);
            }
            Some(existing)
                if !self
                    .ledger
                    .allows_transition(existing.status, NotificationStatus::Sent)
                    && !self
                        .ledger
                        .allows_transition(existing.status, NotificationStatus::Delivered) =>
            {
                info!(
                    "Webhook {} is final as {}, skipping redelivery",
                    notification_id, existing.status
                );
                return Ok(WebhookOutcome::Duplicate);
            }
            Some(existing) => {
                debug!(
                    "Webhook {} redelivered while {}, dispatching again",
                    notification_id, existing.status
                );
            }
            None => {
                let created = self.ledger.create_with_id(
                    notification_id,
                    &message.recipient.ledger_user_id(),
                    &system_id,
                    &message.notification,
                )?;
                if created.is_none() {
                    info!(
                        "Webhook {} is already being handled by a concurrent delivery",
                        notification_id
                    );
                    return Ok(WebhookOutcome::Duplicate);
                }
            }
        }

        let mut delivered = false;
        let mut push_attempted = false;
        let mut push_sent = 0;
        let mut push_error = None;

        if let Some(dispatcher) = &self.dispatcher {
            let tokens = self.resolve_tokens(&message)?;
            if tokens.is_empty() {
                debug!("No push tokens for {}", message.recipient);
            } else {
                push_attempted = true;
                let push = PushMessage::for_notification(notification_id, &message.notification);
                match dispatcher.send_to_many(&tokens, &push).await {
                    Ok(outcome) => {
                        self.ledger.update_counts(
                            notification_id,
                            tokens.len() as u32,
                            outcome.success_count,
                            outcome.failure_count,
                        )?;
                        if outcome.success_count > 0 {
                            self.record_status(notification_id, NotificationStatus::Sent)?;
                            delivered = true;
                        }
                        push_sent = outcome.success_count;
                        if !outcome.failed_tokens.is_empty() {
                            let removed =
                                self.token_store.remove_invalid_tokens(&outcome.failed_tokens)?;
                            metrics::record_tokens_pruned("push_failure", removed);
                            info!("Pruned {} failed push tokens", removed);
                        }
                    }
                    Err(err) => {
                        error!("Push for webhook {} failed: {}", notification_id, err);
                        self.ledger.update_counts(
                            notification_id,
                            tokens.len() as u32,
                            0,
                            tokens.len() as u32,
                        )?;
                        push_error = Some(err);
                    }
                }
            }
        }

        let mut sse_writes = 0;
        if self.settings.sse_enabled {
            let targets = self.resolve_connections(&message.recipient).await;
            if targets.is_empty() {
                info!("No live connections for {}", message.recipient);
            } else {
                let status = self.ledger.get(notification_id)?.map(|n| n.status);
                let frame = SseFrame::event(
                    "notification",
                    &NotificationEvent {
                        message_id: notification_id,
                        notification: &message.notification,
                        sender: message.sender.as_ref(),
                        recipient: &message.recipient,
                        status,
                        timestamp: Utc::now(),
                    },
                )?;
                sse_writes = write_to_all(&targets, &frame);
                info!(
                    "Webhook {} written to {}/{} connections",
                    notification_id,
                    sse_writes,
                    targets.len()
                );
                if sse_writes > 0 {
                    self.record_status(notification_id, NotificationStatus::Delivered)?;
                    delivered = true;
                }
            }
        }

        if push_attempted && !delivered {
            self.record_status(notification_id, NotificationStatus::Failed)?;
        }

        if let Some(err) = push_error {
            return Ok(WebhookOutcome::Error(err.to_string()));
        }
        Ok(WebhookOutcome::Processed {
            sse_writes,
            push_sent,
        })
    }

    /// Moves the record to `status`. A move the policy refuses is logged and
    /// reported as `false`; a record that disappeared is an error.
    fn record_status(&self, notification_id: &str, status: NotificationStatus) -> Result<bool> {
        match self.ledger.transition_status(notification_id, status, None)? {
            TransitionResult::Transitioned { .. } => Ok(true),
            TransitionResult::Rejected { current_status } => {
                warn!(
                    "Webhook {} stays {}, cannot record {}",
                    notification_id, current_status, status
                );
                Ok(false)
            }
            TransitionResult::NotFound => {
                bail!("Notification {} disappeared during dispatch", notification_id)
            }
        }
    }

    fn resolve_tokens(&self, message: &WebhookMessage) -> Result<Vec<String>> {
        match &message.recipient {
            Recipient::Individual { id } => match &message.system_id {
                Some(system_id) => self.token_store.get_user_tokens(id, system_id),
                None => self.token_store.get_tokens_for_users(std::slice::from_ref(id)),
            },
            Recipient::Group { id } => self.token_store.get_group_tokens(id),
            Recipient::Broadcast { .. } => self.token_store.get_all_tokens(),
        }
    }

    async fn resolve_connections(&self, recipient: &Recipient) -> Vec<ConnectionHandle> {
        match recipient {
            Recipient::Individual { id } => self
                .registry
                .get_user_connection(id)
                .await
                .into_iter()
                .collect(),
            Recipient::Group { id } => self.registry.get_group_connections(id).await,
            Recipient::Broadcast { .. } => self.registry.all_connections().await,
        }
    }
}

/// Writes `frame` to every target. One failing connection never stops the others.
fn write_to_all(targets: &[ConnectionHandle], frame: &SseFrame) -> usize {
    let mut written = 0;
    for handle in targets {
        match handle.write(frame.clone()) {
            Ok(()) => written += 1,
            Err(err) => {
                debug!("Write to connection {} failed: {:?}", handle.id(), err);
            }
        }
    }
    metrics::record_sse_frames(written, targets.len() - written);
    written
}
