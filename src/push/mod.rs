//! Push delivery through an external transport.

mod dispatcher;
mod fcm;
mod message;

pub use dispatcher::{MulticastOutcome, PushDispatcher};
pub use fcm::{FcmSettings, FcmTransport, DEFAULT_FCM_ENDPOINT};
pub use message::{coerce_data, PushMessage};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use thiserror::Error;

/// Maximum in-flight requests when a transport fans out one request per token.
const MAX_CONCURRENT_SENDS: usize = 16;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PushError {
    /// The token is unknown to the push service and should be forgotten.
    #[error("Invalid or unregistered token: {0}")]
    InvalidToken(String),

    #[error("Push rejected: {0}")]
    Rejected(String),

    #[error("Push service refused our credentials: {0}")]
    Unauthorized(String),

    #[error("Push transport failure: {0}")]
    Transport(String),
}

impl PushError {
    pub fn is_invalid_token(&self) -> bool {
        matches!(self, PushError::InvalidToken(_))
    }

    /// Errors that say nothing about a single token but about the transport itself.
    fn is_transport_level(&self) -> bool {
        matches!(self, PushError::Unauthorized(_) | PushError::Transport(_))
    }
}

/// Result of one per-token send: the message id assigned by the service.
pub type SendResult = Result<String, PushError>;

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send_one(&self, token: &str, message: &PushMessage) -> SendResult;

    /// Per-token results, in the order of `tokens`.
    ///
    /// The outer error means no delivery could be attempted at all: the
    /// service refused our credentials, or every send failed at transport level.
    async fn send_many(
        &self,
        tokens: &[String],
        message: &PushMessage,
    ) -> Result<Vec<SendResult>, PushError> {
        let sends: Vec<_> = tokens.iter().map(|token| self.send_one(token, message)).collect();
        let results: Vec<SendResult> = stream::iter(sends)
            .buffered(MAX_CONCURRENT_SENDS)
            .collect()
            .await;

        if let Some(Err(err)) = results
            .iter()
            .find(|r| matches!(r, Err(PushError::Unauthorized(_))))
        {
            return Err(err.clone());
        }
        if !results.is_empty()
            && results
                .iter()
                .all(|r| matches!(r, Err(e) if e.is_transport_level()))
        {
            if let Some(Err(err)) = results.first() {
                return Err(err.clone());
            }
        }
        Ok(results)
    }
}
