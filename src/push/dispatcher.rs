use super::{PushError, PushMessage, PushTransport, SendResult};
use crate::server::metrics;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Aggregate of a multicast send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MulticastOutcome {
    pub success_count: u32,
    pub failure_count: u32,
    /// Every token whose send failed, invalid or not.
    pub failed_tokens: Vec<String>,
}

/// Sends push messages through a [`PushTransport`] and folds per-token
/// results into counts.
pub struct PushDispatcher {
    transport: Arc<dyn PushTransport>,
}

impl PushDispatcher {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self { transport }
    }

    /// Sends `message` to every token. An empty token list never reaches the
    /// transport. Transport-level failures are returned as errors.
    pub async fn send_to_many(
        &self,
        tokens: &[String],
        message: &PushMessage,
    ) -> Result<MulticastOutcome, PushError> {
        if tokens.is_empty() {
            return Ok(MulticastOutcome::default());
        }

        let results = match self.transport.send_many(tokens, message).await {
            Ok(results) => results,
            Err(err) => {
                error!("Multicast push to {} tokens failed: {}", tokens.len(), err);
                metrics::record_push_send("error", tokens.len());
                return Err(err);
            }
        };

        let outcome = fold_results(tokens, results);
        metrics::record_push_send("success", outcome.success_count as usize);
        metrics::record_push_send("failure", outcome.failure_count as usize);
        info!(
            "Multicast push: {} sent, {} failed",
            outcome.success_count, outcome.failure_count
        );
        Ok(outcome)
    }

    /// Sends to a single token. `PushError::InvalidToken` tells the caller to
    /// forget the token.
    pub async fn send_to_one(&self, token: &str, message: &PushMessage) -> SendResult {
        match self.transport.send_one(token, message).await {
            Ok(message_id) => {
                metrics::record_push_send("success", 1);
                debug!("Push sent: {}", message_id);
                Ok(message_id)
            }
            Err(err) => {
                let outcome = if err.is_invalid_token() {
                    "invalid_token"
                } else {
                    "failure"
                };
                metrics::record_push_send(outcome, 1);
                warn!("Push to single token failed: {}", err);
                Err(err)
            }
        }
    }
}

fn fold_results(tokens: &[String], results: Vec<SendResult>) -> MulticastOutcome {
    let mut outcome = MulticastOutcome::default();
    for (index, token) in tokens.iter().enumerate() {
        match results.get(index) {
            Some(Ok(_)) => outcome.success_count += 1,
            // A missing result counts as a failure for that token.
            Some(Err(_)) | None => {
                outcome.failure_count += 1;
                outcome.failed_tokens.push(token.clone());
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedTransport {
        failures: HashMap<String, PushError>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn failing(failures: &[(&str, PushError)]) -> Self {
            Self {
                failures: failures
                    .iter()
                    .map(|(t, e)| (t.to_string(), e.clone()))
                    .collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PushTransport for ScriptedTransport {
        async fn send_one(&self, token: &str, _message: &PushMessage) -> SendResult {
            self.calls.lock().unwrap().push(token.to_string());
            match self.failures.get(token) {
                Some(err) => Err(err.clone()),
                None => Ok(format!("msg-{}", token)),
            }
        }
    }

    fn message() -> PushMessage {
        PushMessage {
            title: "Hi".to_string(),
            body: "There".to_string(),
            image_url: None,
            webpush_image: None,
            data: BTreeMap::new(),
        }
    }

    fn tokens(values: &[&str]) -> Vec<String> {
        values.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn empty_token_list_skips_transport() {
        let transport = Arc::new(ScriptedTransport::default());
        let dispatcher = PushDispatcher::new(transport.clone());

        let outcome = dispatcher.send_to_many(&[], &message()).await.unwrap();

        assert_eq!(outcome, MulticastOutcome::default());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn partial_failures_are_counted_and_listed() {
        let transport = Arc::new(ScriptedTransport::failing(&[
            ("b", PushError::InvalidToken("gone".to_string())),
            ("c", PushError::Rejected("bad".to_string())),
        ]));
        let dispatcher = PushDispatcher::new(transport.clone());

        let outcome = dispatcher
            .send_to_many(&tokens(&["a", "b", "c"]), &message())
            .await
            .unwrap();

        assert_eq!(outcome.success_count, 1);
        assert_eq!(outcome.failure_count, 2);
        assert_eq!(outcome.failed_tokens, tokens(&["b", "c"]));
        assert_eq!(transport.calls(), tokens(&["a", "b", "c"]));
    }

    #[tokio::test]
    async fn unauthorized_transport_propagates() {
        let transport = Arc::new(ScriptedTransport::failing(&[(
            "a",
            PushError::Unauthorized("expired".to_string()),
        )]));
        let dispatcher = PushDispatcher::new(transport);

        let err = dispatcher
            .send_to_many(&tokens(&["a", "b"]), &message())
            .await
            .unwrap_err();

        assert_eq!(err, PushError::Unauthorized("expired".to_string()));
    }

    #[tokio::test]
    async fn all_transport_failures_propagate() {
        let transport = Arc::new(ScriptedTransport::failing(&[
            ("a", PushError::Transport("down".to_string())),
            ("b", PushError::Transport("down".to_string())),
        ]));
        let dispatcher = PushDispatcher::new(transport);

        let result = dispatcher.send_to_many(&tokens(&["a", "b"]), &message()).await;

        assert!(matches!(result, Err(PushError::Transport(_))));
    }

    #[tokio::test]
    async fn send_many_keeps_token_order_past_concurrency_limit() {
        let many: Vec<String> = (0..40).map(|i| format!("t{}", i)).collect();
        let transport = ScriptedTransport::failing(&[(
            "t17",
            PushError::InvalidToken("gone".to_string()),
        )]);

        let results = transport.send_many(&many, &message()).await.unwrap();

        assert_eq!(results.len(), 40);
        assert_eq!(results[0], Ok("msg-t0".to_string()));
        assert_eq!(results[39], Ok("msg-t39".to_string()));
        assert!(results[17].as_ref().unwrap_err().is_invalid_token());
    }

    #[tokio::test]
    async fn send_many_reports_first_transport_error() {
        let transport = ScriptedTransport::failing(&[
            ("a", PushError::Transport("first".to_string())),
            ("b", PushError::Transport("second".to_string())),
        ]);

        let err = transport
            .send_many(&tokens(&["a", "b"]), &message())
            .await
            .unwrap_err();

        assert_eq!(err, PushError::Transport("first".to_string()));
    }

    #[tokio::test]
    async fn send_to_one_distinguishes_invalid_tokens() {
        let transport = Arc::new(ScriptedTransport::failing(&[
            ("dead", PushError::InvalidToken("unregistered".to_string())),
            ("flaky", PushError::Transport("timeout".to_string())),
        ]));
        let dispatcher = PushDispatcher::new(transport);

        assert_eq!(
            dispatcher.send_to_one("ok", &message()).await.unwrap(),
            "msg-ok"
        );
        assert!(dispatcher
            .send_to_one("dead", &message())
            .await
            .unwrap_err()
            .is_invalid_token());
        assert!(!dispatcher
            .send_to_one("flaky", &message())
            .await
            .unwrap_err()
            .is_invalid_token());
    }

    #[test]
    fn short_result_lists_count_missing_tokens_as_failed() {
        let outcome = fold_results(&tokens(&["a", "b"]), vec![Ok("m".to_string())]);
        assert_eq!(outcome.success_count, 1);
        assert_eq!(outcome.failed_tokens, tokens(&["b"]));
    }
}
