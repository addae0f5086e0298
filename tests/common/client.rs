//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per broadcaster endpoint, plus a minimal
//! reader for SSE streams.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use axum::body::Bytes;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::{Stream, StreamExt};
use reqwest::Response;
use serde_json::{json, Value};
use std::pin::Pin;
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    // ========================================================================
    // Client operations
    // ========================================================================

    /// POSTs `body` to `/api/v1/subscription/{operation}` and returns the envelope.
    pub async fn call(&self, operation: &str, body: Value) -> Value {
        let response = self
            .client
            .post(format!("{}/api/v1/subscription/{}", self.base_url, operation))
            .json(&body)
            .send()
            .await
            .expect("Request failed");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        response.json().await.expect("Envelope is not JSON")
    }

    pub async fn register_token(&self, user_id: &str, system_id: &str, token: &str) -> Value {
        self.call(
            "register-token",
            json!({"userId": user_id, "systemId": system_id, "token": token}),
        )
        .await
    }

    pub async fn send_notification(&self, user_id: &str, system_id: &str, title: &str) -> Value {
        self.call(
            "send-notification",
            json!({
                "userId": user_id,
                "systemId": system_id,
                "notification": {"title": title, "body": "body", "data": {"count": 3}}
            }),
        )
        .await
    }

    pub async fn update_status(&self, notification_id: &str, status: &str) -> Value {
        self.call(
            "update-notification-status",
            json!({"notificationId": notification_id, "status": status}),
        )
        .await
    }

    pub async fn history(&self, notification_id: &str) -> Value {
        self.call(
            "get-notification-history",
            json!({"notificationId": notification_id}),
        )
        .await
    }

    // ========================================================================
    // Webhooks
    // ========================================================================

    /// Sends `message` wrapped in a Pub/Sub envelope and returns the ack text.
    pub async fn post_envelope(&self, message: &Value) -> String {
        let data = STANDARD.encode(message.to_string());
        let body = json!({"message": {"data": data, "messageId": "pubsub-1"}});
        self.post_webhook("subscription-handler", body.to_string())
            .await
    }

    pub async fn post_plain(&self, message: &Value) -> String {
        self.post_webhook("subscription-handler-plain", message.to_string())
            .await
    }

    pub async fn post_webhook(&self, route: &str, body: String) -> String {
        let response = self
            .client
            .post(format!("{}/api/v1/subscription/{}", self.base_url, route))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .expect("Webhook request failed");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        response.text().await.expect("Ack is not text")
    }

    // ========================================================================
    // Streams and health
    // ========================================================================

    pub async fn open_stream_raw(&self, path: &str) -> Response {
        // Streams stay open, so no overall request timeout here.
        reqwest::Client::new()
            .get(format!("{}/api/v1/stream/{}", self.base_url, path))
            .send()
            .await
            .expect("Stream request failed")
    }

    /// Opens a stream and consumes its `connected` event.
    pub async fn open_stream(&self, path: &str) -> SseReader {
        let response = self.open_stream_raw(path).await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let mut reader = SseReader::new(response);
        let (name, _) = reader.next_event().await.expect("No connected event");
        assert_eq!(name, "connected");
        reader
    }

    pub async fn health(&self) -> Value {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .expect("Health request failed")
            .json()
            .await
            .expect("Health is not JSON")
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Reads `event:`/`data:` blocks from an SSE response, skipping comments.
pub struct SseReader {
    stream: ByteStream,
    buffer: String,
}

impl SseReader {
    pub fn new(response: Response) -> Self {
        Self {
            stream: Box::pin(response.bytes_stream()),
            buffer: String::new(),
        }
    }

    /// Next named event as `(name, data)`. `None` when the stream ends or
    /// nothing arrives within [`SSE_EVENT_TIMEOUT_MS`].
    pub async fn next_event(&mut self) -> Option<(String, String)> {
        loop {
            while let Some(end) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..end + 2).collect();
                let mut name = None;
                let mut data = Vec::new();
                for line in block.lines() {
                    if let Some(value) = line.strip_prefix("event:") {
                        name = Some(value.trim().to_string());
                    } else if let Some(value) = line.strip_prefix("data:") {
                        data.push(value.trim_start().to_string());
                    }
                }
                if let Some(name) = name {
                    return Some((name, data.join("\n")));
                }
            }

            let chunk = tokio::time::timeout(
                Duration::from_millis(SSE_EVENT_TIMEOUT_MS),
                self.stream.next(),
            )
            .await
            .ok()??
            .ok()?;
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    /// Next event, parsed as JSON. Panics when none arrives.
    pub async fn expect_event(&mut self, expected_name: &str) -> Value {
        let (name, data) = self.next_event().await.expect("Expected an SSE event");
        assert_eq!(name, expected_name);
        serde_json::from_str(&data).expect("Event data is not JSON")
    }

    /// True once the server has ended the stream.
    pub async fn is_closed(&mut self) -> bool {
        match tokio::time::timeout(
            Duration::from_millis(SSE_EVENT_TIMEOUT_MS),
            self.drain_to_end(),
        )
        .await
        {
            Ok(()) => true,
            Err(_) => false,
        }
    }

    async fn drain_to_end(&mut self) {
        while let Some(Ok(_)) = self.stream.next().await {}
    }
}
