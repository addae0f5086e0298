//! Firebase Cloud Messaging HTTP v1 transport.

use super::{PushError, PushMessage, PushTransport, SendResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_FCM_ENDPOINT: &str = "https://fcm.googleapis.com";

/// Everything needed to talk to FCM.
#[derive(Debug, Clone)]
pub struct FcmSettings {
    pub project_id: String,
    /// OAuth2 bearer token with the `firebase.messaging` scope.
    pub access_token: String,
    pub endpoint: String,
    pub timeout_sec: u64,
}

pub struct FcmTransport {
    client: reqwest::Client,
    send_url: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    #[serde(default)]
    error_code: Option<String>,
}

impl FcmTransport {
    pub fn new(settings: FcmSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_sec))
            .build()
            .context("Failed to create FCM HTTP client")?;

        let endpoint = settings.endpoint.trim_end_matches('/');
        let send_url = format!(
            "{}/v1/projects/{}/messages:send",
            endpoint, settings.project_id
        );

        Ok(Self {
            client,
            send_url,
            access_token: settings.access_token,
        })
    }

    fn request_body(token: &str, message: &PushMessage) -> serde_json::Value {
        let mut notification = json!({
            "title": message.title,
            "body": message.body,
        });
        if let Some(image_url) = &message.image_url {
            notification["image"] = json!(image_url);
        }

        let mut body = json!({
            "message": {
                "token": token,
                "notification": notification,
                "data": message.data,
            }
        });
        if let Some(image) = &message.webpush_image {
            body["message"]["webpush"] = json!({ "notification": { "image": image } });
        }
        body
    }

    /// Maps an FCM error response onto our error classes.
    fn classify_error(status: StatusCode, body: ErrorBody) -> PushError {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return PushError::Unauthorized(body.message);
        }

        let error_code = body
            .details
            .iter()
            .find_map(|d| d.error_code.as_deref())
            .unwrap_or_default();
        let token_is_invalid = matches!(error_code, "UNREGISTERED" | "INVALID_ARGUMENT")
            || body.status == "NOT_FOUND"
            || status == StatusCode::NOT_FOUND;
        if token_is_invalid {
            return PushError::InvalidToken(body.message);
        }

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return PushError::Transport(format!("{} {}", status, body.message));
        }
        PushError::Rejected(format!("{} {}", status, body.message))
    }
}

#[async_trait]
impl PushTransport for FcmTransport {
    async fn send_one(&self, token: &str, message: &PushMessage) -> SendResult {
        let response = self
            .client
            .post(&self.send_url)
            .bearer_auth(&self.access_token)
            .json(&Self::request_body(token, message))
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let sent: SendResponse = response
                .json()
                .await
                .map_err(|e| PushError::Transport(format!("Unreadable FCM response: {}", e)))?;
            debug!("FCM accepted message {}", sent.name);
            return Ok(sent.name);
        }

        let body = response
            .json::<ErrorEnvelope>()
            .await
            .map(|envelope| envelope.error)
            .unwrap_or_default();
        let err = Self::classify_error(status, body);
        warn!("FCM send failed: {}", err);
        Err(err)
    }
}
