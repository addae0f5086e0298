//! Test server lifecycle management
//!
//! Each test gets an isolated server over its own temporary databases, with
//! push delivery going through an in-memory [`RecordingTransport`].

use super::constants::*;
use async_trait::async_trait;
use broadcaster_server::dispatch::{DispatchFacade, FacadeSettings};
use broadcaster_server::notifications::SqliteNotificationLedger;
use broadcaster_server::push::{PushDispatcher, PushError, PushMessage, PushTransport, SendResult};
use broadcaster_server::server::sse::ConnectionRegistry;
use broadcaster_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use broadcaster_server::token_store::SqliteTokenStore;
use broadcaster_server::webhook::{IngestSettings, WebhookIngestor};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Push transport that records every send and rejects a fixed set of tokens.
#[derive(Default)]
pub struct RecordingTransport {
    rejected: HashSet<String>,
    sent: Mutex<Vec<(String, PushMessage)>>,
}

impl RecordingTransport {
    pub fn rejecting(tokens: &[&str]) -> Self {
        Self {
            rejected: tokens.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Tokens that were sent to, in order.
    pub fn sent_tokens(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(token, _)| token.clone())
            .collect()
    }

    pub fn sent_messages(&self) -> Vec<PushMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn send_one(&self, token: &str, message: &PushMessage) -> SendResult {
        self.sent
            .lock()
            .unwrap()
            .push((token.to_string(), message.clone()));
        if self.rejected.contains(token) {
            return Err(PushError::InvalidToken(format!("{} is unregistered", token)));
        }
        Ok(format!("projects/test/messages/{}", token))
    }
}

/// Test server instance with isolated databases
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    pub token_store: Arc<SqliteTokenStore>,
    pub ledger: Arc<SqliteNotificationLedger>,
    pub registry: Arc<ConnectionRegistry>,
    pub transport: Arc<RecordingTransport>,

    // Private fields - keep resources alive until drop
    _temp_db_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a server on a random port with a transport that accepts every token.
    pub async fn spawn() -> Self {
        Self::spawn_with_transport(RecordingTransport::default()).await
    }

    /// Spawns a server on a random port and waits until it answers /health.
    ///
    /// # Panics
    ///
    /// Panics if the databases cannot be created, the port cannot be bound or
    /// the server does not become ready in time.
    pub async fn spawn_with_transport(transport: RecordingTransport) -> Self {
        let temp_db_dir = TempDir::new().expect("Failed to create temp dir");

        let token_store = Arc::new(
            SqliteTokenStore::new(temp_db_dir.path().join("tokens.db"))
                .expect("Failed to open token store"),
        );
        let ledger = Arc::new(
            SqliteNotificationLedger::new(temp_db_dir.path().join("notifications.db"))
                .expect("Failed to open notification ledger"),
        );
        let transport = Arc::new(transport);
        let dispatcher = Arc::new(PushDispatcher::new(transport.clone()));
        let registry = Arc::new(ConnectionRegistry::new(16));

        let facade = Arc::new(DispatchFacade::new(
            token_store.clone(),
            ledger.clone(),
            Some(dispatcher.clone()),
            FacadeSettings {
                default_days_back: 30,
            },
        ));
        let ingestor = Arc::new(WebhookIngestor::new(
            registry.clone(),
            ledger.clone(),
            token_store.clone(),
            Some(dispatcher),
            IngestSettings {
                sse_enabled: true,
                default_system_id: "webhook".to_string(),
                dedupe: true,
            },
        ));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            ..Default::default()
        };
        let app = make_app(config, registry.clone(), facade, ingestor);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            token_store,
            ledger,
            registry,
            transport,
            _temp_db_dir: temp_db_dir,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/health", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
