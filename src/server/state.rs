use axum::extract::FromRef;

use std::sync::Arc;
use std::time::Instant;

use super::sse::ConnectionRegistry;
use super::ServerConfig;
use crate::dispatch::DispatchFacade;
use crate::webhook::WebhookIngestor;

pub type GuardedConnectionRegistry = Arc<ConnectionRegistry>;
pub type GuardedDispatchFacade = Arc<DispatchFacade>;
pub type GuardedWebhookIngestor = Arc<WebhookIngestor>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub registry: GuardedConnectionRegistry,
    pub facade: GuardedDispatchFacade,
    pub ingestor: GuardedWebhookIngestor,
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedConnectionRegistry {
    fn from_ref(input: &ServerState) -> Self {
        input.registry.clone()
    }
}

impl FromRef<ServerState> for GuardedDispatchFacade {
    fn from_ref(input: &ServerState) -> Self {
        input.facade.clone()
    }
}

impl FromRef<ServerState> for GuardedWebhookIngestor {
    fn from_ref(input: &ServerState) -> Self {
        input.ingestor.clone()
    }
}
