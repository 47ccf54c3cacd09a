use crate::payload::PayloadError;
use crate::pipeline::{EventOutcome, EventPipeline, LOG_TARGET};
use crate::store::{DeliveryServer, ServerDirectory};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Server type handled by [`WebApiProvider`].
pub const WEB_API_PROVIDER: &str = "email-proxy-web-api";

/// One provider's webhook processing strategy.
#[async_trait]
pub trait ProviderHandler: Send + Sync {
    /// Server type this handler is registered under.
    fn provider_id(&self) -> &str;

    /// Process one raw request body addressed to the given server.
    async fn handle(
        &self,
        server: &DeliveryServer,
        body: &[u8],
    ) -> Result<Vec<EventOutcome>, PayloadError>;
}

/// Dispatch table mapping server types to their handlers.
#[derive(Default)]
pub struct ProviderRegistry {
    handlers: HashMap<String, Arc<dyn ProviderHandler>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its provider id. A later registration for
    /// the same id replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn ProviderHandler>) {
        self.handlers
            .insert(handler.provider_id().to_string(), handler);
    }

    pub fn get(&self, provider_id: &str) -> Option<&Arc<dyn ProviderHandler>> {
        self.handlers.get(provider_id)
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

/// Web-API provider: runs the full event pipeline over the inbound body.
pub struct WebApiProvider {
    pipeline: EventPipeline,
}

impl WebApiProvider {
    pub fn new(pipeline: EventPipeline) -> Self {
        WebApiProvider { pipeline }
    }
}

#[async_trait]
impl ProviderHandler for WebApiProvider {
    fn provider_id(&self) -> &str {
        WEB_API_PROVIDER
    }

    async fn handle(
        &self,
        server: &DeliveryServer,
        body: &[u8],
    ) -> Result<Vec<EventOutcome>, PayloadError> {
        log::debug!(
            target: LOG_TARGET,
            "processing webhook body for server {}",
            server.server_id
        );
        self.pipeline.process_request(body).await
    }
}

/// Inbound webhook sink.
///
/// Resolves the delivery server addressed by the request, dispatches to the
/// handler registered for its server type, and always terminates the request
/// without a structured response. The caller learns nothing about how many
/// events were handled.
pub struct WebhookEndpoint {
    servers: Arc<dyn ServerDirectory>,
    registry: ProviderRegistry,
}

impl WebhookEndpoint {
    pub fn new(servers: Arc<dyn ServerDirectory>, registry: ProviderRegistry) -> Self {
        WebhookEndpoint { servers, registry }
    }

    pub async fn handle_request(&self, server_id: i64, body: &[u8]) {
        let server = match self.servers.find_server(server_id).await {
            Ok(Some(server)) => server,
            Ok(None) => {
                log::debug!(target: LOG_TARGET, "unknown delivery server: {server_id}");
                return;
            }
            Err(e) => {
                log::error!(target: LOG_TARGET, "server lookup failed: {e}");
                return;
            }
        };

        let handler = match self.registry.get(&server.server_type) {
            Some(handler) => handler,
            None => {
                log::debug!(
                    target: LOG_TARGET,
                    "no handler registered for server type: {}",
                    server.server_type
                );
                return;
            }
        };

        // Fire and forget. Outcomes are logged by the pipeline; a rejected
        // payload ends the request the same way a processed one does.
        if let Err(e) = handler.handle(&server, body).await {
            log::error!(target: LOG_TARGET, "webhook request rejected: {e}");
        }
    }
}
