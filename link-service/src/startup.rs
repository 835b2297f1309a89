//! Application startup and lifecycle management.
//!
//! Builds the cache, the provider clients, and the HTTP server. Providers
//! without credentials fall back to their mocks so the service still boots
//! in development environments.

use crate::config::LinkConfig;
use crate::providers::{
    GoCardLessApi, GoCardLessClient, MockGoCardLessApi, MockPlaidApi, MockPluggyApi, PlaidApi,
    PlaidClient, PluggyApi, PluggyClient,
};
use crate::services::{CredentialCache, InMemoryCache, LinkOrchestrator, RedisCache};
use crate::{AppState, build_router};
use service_core::error::AppError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: LinkConfig) -> Result<Self, AppError> {
        let cache: Arc<dyn CredentialCache> = match config.redis_url.as_deref() {
            Some(url) => Arc::new(RedisCache::new(url).await?),
            None => {
                tracing::info!("REDIS_URL not set, using in-process cache");
                Arc::new(InMemoryCache::new())
            }
        };

        let timeout = config.provider_timeout;

        let plaid_client = PlaidClient::new(config.plaid.clone(), timeout);
        let plaid: Arc<dyn PlaidApi> = if plaid_client.is_configured() {
            tracing::info!("Plaid client initialized");
            Arc::new(plaid_client)
        } else {
            tracing::warn!("Plaid credentials not configured, using mock provider");
            Arc::new(MockPlaidApi::new())
        };

        let gocardless_client =
            GoCardLessClient::new(config.gocardless.clone(), cache.clone(), timeout);
        let gocardless: Arc<dyn GoCardLessApi> = if gocardless_client.is_configured() {
            tracing::info!("GoCardless client initialized");
            Arc::new(gocardless_client)
        } else {
            tracing::warn!("GoCardless credentials not configured, using mock provider");
            Arc::new(MockGoCardLessApi::new())
        };

        let pluggy_client = PluggyClient::new(config.pluggy.clone(), cache.clone(), timeout);
        let pluggy: Arc<dyn PluggyApi> = if pluggy_client.is_configured() {
            tracing::info!("Pluggy client initialized");
            Arc::new(pluggy_client)
        } else {
            tracing::warn!("Pluggy credentials not configured, using mock provider");
            Arc::new(MockPluggyApi::new())
        };

        Self::build_with_providers(config, plaid, gocardless, pluggy, cache).await
    }

    /// Assemble the application around already-constructed providers.
    ///
    /// Integration tests use this to wire in mocks they keep handles to.
    pub async fn build_with_providers(
        config: LinkConfig,
        plaid: Arc<dyn PlaidApi>,
        gocardless: Arc<dyn GoCardLessApi>,
        pluggy: Arc<dyn PluggyApi>,
        cache: Arc<dyn CredentialCache>,
    ) -> Result<Self, AppError> {
        let orchestrator = Arc::new(LinkOrchestrator::new(
            plaid,
            gocardless,
            pluggy,
            cache.clone(),
        ));

        let state = AppState {
            config: Arc::new(config),
            cache,
            orchestrator,
        };

        // Bind listener (port 0 = random port for testing)
        let addr = SocketAddr::from(([0, 0, 0, 0], state.config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Link service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state);
        axum::serve(self.listener, router).await
    }
}
