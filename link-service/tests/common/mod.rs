//! Test helpers for link-service integration tests.
//!
//! Flows run fully in-process: mock providers wired through
//! `Application::build_with_providers` and an in-memory cache, so no
//! external services are needed.

#![allow(dead_code)]

use async_trait::async_trait;
use link_service::Application;
use link_service::config::{GoCardLessConfig, LinkConfig, PlaidConfig, PluggyConfig};
use link_service::models::Environment;
use link_service::providers::{MockGoCardLessApi, MockPlaidApi, MockPluggyApi};
use link_service::services::{CredentialCache, InMemoryCache};
use secrecy::Secret;
use service_core::config::{Config as CoreConfig, Environment as CoreEnvironment};
use std::sync::Arc;
use std::time::Duration;

pub const TEST_USER_ID: &str = "user-123";
pub const TEST_INSTITUTION_ID: &str = "SANDBOXFINANCE_SFIN0000";

/// Cache backend that is always unavailable.
///
/// Reads miss, writes vanish, health checks fail. Tests use it to verify
/// the flows keep working through a cache outage.
pub struct OutageCache;

#[async_trait]
impl CredentialCache for OutageCache {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) {}

    async fn invalidate(&self, _key: &str) {}

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Err(anyhow::anyhow!("cache offline"))
    }
}

fn test_config() -> LinkConfig {
    LinkConfig {
        common: CoreConfig { port: 0 },
        environment: CoreEnvironment::Dev,
        log_level: "info".to_string(),
        otlp_endpoint: None,
        redis_url: None,
        provider_timeout: Duration::from_secs(5),
        plaid: PlaidConfig {
            client_id: String::new(),
            secret: Secret::new(String::new()),
            environment: Environment::Sandbox,
            api_base_url: "http://127.0.0.1:0".to_string(),
            client_name: "link-service".to_string(),
        },
        gocardless: GoCardLessConfig {
            secret_id: String::new(),
            secret_key: Secret::new(String::new()),
            api_base_url: "http://127.0.0.1:0".to_string(),
        },
        pluggy: PluggyConfig {
            client_id: String::new(),
            client_secret: Secret::new(String::new()),
            api_base_url: "http://127.0.0.1:0".to_string(),
        },
    }
}

/// Test application with mock providers the test keeps handles to.
pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub plaid: Arc<MockPlaidApi>,
    pub gocardless: Arc<MockGoCardLessApi>,
    pub pluggy: Arc<MockPluggyApi>,
    pub cache: Arc<dyn CredentialCache>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_cache(Arc::new(InMemoryCache::new())).await
    }

    pub async fn spawn_with_cache(cache: Arc<dyn CredentialCache>) -> Self {
        let plaid = Arc::new(MockPlaidApi::new());
        let gocardless = Arc::new(MockGoCardLessApi::new());
        let pluggy = Arc::new(MockPluggyApi::new());

        // Use random port for testing (port 0)
        let app = Application::build_with_providers(
            test_config(),
            plaid.clone(),
            gocardless.clone(),
            pluggy.clone(),
            cache.clone(),
        )
        .await
        .expect("Failed to build test application");

        let address = format!("http://127.0.0.1:{}", app.port());

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        TestApp {
            address,
            client: reqwest::Client::new(),
            plaid,
            gocardless,
            pluggy,
            cache,
        }
    }

    /// POST a JSON body to a gateway path.
    pub async fn post(&self, path: &str, body: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }
}
