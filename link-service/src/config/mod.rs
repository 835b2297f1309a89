use secrecy::Secret;
use service_core::config::{self as core_config, get_env, get_env_opt};
use service_core::error::AppError;
use std::env;
use std::time::Duration;

use crate::models::Environment;

const DEFAULT_GOCARDLESS_BASE_URL: &str = "https://bankaccountdata.gocardless.com/api/v2";
const DEFAULT_PLUGGY_BASE_URL: &str = "https://api.pluggy.ai";

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub common: core_config::Config,
    pub environment: core_config::Environment,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// When unset, flows run against an in-process cache.
    pub redis_url: Option<String>,
    pub provider_timeout: Duration,
    pub plaid: PlaidConfig,
    pub gocardless: GoCardLessConfig,
    pub pluggy: PluggyConfig,
}

#[derive(Debug, Clone)]
pub struct PlaidConfig {
    pub client_id: String,
    pub secret: Secret<String>,
    pub environment: Environment,
    pub api_base_url: String,
    /// Shown to end users inside Plaid Link.
    pub client_name: String,
}

#[derive(Debug, Clone)]
pub struct GoCardLessConfig {
    pub secret_id: String,
    pub secret_key: Secret<String>,
    pub api_base_url: String,
}

#[derive(Debug, Clone)]
pub struct PluggyConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub api_base_url: String,
}

impl LinkConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let environment = core_config::Environment::from_env();
        let is_prod = environment.is_prod();

        let plaid_environment = parse_plaid_environment(
            &env::var("PLAID_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string()),
        );

        Ok(LinkConfig {
            common,
            environment,
            log_level: env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "info,link_service=debug".to_string()),
            otlp_endpoint: get_env_opt("OTLP_ENDPOINT"),
            redis_url: get_env_opt("REDIS_URL"),
            provider_timeout: Duration::from_secs(
                env::var("PROVIDER_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
            ),
            plaid: PlaidConfig {
                client_id: get_env("PLAID_CLIENT_ID", Some(""), is_prod)?,
                secret: Secret::new(get_env("PLAID_SECRET", Some(""), is_prod)?),
                environment: plaid_environment,
                api_base_url: env::var("PLAID_BASE_URL")
                    .unwrap_or_else(|_| plaid_base_url(plaid_environment).to_string()),
                client_name: env::var("PLAID_CLIENT_NAME")
                    .unwrap_or_else(|_| "link-service".to_string()),
            },
            gocardless: GoCardLessConfig {
                secret_id: get_env("GOCARDLESS_SECRET_ID", Some(""), is_prod)?,
                secret_key: Secret::new(get_env("GOCARDLESS_SECRET_KEY", Some(""), is_prod)?),
                api_base_url: env::var("GOCARDLESS_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_GOCARDLESS_BASE_URL.to_string()),
            },
            pluggy: PluggyConfig {
                client_id: get_env("PLUGGY_CLIENT_ID", Some(""), is_prod)?,
                client_secret: Secret::new(get_env("PLUGGY_CLIENT_SECRET", Some(""), is_prod)?),
                api_base_url: env::var("PLUGGY_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_PLUGGY_BASE_URL.to_string()),
            },
        })
    }
}

fn parse_plaid_environment(value: &str) -> Environment {
    match value.to_ascii_lowercase().as_str() {
        "production" | "prod" => Environment::Production,
        "development" => Environment::Development,
        "sandbox" => Environment::Sandbox,
        other => {
            tracing::warn!(value = other, "Unknown PLAID_ENVIRONMENT, using sandbox");
            Environment::Sandbox
        }
    }
}

fn plaid_base_url(environment: Environment) -> &'static str {
    match environment {
        Environment::Sandbox => "https://sandbox.plaid.com",
        Environment::Development => "https://development.plaid.com",
        Environment::Production => "https://production.plaid.com",
    }
}
