pub mod gocardless;
pub mod health;
pub mod metrics;
pub mod plaid;
pub mod pluggy;
