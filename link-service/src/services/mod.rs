pub mod cache;
pub mod metrics;
pub mod normalizer;
pub mod orchestrator;

pub use cache::{CredentialCache, InMemoryCache, RedisCache};
pub use orchestrator::LinkOrchestrator;
