//! Resource provider trait definition

use crate::error::{EngineError, ProviderError, ProviderResult, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Live attributes as reported by a provider
pub type Attributes = BTreeMap<String, Value>;

/// Result of a successful create
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    /// Opaque provider-assigned identifier
    pub id: String,
    pub attributes: Attributes,
}

/// Create/read/update/delete capability for one resource type.
///
/// Cloud APIs (network, cluster, database, ...) implement this trait; the
/// engine never talks to a cloud in any other way.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// The resource type this provider manages (e.g. "network")
    fn resource_type(&self) -> &str;

    async fn create(&self, name: &str, attributes: &Attributes) -> ProviderResult<Created>;

    /// Returns `ProviderError::NotFound` when the resource no longer exists
    async fn read(&self, id: &str) -> ProviderResult<Attributes>;

    async fn update(&self, id: &str, attributes: &Attributes) -> ProviderResult<Attributes>;

    async fn delete(&self, id: &str) -> ProviderResult<()>;
}

/// Providers indexed by resource type
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ResourceProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn ResourceProvider>) {
        self.providers
            .insert(provider.resource_type().to_string(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, resource_type: &str) -> Result<Arc<dyn ResourceProvider>> {
        self.providers
            .get(resource_type)
            .cloned()
            .ok_or_else(|| EngineError::ProviderNotFound(resource_type.to_string()))
    }

    pub fn contains(&self, resource_type: &str) -> bool {
        self.providers.contains_key(resource_type)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.providers.keys().collect();
        types.sort();
        f.debug_struct("ProviderRegistry").field("types", &types).finish()
    }
}

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No waiting between attempts; for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    /// Returns the final result and the number of attempts made.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> (ProviderResult<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for_attempt(attempt - 1);
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what,
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(ProviderError::Transient(message)) => {
                    return (
                        Err(ProviderError::Transient(format!(
                            "{} (gave up after {} attempts)",
                            message, attempt
                        ))),
                        attempt,
                    );
                }
                result => return (result, attempt),
            }
        }
    }
}
