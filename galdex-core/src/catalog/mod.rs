//! Catalog adapter consumption.
//!
//! The core never implements a catalog client; it wraps whatever adapter
//! is injected with a bounded exponential-backoff retry policy. This is
//! the only place in the engine where retries are automatic.

use std::time::Duration;

use async_trait::async_trait;
use galdex_contracts::catalog::{CatalogAdapter, CatalogError};
use galdex_model::IdentityHypothesis;
use tracing::{debug, warn};

/// Bounded retry policy for transient catalog failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        exp.min(self.max_delay)
    }
}

/// Decorator adding retries to any catalog adapter.
#[derive(Debug)]
pub struct RetryingCatalog<A> {
    inner: A,
    policy: RetryPolicy,
}

impl<A: CatalogAdapter> RetryingCatalog<A> {
    pub fn new(inner: A, policy: RetryPolicy) -> Self {
        RetryingCatalog { inner, policy }
    }

    async fn run_with_retry<T, F, Fut>(&self, mut call: F) -> Result<T, CatalogError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, CatalogError>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(%err, attempt, delay_ms = delay.as_millis() as u64, "catalog call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!(%err, attempt, "catalog call failed permanently");
                    return Err(err);
                }
            }
        }
    }
}

#[async_trait]
impl<A: CatalogAdapter> CatalogAdapter for RetryingCatalog<A> {
    fn source_type(&self) -> &str {
        self.inner.source_type()
    }

    async fn lookup_by_title(
        &self,
        title: &str,
    ) -> Result<Vec<IdentityHypothesis>, CatalogError> {
        self.run_with_retry(|| self.inner.lookup_by_title(title))
            .await
    }

    async fn fetch_by_external_id(
        &self,
        source: &str,
        id: &str,
    ) -> Result<serde_json::Value, CatalogError> {
        self.run_with_retry(|| self.inner.fetch_by_external_id(source, id))
            .await
    }
}

/// Adapter that knows nothing. Useful when no catalog is configured: the
/// pipeline tolerates empty results without losing candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCatalog;

#[async_trait]
impl CatalogAdapter for NullCatalog {
    fn source_type(&self) -> &str {
        "none"
    }

    async fn lookup_by_title(
        &self,
        _title: &str,
    ) -> Result<Vec<IdentityHypothesis>, CatalogError> {
        Ok(Vec::new())
    }

    async fn fetch_by_external_id(
        &self,
        _source: &str,
        _id: &str,
    ) -> Result<serde_json::Value, CatalogError> {
        Ok(serde_json::Value::Null)
    }
}
