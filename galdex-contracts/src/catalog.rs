//! External catalog adapter contract.
//!
//! The core never talks to a catalog directly; it consumes an adapter that
//! resolves titles and external ids. Adapters are rate-limited and may fail
//! transiently; callers must tolerate empty results without losing
//! candidates.

use async_trait::async_trait;
use galdex_model::IdentityHypothesis;
use thiserror::Error;

/// Failure surface of a catalog adapter.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The catalog rejected the request for rate-limiting reasons; safe to
    /// retry after a delay.
    #[error("catalog rate limited: {0}")]
    RateLimited(String),

    /// Transient transport or catalog-side failure; safe to retry.
    #[error("catalog temporarily unavailable: {0}")]
    Unavailable(String),

    /// Permanent failure for this request; retrying will not help.
    #[error("catalog request failed: {0}")]
    Request(String),
}

impl CatalogError {
    /// Whether a retry policy should attempt this request again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CatalogError::RateLimited(_) | CatalogError::Unavailable(_)
        )
    }
}

/// Adapter over one external catalog (VNDB, Bangumi, ...).
#[async_trait]
pub trait CatalogAdapter: Send + Sync {
    /// Identifier recorded as `source_type` on links minted from this
    /// adapter's hypotheses.
    fn source_type(&self) -> &str;

    /// Look up identity hypotheses for a cleaned title. An empty vector is
    /// a valid answer.
    async fn lookup_by_title(
        &self,
        title: &str,
    ) -> Result<Vec<IdentityHypothesis>, CatalogError>;

    /// Fetch the full metadata snapshot for a known external id.
    async fn fetch_by_external_id(
        &self,
        source: &str,
        id: &str,
    ) -> Result<serde_json::Value, CatalogError>;
}
