use crate::domain_model::{TokenRecord, UserEmail};
use tokio::sync::broadcast;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend unreachable or the operation timed out. Distinct from an
    /// absent record, which is an `Ok(None)`.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Expiring key-value storage for token records, keyed by token value and
/// indexed by owner. TTL eviction is the store's job; callers re-check
/// presence instead of reasoning about elapsed time.
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert or overwrite; restarts the TTL countdown from the record's
    /// remaining lifetime.
    async fn put(&self, record: &TokenRecord) -> Result<(), StoreError>;

    /// `None` when absent or already evicted.
    async fn get(&self, token: &str) -> Result<Option<TokenRecord>, StoreError>;

    /// Atomic get-and-delete. The rotation primitive: of two concurrent
    /// callers, at most one receives the record.
    async fn take(&self, token: &str) -> Result<Option<TokenRecord>, StoreError>;

    /// All live records for an owner. Records evicted mid-iteration are
    /// skipped, not an error.
    async fn find_all_by_email(&self, email: &UserEmail) -> Result<Vec<TokenRecord>, StoreError>;

    /// Bulk delete, used by revocation.
    async fn delete_all(&self, records: &[TokenRecord]) -> Result<(), StoreError>;

    /// TTL evictions are published here, carrying the evicted record so
    /// subscribers can run cleanup (presence teardown for access tokens).
    fn watch_expiry(&self) -> broadcast::Receiver<TokenRecord>;
}
