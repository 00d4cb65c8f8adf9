use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
};

use crate::record::IdentityRecord;

/// Durable mirror of the identity cache.
///
/// The cache writes through to it and reads it once at startup. Any error
/// here is logged by the cache and never fails a resolution.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Records refreshed at or after `cutoff`.
    async fn load_since(&self, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<IdentityRecord>>;
    async fn upsert(&self, record: &IdentityRecord) -> anyhow::Result<()>;
    async fn delete(&self, peer_id: i64) -> anyhow::Result<bool>;
    /// Delete records refreshed before `cutoff`, returning how many went.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64>;
    async fn list(&self) -> anyhow::Result<Vec<IdentityRecord>>;
    async fn clear(&self) -> anyhow::Result<u64>;
}
