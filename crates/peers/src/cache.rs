use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use {
    chrono::{DateTime, TimeDelta, Utc},
    serde::Serialize,
    tracing::{debug, info, warn},
    valet_common::UserInfo,
};

use crate::{record::IdentityRecord, store::IdentityStore};

/// Default validity window of a cached access hash, in seconds.
pub const DEFAULT_EXPIRY_SECS: i64 = 12 * 60 * 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total: usize,
    pub expired: usize,
    /// Identities with at least one unreset failure.
    pub failing: usize,
}

/// Access hashes by user id plus consecutive-failure counters.
///
/// Records and counters sit behind separate locks. Writes mirror to the
/// optional store after the lock is released; store errors only log.
pub struct IdentityCache {
    records: RwLock<HashMap<i64, IdentityRecord>>,
    failures: RwLock<HashMap<i64, u32>>,
    expiry: TimeDelta,
    store: Option<Arc<dyn IdentityStore>>,
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new(TimeDelta::seconds(DEFAULT_EXPIRY_SECS))
    }
}

impl IdentityCache {
    pub fn new(expiry: TimeDelta) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
            expiry,
            store: None,
        }
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn expiry(&self) -> TimeDelta {
        self.expiry
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Warm memory from the store, skipping stale rows.
    pub async fn load_from_store(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let cutoff = Utc::now() - self.expiry;
        match store.load_since(cutoff).await {
            Ok(rows) => {
                let count = rows.len();
                let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
                for record in rows {
                    records.insert(record.id, record);
                }
                info!(count, "identity cache loaded from store");
                count
            },
            Err(e) => {
                warn!(error = %e, "failed to load identity store, continuing with empty cache");
                0
            },
        }
    }

    /// The record for `id` if it is still fresh.
    pub fn get(&self, id: i64) -> Option<IdentityRecord> {
        self.get_at(id, Utc::now())
    }

    pub fn get_at(&self, id: i64, now: DateTime<Utc>) -> Option<IdentityRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .get(&id)
            .filter(|r| r.is_fresh(now, self.expiry))
            .cloned()
    }

    /// Store a freshly seen user, stamped now.
    pub async fn put(&self, user: UserInfo) -> IdentityRecord {
        let record = IdentityRecord::from_user(user, Utc::now());
        self.insert(record.clone()).await;
        record
    }

    pub async fn put_many(&self, users: impl IntoIterator<Item = UserInfo>) -> usize {
        let now = Utc::now();
        let batch: Vec<_> = users
            .into_iter()
            .filter(|u| u.id > 0 && u.access_hash != 0)
            .map(|u| IdentityRecord::from_user(u, now))
            .collect();
        if batch.is_empty() {
            return 0;
        }
        {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            for record in &batch {
                records.insert(record.id, record.clone());
            }
        }
        for record in &batch {
            self.persist(record).await;
        }
        debug!(count = batch.len(), "identity cache warmed");
        batch.len()
    }

    /// Insert a record as-is, keeping its timestamp.
    pub async fn insert(&self, record: IdentityRecord) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id, record.clone());
        self.persist(&record).await;
    }

    async fn persist(&self, record: &IdentityRecord) {
        if let Some(store) = &self.store
            && let Err(e) = store.upsert(record).await
        {
            warn!(peer_id = record.id, error = %e, "identity store write failed, keeping memory copy");
        }
    }

    /// Drop the record from memory and store. Returns true if memory held it.
    pub async fn remove(&self, id: i64) -> bool {
        let removed = self
            .records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some();
        if let Some(store) = &self.store
            && let Err(e) = store.delete(id).await
        {
            warn!(peer_id = id, error = %e, "identity store delete failed");
        }
        removed
    }

    pub fn failure_count(&self, id: i64) -> u32 {
        self.failures
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    /// Increment and return the counter.
    pub fn record_failure(&self, id: i64) -> u32 {
        let mut failures = self.failures.write().unwrap_or_else(|e| e.into_inner());
        let count = failures.entry(id).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn reset_failures(&self, id: i64) {
        self.failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    /// Drop stale records from memory and the store.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let removed = {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            let before = records.len();
            records.retain(|_, r| r.is_fresh(now, self.expiry));
            before - records.len()
        };
        if let Some(store) = &self.store {
            match store.purge_older_than(now - self.expiry).await {
                Ok(rows) => debug!(rows, "purged stale identity rows"),
                Err(e) => warn!(error = %e, "identity store purge failed"),
            }
        }
        removed
    }

    /// Forget every record and counter.
    pub async fn clear(&self) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        if let Some(store) = &self.store
            && let Err(e) = store.clear().await
        {
            warn!(error = %e, "identity store clear failed");
        }
    }

    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let expired = records
            .values()
            .filter(|r| !r.is_fresh(now, self.expiry))
            .count();
        CacheStats {
            total: records.len(),
            expired,
            failing: self
                .failures
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::store_sqlite::SqliteIdentityStore};

    fn aged(id: i64, hash: i64, age: TimeDelta) -> IdentityRecord {
        IdentityRecord::from_user(UserInfo::new(id, hash), Utc::now() - age)
    }

    #[tokio::test]
    async fn stale_records_read_as_absent() {
        let cache = IdentityCache::default();
        cache.insert(aged(1, 10, TimeDelta::hours(11))).await;
        cache.insert(aged(2, 20, TimeDelta::hours(12))).await;

        assert_eq!(cache.get(1).unwrap().access_hash, 10);
        assert!(cache.get(2).is_none());
        assert_eq!(cache.stats().expired, 1);

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.stats().total, 1);
    }

    #[tokio::test]
    async fn bulk_put_ignores_hashless_entries() {
        let cache = IdentityCache::default();
        let warmed = cache
            .put_many([UserInfo::new(1, 5), UserInfo::new(2, 0), UserInfo::new(3, 7)])
            .await;
        assert_eq!(warmed, 2);
        assert!(cache.get(2).is_none());
        assert_eq!(cache.get(3).unwrap().access_hash, 7);
    }

    #[test]
    fn failure_counters_increment_and_reset() {
        let cache = IdentityCache::default();
        assert_eq!(cache.record_failure(7), 1);
        assert_eq!(cache.record_failure(7), 2);
        assert_eq!(cache.failure_count(7), 2);
        cache.reset_failures(7);
        assert_eq!(cache.failure_count(7), 0);
    }

    #[tokio::test]
    async fn writes_mirror_to_store_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn IdentityStore> =
            Arc::new(SqliteIdentityStore::open(&dir.path().join("p.db")).await.unwrap());

        let cache = IdentityCache::default().with_store(Arc::clone(&store));
        cache.put(UserInfo::new(1, 11).with_username("one")).await;
        cache.insert(aged(2, 22, TimeDelta::hours(30))).await;
        cache.put(UserInfo::new(3, 33)).await;
        assert!(cache.remove(3).await);

        let restarted = IdentityCache::default().with_store(store);
        assert_eq!(restarted.load_from_store().await, 1);
        let one = restarted.get(1).unwrap();
        assert_eq!(one.username.as_deref(), Some("one"));
        assert!(restarted.get(2).is_none());
        assert!(restarted.get(3).is_none());
    }

    #[tokio::test]
    async fn clear_drops_records_and_counters() {
        let cache = IdentityCache::default();
        cache.put(UserInfo::new(1, 1)).await;
        cache.record_failure(9);
        cache.clear().await;
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
