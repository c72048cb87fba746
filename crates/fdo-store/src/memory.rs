//! In-memory [`KvStore`] with TTL eviction.

use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};
use crate::kv::{KvStore, UpdateFn, WriteBatch, WriteOp};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Configuration for [`MemoryKvStore`].
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Maximum number of live entries.
    pub max_entries: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000_000,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local store. Expiry is evaluated against an injected [`Clock`].
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<Vec<u8>, Entry>>,
    clock: Arc<dyn Clock>,
    config: MemoryStoreConfig,
}

impl std::fmt::Debug for MemoryKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKvStore")
            .field("entries", &self.entries.read().len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new(MemoryStoreConfig::default())
    }
}

impl MemoryKvStore {
    #[must_use]
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(config: MemoryStoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            clock,
            config,
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        let purged = before - entries.len();
        if purged > 0 {
            debug!(purged, "expired entries purged");
        }
        purged
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.read().values().filter(|e| e.is_live(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, value: Vec<u8>, ttl: Option<Duration>) -> Entry {
        Entry {
            value,
            expires_at: ttl.map(|ttl| self.clock.now() + ttl),
        }
    }

    /// Capacity check for inserting `new_keys` keys not yet present.
    fn ensure_room(
        &self,
        entries: &mut BTreeMap<Vec<u8>, Entry>,
        new_keys: usize,
    ) -> StoreResult<()> {
        if new_keys == 0 || entries.len() + new_keys <= self.config.max_entries {
            return Ok(());
        }
        let now = self.clock.now();
        entries.retain(|_, e| e.is_live(now));
        if entries.len() + new_keys > self.config.max_entries {
            return Err(StoreError::Full {
                entries: entries.len(),
                max: self.config.max_entries,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let now = self.clock.now();
        Ok(self
            .entries
            .read()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) -> StoreResult<()> {
        let entry = self.entry(value, ttl);
        let mut entries = self.entries.write();
        let new = usize::from(!entries.contains_key(key));
        self.ensure_room(&mut entries, new)?;
        entries.insert(key.to_vec(), entry);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> StoreResult<bool> {
        let now = self.clock.now();
        Ok(self
            .entries
            .write()
            .remove(key)
            .is_some_and(|e| e.is_live(now)))
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let now = self.clock.now();
        Ok(self
            .entries
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let ops = batch.into_ops();
        let mut entries = self.entries.write();

        let mut new_keys = std::collections::BTreeSet::new();
        for op in &ops {
            if let WriteOp::Set { key, .. } = op {
                if !entries.contains_key(key) {
                    new_keys.insert(key.as_slice());
                }
            }
        }
        self.ensure_room(&mut entries, new_keys.len())?;

        let count = ops.len();
        for op in ops {
            match op {
                WriteOp::Set { key, value, ttl } => {
                    let entry = self.entry(value, ttl);
                    entries.insert(key, entry);
                }
                WriteOp::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        debug!(ops = count, "batch committed");
        Ok(())
    }

    async fn update(
        &self,
        key: &[u8],
        ttl: Option<Duration>,
        f: Box<UpdateFn<'_>>,
    ) -> StoreResult<Vec<u8>> {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let current = entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.as_slice());
        let value = f(current)?;
        let new = usize::from(!entries.contains_key(key));
        self.ensure_room(&mut entries, new)?;
        entries.insert(key.to_vec(), self.entry(value.clone(), ttl));
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store_with_clock() -> (MemoryKvStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryKvStore::with_clock(MemoryStoreConfig::default(), clock.clone());
        (store, clock)
    }

    #[tokio::test]
    async fn set_get_delete() {
        let store = MemoryKvStore::default();
        store.set(b"k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(store.get(b"k").await.unwrap(), Some(b"v".to_vec()));
        assert!(store.delete(b"k").await.unwrap());
        assert!(!store.delete(b"k").await.unwrap());
        assert_eq!(store.get(b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_hides_and_purges_entries() {
        let (store, clock) = store_with_clock();
        store
            .set(b"short", vec![1], Some(Duration::minutes(10)))
            .await
            .unwrap();
        store.set(b"forever", vec![2], None).await.unwrap();

        clock.advance(Duration::minutes(9));
        assert!(store.get(b"short").await.unwrap().is_some());

        clock.advance(Duration::minutes(1));
        assert!(store.get(b"short").await.unwrap().is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired(), 1);
        assert!(store.get(b"forever").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn scan_prefix_is_ordered_and_bounded() {
        let (store, clock) = store_with_clock();
        store.set(b"a/2", vec![2], None).await.unwrap();
        store.set(b"a/1", vec![1], None).await.unwrap();
        store
            .set(b"a/3", vec![3], Some(Duration::seconds(1)))
            .await
            .unwrap();
        store.set(b"b/1", vec![9], None).await.unwrap();
        clock.advance(Duration::seconds(2));

        let found = store.scan_prefix(b"a/").await.unwrap();
        assert_eq!(
            found,
            vec![(b"a/1".to_vec(), vec![1]), (b"a/2".to_vec(), vec![2])]
        );
    }

    #[tokio::test]
    async fn commit_is_all_or_nothing() {
        let store = MemoryKvStore::new(MemoryStoreConfig { max_entries: 2 });
        store.set(b"x", vec![0], None).await.unwrap();

        let mut batch = WriteBatch::new();
        batch.set(b"y".to_vec(), vec![1], None).set(b"z".to_vec(), vec![2], None);
        assert!(matches!(
            store.commit(batch).await,
            Err(StoreError::Full { max: 2, .. })
        ));
        assert!(store.get(b"y").await.unwrap().is_none());

        let mut batch = WriteBatch::new();
        batch.delete(b"x".to_vec()).set(b"y".to_vec(), vec![1], None);
        store.commit(batch).await.unwrap();
        assert!(store.get(b"x").await.unwrap().is_none());
        assert_eq!(store.get(b"y").await.unwrap(), Some(vec![1]));
    }

    #[tokio::test]
    async fn update_failure_leaves_value_untouched() {
        let store = MemoryKvStore::default();
        store.set(b"k", vec![1], None).await.unwrap();

        let result = store
            .update(
                b"k",
                None,
                Box::new(|_| Err(StoreError::Backend("rejected".into()))),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(store.get(b"k").await.unwrap(), Some(vec![1]));

        let next = store
            .update(
                b"k",
                None,
                Box::new(|cur| {
                    let mut v = cur.map(<[u8]>::to_vec).unwrap_or_default();
                    v.push(2);
                    Ok(v)
                }),
            )
            .await
            .unwrap();
        assert_eq!(next, vec![1, 2]);
    }

    #[tokio::test]
    async fn concurrent_updates_serialize() {
        let store = Arc::new(MemoryKvStore::default());
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .update(
                        b"counter",
                        None,
                        Box::new(|cur| {
                            let n = cur.map_or(0, |b| b[0]);
                            Ok(vec![n + 1])
                        }),
                    )
                    .await
                    .unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(store.get(b"counter").await.unwrap(), Some(vec![32]));
    }
}
