//! Event Persister
//!
//! Writes decoded events as [`EventRecord`]s keyed by the discovered token.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error};

use crate::decoder::DecodedEvent;
use crate::records::{format_address, EventRecord, Keyspace, RecordError, VersionedRecord};
use crate::store::{KeyValueStore, StoreError};

/// Errors that can occur while persisting a batch
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Failed to encode record: {0}")]
    Encode(#[from] RecordError),

    #[error("{failed} of {total} writes failed, first error: {source}")]
    Write {
        failed: usize,
        total: usize,
        #[source]
        source: StoreError,
    },
}

/// Result of a successful batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistSummary {
    pub stored: usize,
}

pub struct EventPersister {
    store: Arc<dyn KeyValueStore>,
    keys: Keyspace,
    ttl: Duration,
}

impl EventPersister {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: Keyspace, ttl: Duration) -> Self {
        Self { store, keys, ttl }
    }

    /// Write one record per event, in order.
    ///
    /// Every write is attempted even after a failure; the batch succeeds only
    /// if all of them did. Later events for the same token overwrite earlier ones.
    pub async fn persist(&self, events: &[DecodedEvent]) -> Result<PersistSummary, PersistError> {
        let mut failed = 0;
        let mut first_error = None;

        for event in events {
            let key = self.keys.event(&event.entity);
            let value = EventRecord::new(
                event.block_number,
                event.transaction_hash,
                event.paired_token,
            )
            .encode()?;

            match self.store.set(&key, &value, Some(self.ttl)).await {
                Ok(()) => debug!("Stored {} (block {})", key, event.block_number),
                Err(e) => {
                    error!(
                        "Failed to store event for {} at block {}: {}",
                        format_address(event.entity),
                        event.block_number,
                        e
                    );
                    failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(source) => Err(PersistError::Write {
                failed,
                total: events.len(),
                source,
            }),
            None => Ok(PersistSummary {
                stored: events.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use alloy::primitives::{Address, TxHash};
    use async_trait::async_trait;

    fn event(entity: u8, paired: u8, block: u64) -> DecodedEvent {
        DecodedEvent {
            entity: Address::with_last_byte(entity),
            paired_token: Address::with_last_byte(paired),
            block_number: block,
            transaction_hash: TxHash::with_last_byte(entity),
        }
    }

    /// Store whose writes fail for keys ending in a given suffix
    struct FlakyStore {
        inner: MemoryStore,
        failing_suffix: &'static str,
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
            if key.ends_with(self.failing_suffix) {
                return Err(StoreError::Unavailable("write rejected".to_string()));
            }
            self.inner.set(key, value, ttl).await
        }
        async fn exists(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.exists(key).await
        }
        async fn del(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.del(key).await
        }
        async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.inner.scan_prefix(prefix).await
        }
        async fn compare_and_set(
            &self,
            key: &str,
            expected: Option<&str>,
            value: &str,
        ) -> Result<bool, StoreError> {
            self.inner.compare_and_set(key, expected, value).await
        }
        async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
            self.inner.try_lock(key, token, ttl).await
        }
        async fn unlock(&self, key: &str, token: &str) -> Result<bool, StoreError> {
            self.inner.unlock(key, token).await
        }
    }

    #[tokio::test]
    async fn test_persist_writes_records() {
        let store = Arc::new(MemoryStore::new());
        let persister =
            EventPersister::new(store.clone(), Keyspace::new("bsc"), Duration::from_secs(60));

        let summary = persister.persist(&[event(1, 9, 10), event(2, 9, 11)]).await.unwrap();
        assert_eq!(summary.stored, 2);

        let raw = store
            .get(&Keyspace::new("bsc").event(&Address::with_last_byte(2)))
            .await
            .unwrap()
            .unwrap();
        let record = EventRecord::decode(&raw).unwrap();
        assert_eq!(record.observed_at_block, 11);
        assert_eq!(record.paired_token, Address::with_last_byte(9));
    }

    #[tokio::test]
    async fn test_persist_last_write_wins() {
        let store = Arc::new(MemoryStore::new());
        let persister =
            EventPersister::new(store.clone(), Keyspace::new("bsc"), Duration::from_secs(60));

        persister.persist(&[event(1, 8, 10), event(1, 9, 12)]).await.unwrap();

        assert_eq!(store.len(), 1);
        let raw = store
            .get(&Keyspace::new("bsc").event(&Address::with_last_byte(1)))
            .await
            .unwrap()
            .unwrap();
        let record = EventRecord::decode(&raw).unwrap();
        assert_eq!(record.observed_at_block, 12);
        assert_eq!(record.paired_token, Address::with_last_byte(9));
    }

    #[tokio::test]
    async fn test_persist_empty_batch() {
        let store = Arc::new(MemoryStore::new());
        let persister = EventPersister::new(store.clone(), Keyspace::new("bsc"), Duration::from_secs(60));
        assert_eq!(persister.persist(&[]).await.unwrap().stored, 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_persist_attempts_every_write() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failing_suffix: "01",
        });
        let persister = EventPersister::new(store.clone(), Keyspace::new("bsc"), Duration::from_secs(60));

        let result = persister
            .persist(&[event(1, 9, 10), event(2, 9, 10), event(3, 9, 10)])
            .await;

        match result {
            Err(PersistError::Write { failed, total, .. }) => {
                assert_eq!(failed, 1);
                assert_eq!(total, 3);
            }
            other => panic!("expected write error, got {:?}", other),
        }
        // The writes after the failure still happened
        assert_eq!(store.inner.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_expire_after_ttl() {
        let store = Arc::new(MemoryStore::new());
        let persister =
            EventPersister::new(store.clone(), Keyspace::new("bsc"), Duration::from_secs(60));
        persister.persist(&[event(1, 9, 10)]).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.is_empty());
    }
}
