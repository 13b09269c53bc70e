use super::StoreError;
use super::query::{Filter, Query};
use super::store::{Batch, Database, KeyValueStore, RecordStore};

use serde_json::Value;
use std::sync::{PoisonError, RwLock};

/// A store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    db: RwLock<Database>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Database> {
        self.db.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read().get(bucket, key))
    }

    async fn commit(&self, batch: Batch) -> Result<(), StoreError> {
        let mut db = self.db.write().unwrap_or_else(PoisonError::into_inner);
        *db = db.with_batch(batch)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryStore {
    async fn find_one(&self, collection: &str, field: &str, value: &Value) -> Result<Option<Value>, StoreError> {
        Ok(self.read().find_one(collection, field, value))
    }

    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        Ok(self.read().select(collection, query))
    }

    async fn count(&self, collection: &str, filters: &[Filter]) -> Result<usize, StoreError> {
        Ok(self.read().count(collection, filters))
    }
}
