use super::StoreError;
use super::query::{Filter, Query, compare_values};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One write in a [`Batch`]
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    /// Set a key-value entry
    Set { bucket: String, key: String, value: Value },
    /// Delete a key-value entry
    Delete { bucket: String, key: String },
    /// Insert a record, replacing any record with the same `id_field` value
    Save { collection: String, id_field: String, record: Value },
    /// Delete the record whose `id_field` equals `id`
    DeleteRecord { collection: String, id_field: String, id: Value },
    /// Delete every record matching all `filters`
    DeleteWhere { collection: String, filters: Vec<Filter> },
    /// Delete every record in the collection
    Drop { collection: String },
}

/// A group of writes committed atomically: either all of them are applied or
/// none are.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, bucket: &str, key: &str, value: Value) -> Self {
        self.ops.push(BatchOp::Set {
            bucket: bucket.to_string(),
            key: key.to_string(),
            value,
        });
        self
    }

    pub fn delete(mut self, bucket: &str, key: &str) -> Self {
        self.ops.push(BatchOp::Delete {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        self
    }

    pub fn save(mut self, collection: &str, id_field: &str, record: Value) -> Self {
        self.ops.push(BatchOp::Save {
            collection: collection.to_string(),
            id_field: id_field.to_string(),
            record,
        });
        self
    }

    pub fn delete_record(mut self, collection: &str, id_field: &str, id: Value) -> Self {
        self.ops.push(BatchOp::DeleteRecord {
            collection: collection.to_string(),
            id_field: id_field.to_string(),
            id,
        });
        self
    }

    pub fn delete_where(mut self, collection: &str, filters: Vec<Filter>) -> Self {
        self.ops.push(BatchOp::DeleteWhere {
            collection: collection.to_string(),
            filters,
        });
        self
    }

    pub fn drop_collection(mut self, collection: &str) -> Self {
        self.ops.push(BatchOp::Drop {
            collection: collection.to_string(),
        });
        self
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Simple bucketed key-value storage.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Value>, StoreError>;

    /// Apply every write in `batch`, or none of them.
    async fn commit(&self, batch: Batch) -> Result<(), StoreError>;

    async fn set(&self, bucket: &str, key: &str, value: Value) -> Result<(), StoreError> {
        self.commit(Batch::new().set(bucket, key, value)).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.commit(Batch::new().delete(bucket, key)).await
    }
}

/// Collections of JSON records with lookup, query and count.
#[async_trait::async_trait]
pub trait RecordStore: KeyValueStore {
    /// The first record whose `field` equals `value`.
    async fn find_one(&self, collection: &str, field: &str, value: &Value) -> Result<Option<Value>, StoreError>;

    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Value>, StoreError>;

    async fn count(&self, collection: &str, filters: &[Filter]) -> Result<usize, StoreError>;
}

/// The whole contents of a store. Backends keep one of these and swap in a
/// modified copy on commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Database {
    #[serde(default)]
    buckets: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default)]
    collections: BTreeMap<String, Vec<Value>>,
}

fn has_value(record: &Value, field: &str, value: &Value) -> bool {
    record
        .get(field)
        .and_then(|v| compare_values(v, value))
        .is_some_and(|ordering| ordering == Ordering::Equal)
}

impl Database {
    pub(crate) fn get(&self, bucket: &str, key: &str) -> Option<Value> {
        self.buckets.get(bucket)?.get(key).cloned()
    }

    pub(crate) fn find_one(&self, collection: &str, field: &str, value: &Value) -> Option<Value> {
        self.collections
            .get(collection)?
            .iter()
            .find(|record| has_value(record, field, value))
            .cloned()
    }

    pub(crate) fn select(&self, collection: &str, query: &Query) -> Vec<Value> {
        match self.collections.get(collection) {
            Some(records) => query.apply(records),
            None => Vec::new(),
        }
    }

    pub(crate) fn count(&self, collection: &str, filters: &[Filter]) -> usize {
        let Some(records) = self.collections.get(collection) else {
            return 0;
        };
        records
            .iter()
            .filter(|record| filters.iter().all(|filter| filter.matches(record)))
            .count()
    }

    /// A copy of this database with `batch` applied. `self` is left untouched
    /// if any operation fails.
    pub(crate) fn with_batch(&self, batch: Batch) -> Result<Database, StoreError> {
        let mut next = self.clone();
        for op in batch.ops {
            next.apply(op)?;
        }
        Ok(next)
    }

    fn apply(&mut self, op: BatchOp) -> Result<(), StoreError> {
        match op {
            BatchOp::Set { bucket, key, value } => {
                self.buckets.entry(bucket).or_default().insert(key, value);
            }
            BatchOp::Delete { bucket, key } => {
                if let Some(entries) = self.buckets.get_mut(&bucket) {
                    entries.remove(&key);
                }
            }
            BatchOp::Save {
                collection,
                id_field,
                record,
            } => {
                let id = record.get(&id_field).cloned().ok_or_else(|| {
                    StoreError::Corruption(format!("record has no {:?} field", id_field))
                })?;
                let records = self.collections.entry(collection).or_default();
                records.retain(|existing| !has_value(existing, &id_field, &id));
                records.push(record);
            }
            BatchOp::DeleteRecord {
                collection,
                id_field,
                id,
            } => {
                if let Some(records) = self.collections.get_mut(&collection) {
                    records.retain(|existing| !has_value(existing, &id_field, &id));
                }
            }
            BatchOp::DeleteWhere { collection, filters } => {
                if let Some(records) = self.collections.get_mut(&collection) {
                    records.retain(|record| !filters.iter().all(|filter| filter.matches(record)));
                }
            }
            BatchOp::Drop { collection } => {
                self.collections.remove(&collection);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failed_batch_leaves_database_untouched() {
        let db = Database::default()
            .with_batch(Batch::new().save("txs", "hash", json!({"hash": "a"})))
            .unwrap();

        let result = db.with_batch(
            Batch::new()
                .drop_collection("txs")
                .save("txs", "hash", json!({"no_hash": true})),
        );
        assert!(matches!(result, Err(StoreError::Corruption(_))));
        assert!(db.find_one("txs", "hash", &json!("a")).is_some());
    }

    #[test]
    fn save_replaces_record_with_same_id() {
        let db = Database::default()
            .with_batch(
                Batch::new()
                    .save("txs", "hash", json!({"hash": "a", "height": -1}))
                    .save("txs", "hash", json!({"hash": "a", "height": 7})),
            )
            .unwrap();
        assert_eq!(db.count("txs", &[]), 1);
        assert_eq!(db.find_one("txs", "hash", &json!("a")).unwrap()["height"], 7);
    }
}
