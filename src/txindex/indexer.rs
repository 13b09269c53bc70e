use super::query::{Filter, Query, Sort};
use super::store::{Batch, RecordStore};
use super::{METADATA_BUCKET, TRANSACTIONS_COLLECTION, TX_INDEX_LAST_BLOCK_KEY, TX_VERSION_KEY, TxIndexError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Combines an already indexed transaction (first argument) with a new version
/// of it (second argument) into the record to store, e.g. to keep user
/// annotations on the old record.
pub type MergeFn<T> = dyn Fn(T, T) -> Result<T, TxIndexError> + Send + Sync;

/// Describes the caller's transaction record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIndexConfig {
    /// Record format version. Opening an index built with another version
    /// drops it so it can be rebuilt.
    pub version: u32,
    /// Field holding the unique transaction id
    pub id_field: String,
    /// Field holding the block height (-1 for unmined)
    pub height_field: String,
}

impl TxIndexConfig {
    pub fn new(version: u32, id_field: impl Into<String>, height_field: impl Into<String>) -> Self {
        Self {
            version,
            id_field: id_field.into(),
            height_field: height_field.into(),
        }
    }
}

/// Incrementally indexes caller-defined transaction records.
pub struct TxIndexer<T, S: ?Sized = dyn RecordStore> {
    store: Arc<S>,
    config: TxIndexConfig,
    /// Serializes writes so lookup-then-commit sequences don't interleave.
    write_lock: tokio::sync::Mutex<()>,
    _record: PhantomData<fn() -> T>,
}

impl<T, S> TxIndexer<T, S>
where
    T: Serialize + DeserializeOwned + Send + Sync,
    S: RecordStore + ?Sized,
{
    /// Open the index in `store`, dropping it first if it was built with a
    /// different record version.
    pub async fn open(store: Arc<S>, config: TxIndexConfig) -> Result<Self, TxIndexError> {
        let stored_version = match store.get(METADATA_BUCKET, TX_VERSION_KEY).await? {
            Some(value) => Some(serde_json::from_value::<u32>(value)?),
            None => None,
        };

        if stored_version != Some(config.version) {
            match stored_version {
                Some(old) => warn!(
                    "Transaction index version {} differs from {}, dropping indexed transactions",
                    old, config.version
                ),
                None => debug!("Initializing transaction index at version {}", config.version),
            }
            store
                .commit(
                    Batch::new()
                        .drop_collection(TRANSACTIONS_COLLECTION)
                        .set(METADATA_BUCKET, TX_INDEX_LAST_BLOCK_KEY, json!(0))
                        .set(METADATA_BUCKET, TX_VERSION_KEY, json!(config.version)),
                )
                .await?;
        }

        Ok(Self {
            store,
            config,
            write_lock: tokio::sync::Mutex::new(()),
            _record: PhantomData,
        })
    }

    pub fn config(&self) -> &TxIndexConfig {
        &self.config
    }

    /// Save `tx`, replacing any record with the same id. If one exists and
    /// `merge` is given, the merged record is stored instead. Returns whether
    /// a record with this id was already indexed.
    pub async fn index_transaction(&self, tx: T, merge: Option<&MergeFn<T>>) -> Result<bool, TxIndexError> {
        let _guard = self.write_lock.lock().await;
        let id_field = self.config.id_field.as_str();

        let record = serde_json::to_value(&tx)?;
        let id = record
            .get(id_field)
            .cloned()
            .ok_or_else(|| TxIndexError::MissingField(id_field.to_string()))?;
        if id.is_null() {
            return Err(TxIndexError::InvalidField {
                field: id_field.to_string(),
                reason: "id is null".to_string(),
            });
        }

        let existing = self.store.find_one(TRANSACTIONS_COLLECTION, id_field, &id).await?;
        let is_update = existing.is_some();

        let batch = match (existing, merge) {
            (Some(old), Some(merge)) => {
                let old: T = serde_json::from_value(old)?;
                let merged = merge(old, tx).map_err(|e| match e {
                    TxIndexError::Merge(reason) => TxIndexError::Merge(reason),
                    other => TxIndexError::Merge(other.to_string()),
                })?;
                Batch::new()
                    .delete_record(TRANSACTIONS_COLLECTION, id_field, id)
                    .save(TRANSACTIONS_COLLECTION, id_field, serde_json::to_value(&merged)?)
            }
            _ => Batch::new().save(TRANSACTIONS_COLLECTION, id_field, record),
        };
        self.store.commit(batch).await?;

        Ok(is_update)
    }

    /// The transaction whose `field` equals `value`, if any.
    pub async fn find_transaction(&self, field: &str, value: impl Into<Value>) -> Result<Option<T>, TxIndexError> {
        let value = value.into();
        match self.store.find_one(TRANSACTIONS_COLLECTION, field, &value).await? {
            Some(record) => Ok(Some(serde_json::from_value(record)?)),
            None => Ok(None),
        }
    }

    /// Transactions matching every filter, optionally sorted and paged. An
    /// `offset` or `limit` of 0 is ignored.
    pub async fn find_transactions(
        &self,
        offset: usize,
        limit: usize,
        sort: Option<Sort>,
        filters: Vec<Filter>,
    ) -> Result<Vec<T>, TxIndexError> {
        let query = Query {
            filters,
            sort,
            offset,
            limit,
        };
        self.store
            .select(TRANSACTIONS_COLLECTION, &query)
            .await?
            .into_iter()
            .map(|record| serde_json::from_value(record).map_err(TxIndexError::from))
            .collect()
    }

    pub async fn count_transactions(&self, filters: &[Filter]) -> Result<usize, TxIndexError> {
        Ok(self.store.count(TRANSACTIONS_COLLECTION, filters).await?)
    }

    /// The highest block whose transactions are indexed.
    pub async fn tx_index_last_block(&self) -> Result<i32, TxIndexError> {
        match self.store.get(METADATA_BUCKET, TX_INDEX_LAST_BLOCK_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(0),
        }
    }

    /// Record that transactions are indexed through `height`. Moving the mark
    /// backwards requires [`rollback_tx_index_last_block`](Self::rollback_tx_index_last_block).
    pub async fn save_tx_index_last_block(&self, height: i32) -> Result<(), TxIndexError> {
        let _guard = self.write_lock.lock().await;
        let current = self.tx_index_last_block().await?;
        if height < current {
            return Err(TxIndexError::HeightRegression {
                current,
                requested: height,
            });
        }
        self.store
            .set(METADATA_BUCKET, TX_INDEX_LAST_BLOCK_KEY, json!(height))
            .await?;
        Ok(())
    }

    /// Delete every transaction above `height` (all of them if `height <= 0`)
    /// and set the last indexed block to `height`, in one batch.
    pub async fn rollback_tx_index_last_block(&self, height: i32) -> Result<(), TxIndexError> {
        let _guard = self.write_lock.lock().await;
        let batch = if height <= 0 {
            Batch::new().drop_collection(TRANSACTIONS_COLLECTION)
        } else {
            Batch::new().delete_where(
                TRANSACTIONS_COLLECTION,
                vec![Filter::gt(self.config.height_field.as_str(), height)],
            )
        };
        self.store
            .commit(batch.set(METADATA_BUCKET, TX_INDEX_LAST_BLOCK_KEY, json!(height)))
            .await?;
        info!("Rolled back transaction index to block {}", height);
        Ok(())
    }

    /// Forget transactions mined at `height` or above once the block at
    /// `height` has left the main chain. Blocks indexed past the last indexed
    /// block are covered too. The last indexed block drops to `height - 1` if
    /// it was at or above `height`.
    pub async fn disconnect_block(&self, height: i32) -> Result<(), TxIndexError> {
        let _guard = self.write_lock.lock().await;
        let last_indexed = self.tx_index_last_block().await?;

        let mut batch = Batch::new().delete_where(
            TRANSACTIONS_COLLECTION,
            vec![Filter::gte(self.config.height_field.as_str(), height.max(0))],
        );
        if last_indexed >= height {
            batch = batch.set(METADATA_BUCKET, TX_INDEX_LAST_BLOCK_KEY, json!((height - 1).max(0)));
        }
        self.store.commit(batch).await?;
        info!(height, last_indexed, "Removed transactions of disconnected block");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txindex::{FileStore, MemoryStore};
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct WalletTx {
        hash: String,
        height: i32,
        #[serde(default)]
        label: Option<String>,
    }

    fn tx(hash: &str, height: i32) -> WalletTx {
        WalletTx {
            hash: hash.to_string(),
            height,
            label: None,
        }
    }

    fn config(version: u32) -> TxIndexConfig {
        TxIndexConfig::new(version, "hash", "height")
    }

    async fn indexer() -> TxIndexer<WalletTx, MemoryStore> {
        TxIndexer::open(Arc::new(MemoryStore::new()), config(1)).await.unwrap()
    }

    #[tokio::test]
    async fn rollback_keeps_transactions_at_or_below_height() {
        let indexer = indexer().await;
        for (hash, height) in [("a", 10), ("b", 20), ("c", 30)] {
            assert!(!indexer.index_transaction(tx(hash, height), None).await.unwrap());
        }
        indexer.save_tx_index_last_block(30).await.unwrap();

        indexer.rollback_tx_index_last_block(15).await.unwrap();
        let remaining = indexer.find_transactions(0, 0, None, vec![]).await.unwrap();
        assert_eq!(remaining, vec![tx("a", 10)]);
        assert_eq!(indexer.tx_index_last_block().await.unwrap(), 15);

        // Rolling back again to the same height changes nothing.
        indexer.rollback_tx_index_last_block(15).await.unwrap();
        assert_eq!(indexer.find_transactions(0, 0, None, vec![]).await.unwrap(), remaining);
        assert_eq!(indexer.tx_index_last_block().await.unwrap(), 15);

        indexer.rollback_tx_index_last_block(0).await.unwrap();
        assert_eq!(indexer.count_transactions(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn disconnect_removes_blocks_past_last_indexed() {
        let indexer = indexer().await;
        for (hash, height) in [("u", -1), ("a", 10), ("b", 30), ("live", 31), ("next", 32)] {
            indexer.index_transaction(tx(hash, height), None).await.unwrap();
        }
        indexer.save_tx_index_last_block(30).await.unwrap();

        indexer.disconnect_block(31).await.unwrap();
        assert_eq!(indexer.tx_index_last_block().await.unwrap(), 30);
        let hashes: Vec<String> = indexer
            .find_transactions(0, 0, Some(Sort::ascending("height")), vec![])
            .await
            .unwrap()
            .into_iter()
            .map(|tx| tx.hash)
            .collect();
        assert_eq!(hashes, vec!["u", "a", "b"]);

        indexer.disconnect_block(25).await.unwrap();
        assert_eq!(indexer.tx_index_last_block().await.unwrap(), 24);
        assert!(indexer.find_transaction("hash", "b").await.unwrap().is_none());
        assert!(indexer.find_transaction("hash", "u").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn last_block_cannot_move_backwards() {
        let indexer = indexer().await;
        assert_eq!(indexer.tx_index_last_block().await.unwrap(), 0);

        indexer.save_tx_index_last_block(50).await.unwrap();
        indexer.save_tx_index_last_block(50).await.unwrap();
        assert!(matches!(
            indexer.save_tx_index_last_block(49).await,
            Err(TxIndexError::HeightRegression {
                current: 50,
                requested: 49
            })
        ));
        assert_eq!(indexer.tx_index_last_block().await.unwrap(), 50);
    }

    #[tokio::test]
    async fn version_change_drops_index() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("wallet.db.json");

        {
            let store = Arc::new(FileStore::open(&path).await.unwrap());
            let indexer: TxIndexer<WalletTx, FileStore> = TxIndexer::open(store, config(1)).await.unwrap();
            indexer.index_transaction(tx("a", 10), None).await.unwrap();
            indexer.save_tx_index_last_block(10).await.unwrap();
        }

        // Same version: nothing is dropped.
        let store = Arc::new(FileStore::open(&path).await.unwrap());
        let same: TxIndexer<WalletTx, FileStore> = TxIndexer::open(store, config(1)).await.unwrap();
        assert_eq!(same.count_transactions(&[]).await.unwrap(), 1);
        drop(same);

        let store = Arc::new(FileStore::open(&path).await.unwrap());
        let upgraded: TxIndexer<WalletTx, FileStore> = TxIndexer::open(store, config(2)).await.unwrap();
        assert_eq!(upgraded.count_transactions(&[]).await.unwrap(), 0);
        assert_eq!(upgraded.tx_index_last_block().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reindexed_transaction_is_merged() {
        let indexer = indexer().await;
        let mut labelled = tx("a", -1);
        labelled.label = Some("rent".to_string());
        indexer.index_transaction(labelled, None).await.unwrap();

        let keep_label: &MergeFn<WalletTx> = &|old, mut new| {
            new.label = old.label;
            Ok(new)
        };
        let updated = indexer
            .index_transaction(tx("a", 42), Some(keep_label))
            .await
            .unwrap();
        assert!(updated);

        let stored = indexer.find_transaction("hash", "a").await.unwrap().unwrap();
        assert_eq!(stored.height, 42);
        assert_eq!(stored.label.as_deref(), Some("rent"));
        assert_eq!(indexer.count_transactions(&[]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_merge_keeps_old_record() {
        let indexer = indexer().await;
        indexer.index_transaction(tx("a", -1), None).await.unwrap();

        let reject: &MergeFn<WalletTx> = &|_, _| Err(TxIndexError::Merge("conflict".to_string()));
        assert!(matches!(
            indexer.index_transaction(tx("a", 5), Some(reject)).await,
            Err(TxIndexError::Merge(_))
        ));
        assert_eq!(
            indexer.find_transaction("hash", "a").await.unwrap(),
            Some(tx("a", -1))
        );
    }

    #[tokio::test]
    async fn queries_filter_sort_and_count() {
        let indexer = indexer().await;
        for (hash, height) in [("u", -1), ("a", 10), ("b", 20), ("c", 30)] {
            indexer.index_transaction(tx(hash, height), None).await.unwrap();
        }

        let mined = vec![Filter::gte("height", 0)];
        assert_eq!(indexer.count_transactions(&mined).await.unwrap(), 3);

        let newest = indexer
            .find_transactions(0, 2, Some(Sort::descending("height")), mined)
            .await
            .unwrap();
        assert_eq!(newest, vec![tx("c", 30), tx("b", 20)]);

        assert!(indexer.find_transaction("hash", "zz").await.unwrap().is_none());
    }
}
