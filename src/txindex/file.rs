use super::StoreError;
use super::query::{Filter, Query};
use super::store::{Batch, Database, KeyValueStore, RecordStore};

use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A store kept in memory and written to a single JSON file on every commit.
///
/// Commits write the whole database to a temporary file and rename it over
/// the previous one, so the file always holds the state after some complete
/// batch.
pub struct FileStore {
    path: PathBuf,
    db: RwLock<Database>,
}

impl FileStore {
    /// Open the store at `path`, starting empty if the file doesn't exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let db = match tokio::fs::read_to_string(&path).await {
            Ok(json) => serde_json::from_str(&json).map_err(|e| {
                StoreError::Corruption(format!("Failed to parse store file {:?}: {}", path, e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No store file at {:?}, starting empty", path);
                Database::default()
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        Ok(Self {
            path,
            db: RwLock::new(db),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, db: &Database) -> Result<(), StoreError> {
        let json = serde_json::to_vec(db).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Wrote store file {:?}", self.path);
        Ok(())
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.db.read().await.get(bucket, key))
    }

    async fn commit(&self, batch: Batch) -> Result<(), StoreError> {
        let mut db = self.db.write().await;
        let next = db.with_batch(batch)?;
        self.persist(&next).await?;
        *db = next;
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecordStore for FileStore {
    async fn find_one(&self, collection: &str, field: &str, value: &Value) -> Result<Option<Value>, StoreError> {
        Ok(self.db.read().await.find_one(collection, field, value))
    }

    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        Ok(self.db.read().await.select(collection, query))
    }

    async fn count(&self, collection: &str, filters: &[Filter]) -> Result<usize, StoreError> {
        Ok(self.db.read().await.count(collection, filters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn commits_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("wallet.db.json");

        let store = FileStore::open(&path).await.unwrap();
        store
            .commit(
                Batch::new()
                    .set("db_metadata", "tx_version", json!(3))
                    .save("transactions", "hash", json!({"hash": "a", "height": 5})),
            )
            .await
            .unwrap();
        drop(store);

        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(reopened.get("db_metadata", "tx_version").await.unwrap(), Some(json!(3)));
        assert_eq!(reopened.count("transactions", &[]).await.unwrap(), 1);
        assert!(!temp_dir.path().join("wallet.db.json.tmp").exists());
    }

    #[tokio::test]
    async fn failed_commit_changes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("wallet.db.json");
        let store = FileStore::open(&path).await.unwrap();
        store.set("user_config", "theme", json!("dark")).await.unwrap();

        let bad = Batch::new()
            .delete("user_config", "theme")
            .save("transactions", "hash", json!({"height": 1}));
        assert!(store.commit(bad).await.is_err());

        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(reopened.get("user_config", "theme").await.unwrap(), Some(json!("dark")));
        assert_eq!(store.get("user_config", "theme").await.unwrap(), Some(json!("dark")));
    }

    #[tokio::test]
    async fn unreadable_file_is_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("wallet.db.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(FileStore::open(&path).await, Err(StoreError::Corruption(_))));
    }
}
