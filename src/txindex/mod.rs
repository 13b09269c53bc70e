//! Incremental transaction index.
//!
//! Transactions are stored as JSON records in a [`RecordStore`], keyed by a
//! configurable unique field and carrying a configurable block-height field.
//! Index metadata (format version and last indexed block) lives in the same
//! store's key-value buckets, so a multi-operation [`Batch`] can update records
//! and metadata atomically.
//!
//! Two backends are provided: [`MemoryStore`] and [`FileStore`].

/// Typed user/wallet configuration values
mod config_values;
/// JSON file backend
mod file;
/// The transaction indexer
mod indexer;
/// In-process backend
mod memory;
/// Record filters and sorting
mod query;
/// Storage traits and batches
mod store;

pub use config_values::{ConfigBucket, ConfigValues};
pub use file::FileStore;
pub use indexer::{MergeFn, TxIndexConfig, TxIndexer};
pub use memory::MemoryStore;
pub use query::{Filter, FilterOp, Query, Sort};
pub use store::{Batch, BatchOp, KeyValueStore, RecordStore};

/// Bucket holding index metadata
pub const METADATA_BUCKET: &str = "db_metadata";
/// Metadata key for the transaction format version the index was built with
pub const TX_VERSION_KEY: &str = "tx_version";
/// Metadata key for the last block whose transactions are indexed
pub const TX_INDEX_LAST_BLOCK_KEY: &str = "tx_index_last_block";
/// Collection holding indexed transactions
pub const TRANSACTIONS_COLLECTION: &str = "transactions";

/// Errors raised by store backends
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store corruption: {0}")]
    Corruption(String),
}

/// Errors raised by the transaction indexer
#[derive(Debug, thiserror::Error)]
pub enum TxIndexError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transaction record has no {0:?} field")]
    MissingField(String),

    #[error("Transaction record field {field:?} is invalid: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("current last block is {current}, use rollback to change to {requested}")]
    HeightRegression { current: i32, requested: i32 },

    #[error("tx update error: {0}")]
    Merge(String),
}
