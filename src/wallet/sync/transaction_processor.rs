use crate::chain::TransactionSummary;
use crate::txindex::{MergeFn, TxIndexError, TxIndexer};
use crate::wallet::sync::events::BlockWithTxs;
use crate::wallet::{TransactionsInRange, WalletSyncError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Turns wallet engine transaction summaries into the caller's indexed
/// record type.
pub trait TxTransformer<T>: Send + Sync {
	/// Build the record for `tx`, mined at `block_height` (-1 when unmined).
	fn transform(&self, block_height: i32, tx: &TransactionSummary) -> Result<T, WalletSyncError>;

	/// Combine the indexed version of a transaction with a newly transformed
	/// one. The default keeps the new record.
	fn merge(&self, _old: T, new: T) -> Result<T, TxIndexError> {
		Ok(new)
	}
}

/// Transforms wallet transactions and writes them to the transaction index.
pub struct TransactionProcessor<T> {
	indexer: Arc<TxIndexer<T>>,
	transformer: Arc<dyn TxTransformer<T>>,
}

impl<T> Clone for TransactionProcessor<T> {
	fn clone(&self) -> Self {
		Self {
			indexer: self.indexer.clone(),
			transformer: self.transformer.clone(),
		}
	}
}

impl<T> TransactionProcessor<T>
where
	T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
	pub fn new(indexer: Arc<TxIndexer<T>>, transformer: Arc<dyn TxTransformer<T>>) -> Self {
		Self { indexer, transformer }
	}

	pub fn indexer(&self) -> &Arc<TxIndexer<T>> {
		&self.indexer
	}

	/// Transform `tx` and index it, returning the indexed record.
	pub async fn transform_and_index(&self, block_height: i32, tx: &TransactionSummary) -> Result<T, WalletSyncError> {
		let record = self.transformer.transform(block_height, tx).map_err(|e| {
			error!("[INDEX_TX] Failed to transform transaction {}: {}", tx.hash, e);
			e
		})?;

		let transformer = self.transformer.clone();
		let merge: &MergeFn<T> = &move |old, new| transformer.merge(old, new);
		let updated = self.indexer.index_transaction(record.clone(), Some(merge)).await?;

		if updated {
			debug!("[{}] Transaction updated {}", block_height, tx.hash);
		} else {
			debug!("[{}] New transaction added {}", block_height, tx.hash);
		}
		Ok(record)
	}

	/// Index a block's worth of transactions. Transactions that fail to
	/// index are logged and left out of the returned block.
	pub async fn index_block(&self, height: i32, hash: &str, txs: &[TransactionSummary]) -> (BlockWithTxs<T>, usize) {
		let mut indexed = Vec::with_capacity(txs.len());
		let mut failed = 0;
		for tx in txs {
			match self.transform_and_index(height, tx).await {
				Ok(record) => indexed.push(record),
				Err(e) => {
					error!("Error indexing tx {}: {}", tx.hash, e);
					failed += 1;
				}
			}
		}
		let block = BlockWithTxs {
			height,
			hash: hash.to_string(),
			txs: indexed,
		};
		(block, failed)
	}

	/// Index everything the wallet engine returned for a height range:
	/// unmined transactions at height -1, then each block in order. Stops
	/// early with what was indexed so far if `cancel` fires.
	pub async fn index_range(&self, range: &TransactionsInRange, cancel: &CancellationToken) -> IndexedRange<T> {
		let mut result = IndexedRange {
			unmined: Vec::with_capacity(range.unmined.len()),
			blocks: Vec::with_capacity(range.mined.len()),
			failed: 0,
		};

		for tx in &range.unmined {
			if cancel.is_cancelled() {
				return result;
			}
			match self.transform_and_index(-1, tx).await {
				Ok(record) => result.unmined.push(record),
				Err(e) => {
					error!("Error indexing tx {}: {}", tx.hash, e);
					result.failed += 1;
				}
			}
		}

		for block in &range.mined {
			if cancel.is_cancelled() {
				break;
			}
			let (indexed, failed) = self.index_block(block.height, &block.hash, &block.transactions).await;
			result.blocks.push(indexed);
			result.failed += failed;
		}

		result
	}
}

/// Outcome of indexing a height range
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedRange<T> {
	pub unmined: Vec<T>,
	pub blocks: Vec<BlockWithTxs<T>>,
	pub failed: usize,
}

impl<T> IndexedRange<T> {
	pub fn indexed(&self) -> usize {
		self.unmined.len() + self.blocks.iter().map(|b| b.txs.len()).sum::<usize>()
	}
}
