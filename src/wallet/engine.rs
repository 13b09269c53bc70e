//! The wallet engine collaborator.
//!
//! Key material, address management, signing and UTXO selection are the
//! engine's business. Sync only needs to know whether the engine considers
//! itself caught up, where its chain tip is, which transactions it holds for a
//! height range, and how to attach it to (and detach it from) a chain client.

use crate::chain::{ChainClient, TransactionSummary};
use crate::wallet::{BlockStamp, WalletSyncError};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Transactions mined in one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockTransactions {
    pub height: i32,
    pub hash: String,
    pub transactions: Vec<TransactionSummary>,
}

/// Result of listing wallet transactions for a height range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionsInRange {
    pub unmined: Vec<TransactionSummary>,
    pub mined: Vec<BlockTransactions>,
}

impl TransactionsInRange {
    pub fn len(&self) -> usize {
        self.unmined.len() + self.mined.iter().map(|b| b.transactions.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
pub trait WalletEngine: Send + Sync {
    /// Whether the engine has processed the chain up to the client's tip.
    fn chain_synced(&self) -> bool;

    /// The engine's current best block.
    async fn best_block(&self) -> Result<BlockStamp, WalletSyncError>;

    /// List wallet transactions mined between `from` and `to` (inclusive) along
    /// with all unmined transactions. Listing stops early if `cancel` fires.
    async fn transactions(
        &self,
        from: i32,
        to: i32,
        cancel: &CancellationToken,
    ) -> Result<TransactionsInRange, WalletSyncError>;

    /// Rescan the chain from `from`, returning once the engine has finished.
    async fn rescan(&self, from: i32) -> Result<(), WalletSyncError>;

    /// Attach the engine to a started chain client.
    fn synchronize(&self, client: Arc<dyn ChainClient>);

    /// Detach the engine from its chain client so the client can be stopped.
    /// Features that don't need the network keep working afterwards.
    async fn desynchronize(&self);

    fn account_discovery_required(&self) -> bool {
        false
    }

    fn mark_account_discovery_complete(&self) {}
}
