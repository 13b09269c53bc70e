use crate::chain::ChainError;
use crate::peers::PeerError;
use crate::txindex::TxIndexError;

use serde::{Deserialize, Serialize};

/// Height and hash of a block known to the wallet engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStamp {
	pub height: i32,
	pub hash: String,
}

/// Crate-level error for sync session management
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum WalletSyncError {
	#[error("wallet is already synchronized to the network")]
	AlreadySyncing,

	#[error("wallet is not synchronizing with the network")]
	NotSyncing,

	#[error("already rescanning")]
	AlreadyRescanning,

	#[error("wallet isn't synced")]
	WalletNotSynced,

	#[error("Chain client error: {0}")]
	Chain(#[from] ChainError),

	#[error("Peer error: {0}")]
	Peer(#[from] PeerError),

	#[error("Transaction index error: {0}")]
	TxIndex(#[from] TxIndexError),

	#[error("Wallet error: {0}")]
	Wallet(String),

	#[error("Config error: {0}")]
	Config(String),

	#[error("Chain client stopped unexpectedly")]
	ChainClientStopped,

	#[error("Sync error: {0}")]
	SyncError(String),
}
