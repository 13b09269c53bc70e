//! Types exchanged with the chain-sync client.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// The receiving half of the chain client's single notification stream.
pub type NotificationStream = mpsc::Receiver<ChainNotification>;

/// A wallet-relevant transaction as summarized by the wallet engine.
///
/// The summary is opaque to this crate: it is handed to a
/// [`TxTransformer`](crate::wallet::sync::TxTransformer) which turns it into the
/// caller's indexed record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    /// The transaction hash.
    pub hash: String,
    /// Unix timestamp at which the wallet first saw the transaction.
    pub timestamp: i64,
    /// Serialized transaction bytes.
    #[serde(default)]
    pub raw: Vec<u8>,
}

impl TransactionSummary {
    pub fn raw_hex(&self) -> String {
        hex::encode(&self.raw)
    }
}

/// Notifications yielded by the chain-sync client while it is running.
///
/// The client serializes these into one stream; the multiplexer republishes
/// them to every consumer in the order they were received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainNotification {
    /// A block was connected to the main chain.
    BlockConnected {
        height: i32,
        hash: String,
        /// Transactions in the block that are relevant to the wallet.
        relevant_txs: Vec<TransactionSummary>,
    },
    /// A block was disconnected from the main chain (reorg).
    BlockDisconnected { height: i32, hash: String },
    /// A rescan has processed blocks through `height`.
    RescanProgress { height: i32 },
    /// A rescan (or the initial catch-up) finished at `height`.
    RescanFinished { height: i32 },
}

impl ChainNotification {
    /// The block height this notification refers to.
    pub fn height(&self) -> i32 {
        match self {
            ChainNotification::BlockConnected { height, .. }
            | ChainNotification::BlockDisconnected { height, .. }
            | ChainNotification::RescanProgress { height }
            | ChainNotification::RescanFinished { height } => *height,
        }
    }
}

/// A peer the chain client is currently connected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedPeer {
    /// The resolved `ip:port` (or onion address) of the peer.
    pub addr: String,
    /// Height the peer advertised when the connection was established.
    pub starting_height: i32,
    /// Most recent block height announced by the peer.
    pub last_block: i32,
}

/// Error types reported by the chain-sync client collaborator
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("couldn't start chain client: {0}")]
    StartFailed(String),

    #[error("notification subscription failed: {0}")]
    NotificationsUnavailable(String),

    #[error("connect to {addr} failed: {reason}")]
    ConnectFailed { addr: String, reason: String },

    #[error("disconnect from {addr} failed: {reason}")]
    DisconnectFailed { addr: String, reason: String },

    #[error("chain client error: {0}")]
    Other(String),
}
