//! Listener traits and report types for sync notifications.
//!
//! Listeners are registered with the orchestrator under a caller-chosen id and
//! are notified asynchronously: each notification runs in its own task, so a
//! slow listener never holds up sync or other listeners. See
//! [`ListenerRegistry`](super::ListenerRegistry).

use crate::wallet::WalletSyncError;

use std::fmt;
use std::time::Duration;

/// The phases of a sync session, in the order they are normally visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SyncStage {
    /// No session has reported a start yet.
    #[default]
    Invalid,
    HeadersFetch,
    CFiltersFetch,
    HeadersRescan,
    AddressDiscovery,
    Complete,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStage::Invalid => "invalid",
            SyncStage::HeadersFetch => "fetching headers",
            SyncStage::CFiltersFetch => "fetching cfilters",
            SyncStage::HeadersRescan => "rescanning",
            SyncStage::AddressDiscovery => "discovering addresses",
            SyncStage::Complete => "sync completed",
        };
        f.write_str(name)
    }
}

/// A normalized progress report for the current stage.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncProgressReport {
    pub stage: SyncStage,
    pub current_height: i32,
    pub target_height: i32,
    /// Percentage between 0 and 100.
    pub percentage: f64,
    pub time_remaining: Duration,
}

/// Progress of a manual rescan.
#[derive(Debug, Clone, PartialEq)]
pub struct RescanReport {
    pub start_height: i32,
    pub end_height: i32,
    pub scanned_through: i32,
    pub percentage: f64,
    pub time_remaining: Duration,
}

/// A block and the wallet transactions it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockWithTxs<T> {
    pub height: i32,
    pub hash: String,
    pub txs: Vec<T>,
}

/// Receives sync progress for a wallet.
pub trait SyncProgressListener: Send + Sync {
    fn on_sync_started(&self);

    fn on_peer_connected_or_disconnected(&self, _connected_peers: u32) {}

    fn on_progress(&self, report: &SyncProgressReport);

    /// The wallet has caught up with the chain. Sync keeps running after this;
    /// [`on_sync_ended`](Self::on_sync_ended) reports the session stopping.
    fn on_sync_completed(&self);

    /// The session has stopped. `error` is set if it stopped because of a
    /// failure rather than a stop request.
    fn on_sync_ended(&self, _error: Option<&WalletSyncError>) {}
}

/// Receives transactions and blocks processed after the wallet caught up.
pub trait TxAndBlockNtfnListener<T>: Send + Sync {
    fn on_tx_or_block_update(&self, unmined_txs: &[T], blocks: &[BlockWithTxs<T>]);
}

/// Receives progress for manual rescans.
pub trait BlocksRescanListener: Send + Sync {
    /// `None` means the rescan has ended; check `error`.
    fn on_blocks_rescan_progress(&self, report: Option<&RescanReport>, error: Option<&WalletSyncError>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_order_forward() {
        assert!(SyncStage::Invalid < SyncStage::HeadersFetch);
        assert!(SyncStage::HeadersFetch < SyncStage::CFiltersFetch);
        assert!(SyncStage::AddressDiscovery < SyncStage::Complete);
        assert_eq!(SyncStage::HeadersRescan.to_string(), "rescanning");
    }
}
