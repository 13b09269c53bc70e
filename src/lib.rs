//! Network synchronization core for SPV-style wallets.
//!
//! The crate coordinates a wallet's transition between offline and
//! network-synchronized states. The wallet engine and the chain-sync client
//! are external collaborators reached through the traits in [`wallet`] and
//! [`chain`]; everything that needs concurrency coordination lives here:
//!
//! - [`wallet::sync::ListenerRegistry`]: keyed listeners with fire-and-forget dispatch
//! - [`wallet::sync::NotificationMultiplexer`]: one upstream stream, many consumers
//! - [`peers::PeerManager`]: resolution, dedup, persistence and (re)connection of peers
//! - [`wallet::sync::SyncProgressReporter`]: stage-based progress reporting
//! - [`wallet::sync::SyncOrchestrator`]: the start/stop lifecycle of a sync session
//! - [`txindex::TxIndexer`]: incremental transaction indexing with rollback

pub mod chain;
pub mod config;
pub mod logging;
pub mod peers;
pub mod txindex;
pub mod utils;
pub mod wallet;

pub use config::SyncConfig;
pub use wallet::WalletSyncError;
pub use wallet::sync::SyncOrchestrator;
