//! Peer management for sync sessions.
//!
//! Users refer to peers by whatever address they typed (`node.example:8333`,
//! `localhost`, an onion address). The chain client only knows resolved
//! `ip:port` addresses, so the [`PeerManager`] keeps the mapping between the
//! two, refuses to track two addresses that resolve to the same node, and
//! persists user-added peers across restarts with a [`PeerStore`].

/// The peer manager
mod manager;
/// Peer file persistence
mod persist;
/// Host name resolution
mod resolve;

pub use manager::{PeerManager, PeerView};
pub use persist::{PeerSource, PeerStore};
pub use resolve::{resolve_address, split_host_port};

use crate::chain::ChainError;

/// Errors returned by peer management
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("failed to resolve address {addr}: {reason}")]
    Resolve { addr: String, reason: String },

    #[error("{existing} and {added} resolve to the same node")]
    DuplicateNode { existing: String, added: String },

    #[error("peer not found: {0}")]
    NotFound(String),

    #[error("peer file error: {0}")]
    Persist(String),

    #[error(transparent)]
    Chain(#[from] ChainError),
}
