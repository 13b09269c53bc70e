//! Chain-sync client integration.
//!
//! The chain-sync client is an external collaborator. This module defines the
//! trait the orchestrator drives it through, the peer-connection primitives the
//! peer manager needs, and the notification variants the client streams while a
//! session is active.

/// Chain client and peer connection traits
mod client;
/// Notification and transaction summary types
mod types;

pub use client::{ChainClient, PeerConnections};
pub use types::*;
