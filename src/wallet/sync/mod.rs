//! Wallet Synchronization Module
//!
//! This module provides the core logic for keeping a wallet synchronized with
//! the network through an external chain-sync client. It is composed of
//! several submodules, each responsible for one aspect of the sync process:
//!
//! - `orchestrator`: The entry point. Owns the session lifecycle and wires all other components together.
//! - `session`: The non-reentrant session state machine (`Idle` / `Active`).
//! - `multiplexer`: Republishes the chain client's single notification stream to many consumers.
//! - `listeners`: Keyed listener registries with fire-and-forget dispatch and a drain barrier.
//! - `events`: Listener traits, sync stages and report types.
//! - `progress_reporter`: Converts block and rescan events into per-stage progress reports.
//! - `rescan`: Tracks manual rescans and reports their progress.
//! - `transaction_processor`: Transforms wallet transactions and writes them to the transaction index.
//!
//! Listener notifications never block sync: each one runs in its own task.
//! Callers that need to observe every notification before moving on can wait
//! on the registries' drain barrier.

/// Listener traits, stages and reports
pub mod events;
/// Keyed listener registries
pub mod listeners;
/// Notification fan-out
pub mod multiplexer;
/// Main coordinator for the wallet sync process
pub mod orchestrator;
/// Stage-based progress reporting
pub mod progress_reporter;
/// Manual rescan tracking
pub mod rescan;
/// The sync session state machine
pub mod session;
/// Transaction transformation and indexing
pub mod transaction_processor;

pub use events::*;
pub use listeners::{ListenerError, ListenerRegistry};
pub use multiplexer::{DefaultStream, NotificationMultiplexer, PendingQueue};
pub use orchestrator::SyncOrchestrator;
pub use progress_reporter::{ProgressError, ProgressLogThrottle, ProgressRecord, SyncProgressReporter};
pub use rescan::RescanTracker;
pub use session::{SessionHandle, SyncSession};
pub use transaction_processor::{IndexedRange, TransactionProcessor, TxTransformer};
