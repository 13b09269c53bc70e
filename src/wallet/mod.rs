pub mod engine;
pub mod sync;
pub mod types;

pub use engine::{BlockTransactions, TransactionsInRange, WalletEngine};
pub use sync::SyncOrchestrator;
pub use types::*;
