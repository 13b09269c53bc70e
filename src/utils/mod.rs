//!
//! Utility module for wallet sync.
//!
//! Re-exports formatting helpers used in progress logging.
/// Utility functions for formatting and display
pub mod index;

pub use index::{format_percentage, format_time_remaining};
