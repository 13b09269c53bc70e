//! Tracking for manual block rescans.

use crate::utils::{format_percentage, format_time_remaining};
use crate::wallet::WalletSyncError;
use crate::wallet::sync::events::{BlocksRescanListener, RescanReport};
use crate::wallet::sync::listeners::ListenerRegistry;
use crate::wallet::sync::progress_reporter::{ProgressLogThrottle, ProgressRecord};

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::info;

/// Tracks the one manual rescan that may run at a time and publishes its
/// progress to rescan listeners.
pub struct RescanTracker {
	listeners: Arc<ListenerRegistry<dyn BlocksRescanListener>>,
	progress: Mutex<Option<ProgressRecord>>,
	log_throttle: ProgressLogThrottle,
}

impl RescanTracker {
	pub fn new(listeners: Arc<ListenerRegistry<dyn BlocksRescanListener>>, log_interval: Duration) -> Self {
		Self {
			listeners,
			progress: Mutex::new(None),
			log_throttle: ProgressLogThrottle::new(log_interval),
		}
	}

	/// Start tracking a rescan from `start_height` to `end_height`.
	pub fn initialize_rescan(&self, start_height: i32, end_height: i32) -> Result<(), WalletSyncError> {
		let mut progress = self.lock();
		if progress.is_some() {
			return Err(WalletSyncError::AlreadyRescanning);
		}
		*progress = Some(ProgressRecord::new(start_height, end_height));
		drop(progress);

		self.log_throttle.reset();
		info!(start_height, end_height, "Rescan started");
		Ok(())
	}

	pub fn is_rescanning(&self) -> bool {
		self.lock().is_some()
	}

	/// Record that the rescan has processed blocks through `height`. Returns
	/// `None` if no rescan is being tracked.
	pub fn publish_rescan_progress(&self, height: i32) -> Option<RescanReport> {
		let report = {
			let mut progress = self.lock();
			let record = progress.as_mut()?;
			record.last_height = height;
			let (percentage, time_remaining) = record.calculate_progress();
			RescanReport {
				start_height: record.start_height,
				end_height: record.target_height,
				scanned_through: record.last_height,
				percentage,
				time_remaining,
			}
		};

		if report.scanned_through >= report.end_height || self.log_throttle.should_log() {
			info!(
				"Rescanning blocks {} complete, remaining {}. {}/{} blocks scanned.",
				format_percentage(report.percentage),
				format_time_remaining(report.time_remaining),
				report.scanned_through,
				report.end_height
			);
		}

		let published = report.clone();
		self.listeners
			.range_async(move |listener| listener.on_blocks_rescan_progress(Some(&published), None));
		Some(report)
	}

	/// Stop tracking the rescan and tell listeners it ended, with `error` if it
	/// failed.
	pub fn rescan_ended(&self, error: Option<WalletSyncError>) {
		if self.lock().take().is_none() {
			return;
		}
		match &error {
			Some(e) => info!("Rescan ended with error: {}", e),
			None => info!("Rescan finished"),
		}

		let error = error.map(Arc::new);
		self.listeners
			.range_async(move |listener| listener.on_blocks_rescan_progress(None, error.as_deref()));
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, Option<ProgressRecord>> {
		self.progress.lock().unwrap_or_else(PoisonError::into_inner)
	}
}
