//! Sync configuration.

use crate::wallet::WalletSyncError;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for sync sessions and the components they drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
	/// Port used for peer addresses that don't specify one
	pub default_port: String,
	/// Peers to connect to when a session is started without explicit peers
	pub default_peers: Vec<String>,
	/// Minimum time between two progress log lines
	pub progress_log_interval_secs: u64,
	/// How often to re-check whether the wallet engine reports chain-synced
	pub chain_synced_poll_interval_ms: u64,
	/// Channel depth for non-default notification subscribers
	pub subscriber_capacity: usize,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			default_port: "8333".to_string(),
			default_peers: Vec::new(),
			progress_log_interval_secs: 3,
			chain_synced_poll_interval_ms: 100,
			subscriber_capacity: 1,
		}
	}
}

impl SyncConfig {
	/// Load a config from a JSON file. Missing fields take their defaults.
	pub fn from_file(path: &Path) -> Result<Self, WalletSyncError> {
		let content = std::fs::read_to_string(path).map_err(|e| {
			WalletSyncError::Config(format!("Failed to read config file {:?}: {}", path, e))
		})?;
		let config: SyncConfig = serde_json::from_str(&content).map_err(|e| {
			WalletSyncError::Config(format!("Failed to parse config file {:?}: {}", path, e))
		})?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), WalletSyncError> {
		if self.default_port.parse::<u16>().is_err() {
			return Err(WalletSyncError::Config(format!(
				"invalid default port {:?}",
				self.default_port
			)));
		}
		if self.progress_log_interval_secs == 0 {
			return Err(WalletSyncError::Config(
				"progress log interval must be non-zero".to_string(),
			));
		}
		if self.chain_synced_poll_interval_ms == 0 {
			return Err(WalletSyncError::Config(
				"chain synced poll interval must be non-zero".to_string(),
			));
		}
		if self.subscriber_capacity == 0 {
			return Err(WalletSyncError::Config(
				"subscriber capacity must be non-zero".to_string(),
			));
		}
		Ok(())
	}

	pub fn progress_log_interval(&self) -> Duration {
		Duration::from_secs(self.progress_log_interval_secs)
	}

	pub fn chain_synced_poll_interval(&self) -> Duration {
		Duration::from_millis(self.chain_synced_poll_interval_ms)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn default_config_is_valid() {
		assert!(SyncConfig::default().validate().is_ok());
	}

	#[test]
	fn rejects_bad_port_and_zero_intervals() {
		let config = SyncConfig { default_port: "eighty".to_string(), ..Default::default() };
		assert!(matches!(config.validate(), Err(WalletSyncError::Config(_))));

		let config = SyncConfig { progress_log_interval_secs: 0, ..Default::default() };
		assert!(config.validate().is_err());

		let config = SyncConfig { subscriber_capacity: 0, ..Default::default() };
		assert!(config.validate().is_err());
	}

	#[test]
	fn partial_file_takes_defaults() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("sync.json");
		std::fs::write(&path, r#"{"default_port": "18333", "default_peers": ["node.example:18333"]}"#)
			.unwrap();

		let config = SyncConfig::from_file(&path).unwrap();
		assert_eq!(config.default_port, "18333");
		assert_eq!(config.default_peers, vec!["node.example:18333".to_string()]);
		assert_eq!(config.progress_log_interval(), Duration::from_secs(3));
	}
}
