use super::StoreError;
use super::store::KeyValueStore;

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::error;

/// Buckets holding typed configuration values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigBucket {
	/// Settings that apply to the user across wallets
	User,
	/// Settings for one wallet
	Wallet,
}

impl ConfigBucket {
	pub fn name(self) -> &'static str {
		match self {
			ConfigBucket::User => "user_config",
			ConfigBucket::Wallet => "wallet_config",
		}
	}
}

/// Typed access to configuration values in a key-value store.
pub struct ConfigValues<S: ?Sized> {
	store: Arc<S>,
}

impl<S: KeyValueStore + ?Sized> ConfigValues<S> {
	pub fn new(store: Arc<S>) -> Self {
		Self { store }
	}

	pub async fn save_value<V: Serialize + ?Sized>(
		&self,
		bucket: ConfigBucket,
		key: &str,
		value: &V,
	) -> Result<(), StoreError> {
		let value = serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
		self.store.set(bucket.name(), key, value).await
	}

	/// The value stored under `key`, or `None` if there isn't one.
	pub async fn read_value<V: DeserializeOwned>(&self, bucket: ConfigBucket, key: &str) -> Result<Option<V>, StoreError> {
		match self.store.get(bucket.name(), key).await? {
			Some(value) => serde_json::from_value(value)
				.map(Some)
				.map_err(|e| StoreError::Serialization(e.to_string())),
			None => Ok(None),
		}
	}

	/// The value stored under `key`, or `default` if it is missing or can't be
	/// read. Read failures are logged.
	pub async fn read_value_or<V: DeserializeOwned>(&self, bucket: ConfigBucket, key: &str, default: V) -> V {
		match self.read_value(bucket, key).await {
			Ok(Some(value)) => value,
			Ok(None) => default,
			Err(e) => {
				error!("Error reading config value for key {} in {}: {}", key, bucket.name(), e);
				default
			}
		}
	}

	pub async fn delete_value(&self, bucket: ConfigBucket, key: &str) -> Result<(), StoreError> {
		self.store.delete(bucket.name(), key).await
	}

	pub async fn save_user_config_value<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> Result<(), StoreError> {
		self.save_value(ConfigBucket::User, key, value).await
	}

	pub async fn read_user_config_value<V: DeserializeOwned>(&self, key: &str, default: V) -> V {
		self.read_value_or(ConfigBucket::User, key, default).await
	}

	pub async fn delete_user_config_value(&self, key: &str) -> Result<(), StoreError> {
		self.delete_value(ConfigBucket::User, key).await
	}

	pub async fn save_wallet_config_value<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> Result<(), StoreError> {
		self.save_value(ConfigBucket::Wallet, key, value).await
	}

	pub async fn read_wallet_config_value<V: DeserializeOwned>(&self, key: &str, default: V) -> V {
		self.read_value_or(ConfigBucket::Wallet, key, default).await
	}

	pub async fn delete_wallet_config_value(&self, key: &str) -> Result<(), StoreError> {
		self.delete_value(ConfigBucket::Wallet, key).await
	}
}
