//! Peer persistence for saving and loading user peers

use super::PeerError;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where a tracked peer came from. Stored in the peers file as its integer tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum PeerSource {
	/// Added by the user
	Added = 0,
	/// From the configured default peers
	Default = 1,
	/// Found by the chain client; never persisted
	Discovered = 2,
}

impl From<PeerSource> for u16 {
	fn from(source: PeerSource) -> u16 {
		source as u16
	}
}

impl TryFrom<u16> for PeerSource {
	type Error = String;

	fn try_from(value: u16) -> Result<Self, Self::Error> {
		match value {
			0 => Ok(PeerSource::Added),
			1 => Ok(PeerSource::Default),
			2 => Ok(PeerSource::Discovered),
			other => Err(format!("unknown peer source {}", other)),
		}
	}
}

/// A JSON file mapping peer addresses (as the user typed them) to their source.
#[derive(Debug, Clone)]
pub struct PeerStore {
	path: PathBuf,
}

impl PeerStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Load saved peers. A missing file is an empty set of peers.
	pub async fn load(&self) -> Result<BTreeMap<String, PeerSource>, PeerError> {
		match tokio::fs::read_to_string(&self.path).await {
			Ok(json) => {
				let peers: BTreeMap<String, PeerSource> = serde_json::from_str(&json).map_err(|e| {
					PeerError::Persist(format!("Failed to parse peers file {:?}: {}", self.path, e))
				})?;
				debug!("Loaded {} saved peers from {:?}", peers.len(), self.path);
				Ok(peers)
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!("No saved peers file found at {:?}", self.path);
				Ok(BTreeMap::new())
			}
			Err(e) => Err(PeerError::Persist(format!(
				"Failed to read peers file {:?}: {}",
				self.path, e
			))),
		}
	}

	/// Replace the file's contents with `peers`.
	pub async fn save(&self, peers: &BTreeMap<String, PeerSource>) -> Result<(), PeerError> {
		let json = serde_json::to_string(peers)
			.map_err(|e| PeerError::Persist(format!("Failed to serialize peers: {}", e)))?;

		tokio::fs::write(&self.path, json).await.map_err(|e| {
			PeerError::Persist(format!("Failed to write peers file {:?}: {}", self.path, e))
		})?;

		debug!("Saved {} peers to {:?}", peers.len(), self.path);
		Ok(())
	}

	/// Delete the peers file
	pub async fn clear(&self) -> Result<(), PeerError> {
		match tokio::fs::remove_file(&self.path).await {
			Ok(_) => {
				info!("Cleared peer store at {:?}", self.path);
				Ok(())
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(PeerError::Persist(e.to_string())),
		}
	}
}
