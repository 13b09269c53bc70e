use super::{PeerError, PeerSource, PeerStore, resolve_address};
use crate::chain::PeerConnections;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
struct TrackedPeer {
	source: PeerSource,
	/// `None` when the address could not be resolved on initial load.
	resolved: Option<String>,
}

/// A tracked peer as shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerView {
	/// The address as the user (or configuration) supplied it
	pub addr: String,
	pub source: PeerSource,
	pub resolved: Option<String>,
	/// Whether the chain client is connected to this peer right now
	pub connected: bool,
}

/// Tracks the peers a wallet connects to.
///
/// The peer map is only locked for in-memory reads and updates. Name
/// resolution, peer file I/O and chain client calls all happen outside it.
pub struct PeerManager<C: ?Sized> {
	client: Arc<C>,
	default_port: String,
	default_peers: Vec<String>,
	store: PeerStore,
	peers: Mutex<HashMap<String, TrackedPeer>>,
	/// Serializes read-modify-write cycles on the peers file.
	file_lock: tokio::sync::Mutex<()>,
}

impl<C: PeerConnections + ?Sized> PeerManager<C> {
	pub fn new(
		client: Arc<C>,
		default_peers: Vec<String>,
		peers_file: impl Into<PathBuf>,
		default_port: impl Into<String>,
	) -> Self {
		Self {
			client,
			default_port: default_port.into(),
			default_peers,
			store: PeerStore::new(peers_file),
			peers: Mutex::new(HashMap::new()),
			file_lock: tokio::sync::Mutex::new(()),
		}
	}

	/// Track a user-supplied peer, save it to the peers file and connect to
	/// it unless the client is already connected.
	pub async fn add_peer(&self, addr: &str) -> Result<(), PeerError> {
		self.add(addr, PeerSource::Added, false).await
	}

	/// Stop tracking a peer, drop it from the peers file and disconnect from it
	/// if connected.
	pub async fn remove_peer(&self, addr: &str) -> Result<(), PeerError> {
		let removed = self
			.lock_peers()
			.remove(addr)
			.ok_or_else(|| PeerError::NotFound(addr.to_string()))?;

		if let Err(e) = self.update_saved_peers(|saved| saved.remove(addr).is_some()).await {
			error!("Failed to delete peer {} from saved peers file: {}", addr, e);
		}

		if let Some(resolved) = removed.resolved {
			if self.connected_addrs().contains(&resolved) {
				self.client.remove_node_by_addr(&resolved).await?;
			}
		}
		info!("Removed peer {}", addr);
		Ok(())
	}

	/// Connect to the default peers and then to the peers saved in the peers
	/// file. Individual failures are logged and skipped.
	pub async fn connect_to_initial_peers(&self) {
		for addr in &self.default_peers {
			if let Err(e) = self.add(addr, PeerSource::Default, true).await {
				error!("Failed to add default peer {}: {}", addr, e);
			}
		}

		let saved = {
			let _guard = self.file_lock.lock().await;
			self.store.load().await
		};
		let saved = match saved {
			Ok(saved) => saved,
			Err(e) => {
				error!("Failed to load saved peers from file: {}", e);
				return;
			}
		};

		for (addr, source) in saved {
			if source == PeerSource::Discovered {
				continue;
			}
			if let Err(e) = self.add(&addr, source, true).await {
				error!("Failed to add peer {}: {}", addr, e);
			}
		}
	}

	/// All tracked peers, sorted by address.
	pub fn peers(&self) -> Vec<PeerView> {
		let connected = self.connected_addrs();
		let mut views: Vec<PeerView> = self
			.lock_peers()
			.iter()
			.map(|(addr, peer)| PeerView {
				addr: addr.clone(),
				source: peer.source,
				connected: peer
					.resolved
					.as_ref()
					.is_some_and(|resolved| connected.contains(resolved)),
				resolved: peer.resolved.clone(),
			})
			.collect();
		views.sort_by(|a, b| a.addr.cmp(&b.addr));
		views
	}

	/// The highest block announced by any connected peer, or 0 with no peers.
	pub fn best_peer_height(&self) -> i32 {
		self.client
			.peers()
			.iter()
			.map(|peer| peer.last_block)
			.max()
			.unwrap_or(0)
			.max(0)
	}

	pub fn connected_peer_count(&self) -> usize {
		self.client.peers().len()
	}

	async fn add(&self, addr: &str, source: PeerSource, initial_load: bool) -> Result<(), PeerError> {
		let resolved = match resolve_address(addr, &self.default_port).await {
			Ok(resolved) => resolved,
			Err(e) => {
				if initial_load {
					// Keep it so the user can see the wallet couldn't reach it.
					self.lock_peers().insert(
						addr.to_string(),
						TrackedPeer {
							source,
							resolved: None,
						},
					);
				}
				return Err(e);
			}
		};

		{
			let mut peers = self.lock_peers();
			if let Some((existing, _)) = peers
				.iter()
				.find(|(_, peer)| peer.resolved.as_deref() == Some(resolved.as_str()))
			{
				return Err(PeerError::DuplicateNode {
					existing: existing.clone(),
					added: addr.to_string(),
				});
			}
			peers.insert(
				addr.to_string(),
				TrackedPeer {
					source,
					resolved: Some(resolved.clone()),
				},
			);
		}
		debug!("Tracking peer {} at {}", addr, resolved);

		if !initial_load {
			let addr_owned = addr.to_string();
			if let Err(e) = self
				.update_saved_peers(move |saved| {
					saved.insert(addr_owned, source);
					true
				})
				.await
			{
				error!("Failed to add peer {} to saved peers file: {}", addr, e);
			}
		}

		if self.connected_addrs().contains(&resolved) {
			return Ok(());
		}
		self.client.connect_node(&resolved, true).await?;
		info!("Connecting to peer {} ({})", addr, resolved);
		Ok(())
	}

	async fn update_saved_peers<F>(&self, update: F) -> Result<(), PeerError>
	where
		F: FnOnce(&mut BTreeMap<String, PeerSource>) -> bool,
	{
		let _guard = self.file_lock.lock().await;
		let mut saved = self.store.load().await?;
		if update(&mut saved) {
			self.store.save(&saved).await?;
		} else {
			debug!("Peer not present in saved peers file {:?}", self.store.path());
		}
		Ok(())
	}

	fn connected_addrs(&self) -> HashSet<String> {
		self.client.peers().into_iter().map(|peer| peer.addr).collect()
	}

	fn lock_peers(&self) -> std::sync::MutexGuard<'_, HashMap<String, TrackedPeer>> {
		self.peers.lock().unwrap_or_else(PoisonError::into_inner)
	}
}
