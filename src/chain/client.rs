use super::types::{ChainError, ConnectedPeer, NotificationStream};

/// Peer connection primitives exposed by the chain-sync client.
///
/// Addresses passed to and returned from these methods are resolved
/// `ip:port` strings (or onion addresses), never the user's original text.
#[async_trait::async_trait]
pub trait PeerConnections: Send + Sync {
	/// Ask the client to connect to `addr`. A permanent connection is retried
	/// by the client if it drops.
	async fn connect_node(&self, addr: &str, permanent: bool) -> Result<(), ChainError>;

	/// Disconnect from the peer at `addr`.
	async fn remove_node_by_addr(&self, addr: &str) -> Result<(), ChainError>;

	/// Peers the client is connected to right now.
	fn peers(&self) -> Vec<ConnectedPeer>;
}

/// The chain-sync client collaborator.
///
/// The client is restartable: after `stop` and `wait_for_shutdown` return, a
/// new session may call `start` again and take a fresh notification stream.
#[async_trait::async_trait]
pub trait ChainClient: PeerConnections {
	/// Start the client. Network failures after a successful start are retried
	/// internally by the client.
	async fn start(&self) -> Result<(), ChainError>;

	/// Request the client to stop. Returns immediately.
	fn stop(&self);

	/// Block until the client has fully stopped and closed its notification stream.
	async fn wait_for_shutdown(&self);

	/// Request block connected/disconnected notifications.
	async fn notify_blocks(&self) -> Result<(), ChainError>;

	/// Take the notification stream for the current run of the client.
	fn notifications(&self) -> Result<NotificationStream, ChainError>;
}
