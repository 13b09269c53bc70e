//! The non-reentrant sync session.
//!
//! At most one session is live per orchestrator. [`SyncSession::begin`] moves
//! `Idle -> Active` and hands back a [`SessionHandle`] owned by the session's
//! coordination task. Dropping (or [`end`](SessionHandle::end)ing) the handle
//! moves the state back to `Idle` and then fires the ended signal, so a caller
//! woken by [`SyncSession::wait_for_stop`] can start a new session right away.

use crate::wallet::WalletSyncError;

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

enum SessionState {
	Idle,
	Active {
		cancel: CancellationToken,
		ended: watch::Receiver<bool>,
		stop_requested: bool,
	},
}

/// Guards the single live sync session.
pub struct SyncSession {
	state: Mutex<SessionState>,
}

impl Default for SyncSession {
	fn default() -> Self {
		Self::new()
	}
}

impl SyncSession {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(SessionState::Idle),
		}
	}

	/// Open a session whose cancellation token is a child of `parent`.
	pub fn begin(self: &Arc<Self>, parent: &CancellationToken) -> Result<SessionHandle, WalletSyncError> {
		let mut state = self.lock();
		if matches!(*state, SessionState::Active { .. }) {
			return Err(WalletSyncError::AlreadySyncing);
		}

		let cancel = parent.child_token();
		let (ended_tx, ended_rx) = watch::channel(false);
		*state = SessionState::Active {
			cancel: cancel.clone(),
			ended: ended_rx,
			stop_requested: false,
		};
		debug!("Sync session started");

		Ok(SessionHandle {
			session: self.clone(),
			cancel,
			ended: ended_tx,
		})
	}

	/// Request cancellation of the active session. Returns `false` if there is
	/// no session or a stop was already requested.
	pub fn stop(&self) -> bool {
		let mut state = self.lock();
		match &mut *state {
			SessionState::Active {
				cancel,
				stop_requested,
				..
			} if !*stop_requested => {
				*stop_requested = true;
				cancel.cancel();
				true
			}
			_ => false,
		}
	}

	pub fn is_active(&self) -> bool {
		matches!(*self.lock(), SessionState::Active { .. })
	}

	pub fn is_stopping(&self) -> bool {
		match &*self.lock() {
			SessionState::Active {
				cancel,
				stop_requested,
				..
			} => *stop_requested || cancel.is_cancelled(),
			SessionState::Idle => false,
		}
	}

	/// Wait for the active session (if any) to end.
	pub async fn wait_for_stop(&self) {
		let ended = match &*self.lock() {
			SessionState::Active { ended, .. } => ended.clone(),
			SessionState::Idle => return,
		};
		let mut ended = ended;
		// The sender firing or being dropped both mean the session is over.
		let _ = ended.wait_for(|ended| *ended).await;
	}

	fn finish(&self) {
		*self.lock() = SessionState::Idle;
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

/// Ownership of the active session. The session ends when this is dropped.
pub struct SessionHandle {
	session: Arc<SyncSession>,
	cancel: CancellationToken,
	ended: watch::Sender<bool>,
}

impl SessionHandle {
	/// The session's cancellation token.
	pub fn token(&self) -> &CancellationToken {
		&self.cancel
	}

	/// End the session and wake everyone waiting for it to stop.
	pub fn end(self) {
		drop(self);
	}
}

impl Drop for SessionHandle {
	fn drop(&mut self) {
		self.cancel.cancel();
		self.session.finish();
		let _ = self.ended.send(true);
		debug!("Sync session ended");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[tokio::test]
	async fn second_begin_fails_while_active() {
		let session = Arc::new(SyncSession::new());
		let parent = CancellationToken::new();

		let handle = session.begin(&parent).unwrap();
		assert!(matches!(
			session.begin(&parent),
			Err(WalletSyncError::AlreadySyncing)
		));

		handle.end();
		assert!(!session.is_active());
		let again = session.begin(&parent).unwrap();
		assert!(session.is_active());
		drop(again);
	}

	#[tokio::test]
	async fn stop_is_idempotent() {
		let session = Arc::new(SyncSession::new());
		assert!(!session.stop());

		let handle = session.begin(&CancellationToken::new()).unwrap();
		assert!(session.stop());
		assert!(!session.stop());
		assert!(handle.token().is_cancelled());
		assert!(session.is_stopping());
	}

	#[tokio::test]
	async fn parent_cancellation_reaches_session() {
		let session = Arc::new(SyncSession::new());
		let parent = CancellationToken::new();
		let handle = session.begin(&parent).unwrap();

		parent.cancel();
		assert!(handle.token().is_cancelled());
		assert!(session.is_stopping());
	}

	#[tokio::test]
	async fn wait_for_stop_returns_once_idle() {
		let session = Arc::new(SyncSession::new());
		tokio::time::timeout(Duration::from_secs(1), session.wait_for_stop())
			.await
			.unwrap();

		let handle = session.begin(&CancellationToken::new()).unwrap();
		let waiter = {
			let session = session.clone();
			tokio::spawn(async move {
				session.wait_for_stop().await;
				// A woken waiter must be able to start the next session.
				session.begin(&CancellationToken::new()).is_ok()
			})
		};

		tokio::time::sleep(Duration::from_millis(10)).await;
		assert!(!waiter.is_finished());

		handle.end();
		assert!(waiter.await.unwrap());
	}
}
