//! Sync orchestrator and integration point for all sync services.
//!
//! This module defines the `SyncOrchestrator`, which owns the start/stop
//! lifecycle of a wallet's sync session and coordinates every component
//! involved while the session runs.
//!
//! The orchestrator is responsible for:
//! - Guarding the single live session (a second start fails with `AlreadySyncing`)
//! - Starting the chain client, attaching the wallet engine and connecting peers
//! - Multiplexing the chain client's notification stream
//! - Driving the progress reporter through the sync stages
//! - Indexing wallet transactions on catch-up, rescans and new blocks, and
//!   rolling the index back on reorgs
//! - Tearing everything down in order when the session is cancelled
//!
//! One coordination task per session consumes the multiplexer's default
//! stream. Peer connection and rescan tasks are tracked with the session so
//! that teardown can wait for them.

use crate::chain::{ChainClient, ChainError, ChainNotification, TransactionSummary};
use crate::config::SyncConfig;
use crate::peers::{PeerManager, PeerView};
use crate::wallet::sync::events::{BlocksRescanListener, SyncProgressListener, SyncStage, TxAndBlockNtfnListener};
use crate::wallet::sync::listeners::{ListenerError, ListenerRegistry};
use crate::wallet::sync::multiplexer::NotificationMultiplexer;
use crate::wallet::sync::progress_reporter::SyncProgressReporter;
use crate::wallet::sync::rescan::RescanTracker;
use crate::wallet::sync::session::{SessionHandle, SyncSession};
use crate::wallet::sync::transaction_processor::TransactionProcessor;
use crate::wallet::{WalletEngine, WalletSyncError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Components that only exist while a session is running.
struct ActiveSync {
    token: CancellationToken,
    peers: Arc<PeerManager<dyn ChainClient>>,
    mux: Arc<NotificationMultiplexer<ChainNotification>>,
    reporter: Arc<SyncProgressReporter>,
    /// Peer connection and rescan tasks spawned for this session.
    tasks: TaskTracker,
}

struct Inner<T> {
    config: SyncConfig,
    wallet: Arc<dyn WalletEngine>,
    chain: Arc<dyn ChainClient>,
    processor: Option<TransactionProcessor<T>>,

    session: Arc<SyncSession>,
    active: Mutex<Option<Arc<ActiveSync>>>,
    rescan: RescanTracker,

    progress_listeners: Arc<ListenerRegistry<dyn SyncProgressListener>>,
    tx_listeners: Arc<ListenerRegistry<dyn TxAndBlockNtfnListener<T>>>,
    rescan_listeners: Arc<ListenerRegistry<dyn BlocksRescanListener>>,
}

/// Coordinates a wallet's network sync sessions.
///
/// `T` is the caller's indexed transaction record type. Transaction indexing
/// is optional: without a [`TransactionProcessor`] sync runs as usual and
/// nothing is indexed.
pub struct SyncOrchestrator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SyncOrchestrator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> SyncOrchestrator<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        config: SyncConfig,
        wallet: Arc<dyn WalletEngine>,
        chain: Arc<dyn ChainClient>,
        processor: Option<TransactionProcessor<T>>,
    ) -> Result<Self, WalletSyncError> {
        config.validate()?;

        let rescan_listeners: Arc<ListenerRegistry<dyn BlocksRescanListener>> =
            Arc::new(ListenerRegistry::new("blocks rescan"));
        let rescan = RescanTracker::new(rescan_listeners.clone(), config.progress_log_interval());

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                wallet,
                chain,
                processor,
                session: Arc::new(SyncSession::new()),
                active: Mutex::new(None),
                rescan,
                progress_listeners: Arc::new(ListenerRegistry::new("sync progress")),
                tx_listeners: Arc::new(ListenerRegistry::new("tx and block")),
                rescan_listeners,
            }),
        })
    }

    /// Connect the wallet to the network and keep it synchronized in the
    /// background until `parent` is cancelled or [`stop_sync`](Self::stop_sync)
    /// is called.
    ///
    /// `connect_peers` replaces the configured default peers when non-empty.
    /// Peers the user adds during the session are saved to `peers_file`.
    ///
    /// Returns once the chain client has started. If it fails to start, the
    /// session ends immediately and listeners see `on_sync_ended` with the
    /// error.
    pub async fn start_sync(
        &self,
        parent: &CancellationToken,
        connect_peers: Vec<String>,
        peers_file: impl Into<PathBuf>,
    ) -> Result<(), WalletSyncError> {
        let inner = &self.inner;
        let handle = inner.session.begin(parent)?;

        debug!("Starting chain client...");
        let notifications = match inner.start_chain_client().await {
            Ok(notifications) => notifications,
            Err(e) => {
                error!("Couldn't start chain client: {}", e);
                inner.publish_sync_ended(Some(WalletSyncError::Chain(e.clone())));
                inner.progress_listeners.wait().await;
                handle.end();
                return Err(WalletSyncError::Chain(e));
            }
        };

        let token = handle.token().clone();
        let default_peers = if connect_peers.is_empty() {
            inner.config.default_peers.clone()
        } else {
            connect_peers
        };
        let active = Arc::new(ActiveSync {
            token: token.clone(),
            peers: Arc::new(PeerManager::new(
                inner.chain.clone(),
                default_peers,
                peers_file,
                inner.config.default_port.clone(),
            )),
            mux: Arc::new(NotificationMultiplexer::new(
                notifications,
                inner.config.subscriber_capacity,
                token.clone(),
            )),
            reporter: Arc::new(SyncProgressReporter::new(
                inner.progress_listeners.clone(),
                inner.config.progress_log_interval(),
            )),
            tasks: TaskTracker::new(),
        });
        *inner.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(active.clone());

        let peers = active.peers.clone();
        let peers_token = token.clone();
        active.tasks.spawn(async move {
            tokio::select! {
                _ = peers_token.cancelled() => {}
                _ = peers.connect_to_initial_peers() => {}
            }
        });

        info!("Synchronizing wallet with network...");
        inner.wallet.synchronize(inner.chain.clone());

        tokio::spawn(inner.clone().run_session(handle, active));
        Ok(())
    }

    /// Request the running session to stop. Returns without waiting; see
    /// [`wait_for_sync_to_stop`](Self::wait_for_sync_to_stop).
    pub fn stop_sync(&self) {
        if self.inner.session.stop() {
            info!("Stop sync requested");
        }
    }

    /// Wait until the current session (if any) has fully stopped.
    pub async fn wait_for_sync_to_stop(&self) {
        self.inner.session.wait_for_stop().await;
    }

    /// Whether a session is running. This says nothing about whether the
    /// wallet has caught up; see [`current_sync_stage`](Self::current_sync_stage).
    pub fn is_connected_to_network(&self) -> bool {
        self.inner.session.is_active()
    }

    pub fn current_sync_stage(&self) -> SyncStage {
        self.inner
            .active()
            .map(|active| active.reporter.current_stage())
            .unwrap_or_default()
    }

    /// Whether the wallet has caught up with the network in this session.
    pub fn is_synced(&self) -> bool {
        self.current_sync_stage() >= SyncStage::Complete
    }

    /// Rescan blocks from `start_height` to the wallet's best block and
    /// re-index transactions from `start_height`. Returns once the rescan has
    /// been started; progress goes to rescan listeners.
    pub async fn rescan_blocks(&self, start_height: i32) -> Result<(), WalletSyncError> {
        let inner = &self.inner;
        let active = inner.active().ok_or(WalletSyncError::NotSyncing)?;
        if !inner.wallet.chain_synced() {
            return Err(WalletSyncError::WalletNotSynced);
        }

        let best_block = inner.wallet.best_block().await?;

        // Teardown clears `active` before it closes the task tracker, so a
        // task spawned while this guard confirms the session is still current
        // is always awaited by teardown.
        let current = inner.active.lock().unwrap_or_else(PoisonError::into_inner);
        let still_current = current.as_ref().is_some_and(|current| Arc::ptr_eq(current, &active));
        if !still_current || active.token.is_cancelled() {
            return Err(WalletSyncError::NotSyncing);
        }

        inner.rescan.initialize_rescan(start_height, best_block.height)?;
        if let Err(e) = active
            .reporter
            .begin_stage(SyncStage::HeadersRescan, start_height, best_block.height)
        {
            debug!("Rescan progress won't be reported as a sync stage: {}", e);
        }

        let this = inner.clone();
        let token = active.token.clone();
        let reporter = active.reporter.clone();
        active.tasks.spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => Err(WalletSyncError::SyncError(
                    "sync stopped before rescan finished".to_string(),
                )),
                result = this.wallet.rescan(start_height) => result,
            };
            let result = match result {
                Ok(()) => {
                    this.index_transactions(&token, Some(start_height), best_block.height)
                        .await
                }
                Err(e) => Err(e),
            };
            reporter.end_rescan_stage();
            this.rescan.rescan_ended(result.err());
        });
        drop(current);
        Ok(())
    }

    pub fn is_rescanning(&self) -> bool {
        self.inner.rescan.is_rescanning()
    }

    /// Subscribe to the running session's chain notifications. The stream
    /// closes when the session ends.
    ///
    /// The subscriber must keep reading: a subscriber that stops reading
    /// stalls delivery to every consumer.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already subscribed in this session.
    pub fn subscribe_chain_notifications(
        &self,
        id: impl Into<String>,
    ) -> Result<mpsc::Receiver<ChainNotification>, WalletSyncError> {
        let active = self.inner.active().ok_or(WalletSyncError::NotSyncing)?;
        Ok(active.mux.subscribe(id))
    }

    pub fn unsubscribe_chain_notifications(&self, id: &str) {
        if let Some(active) = self.inner.active() {
            active.mux.unsubscribe(id);
        }
    }

    pub async fn add_peer(&self, addr: &str) -> Result<(), WalletSyncError> {
        let active = self.inner.active().ok_or(WalletSyncError::NotSyncing)?;
        Ok(active.peers.add_peer(addr).await?)
    }

    pub async fn remove_peer(&self, addr: &str) -> Result<(), WalletSyncError> {
        let active = self.inner.active().ok_or(WalletSyncError::NotSyncing)?;
        Ok(active.peers.remove_peer(addr).await?)
    }

    /// Peers tracked by the running session, or none if not syncing.
    pub fn peers(&self) -> Vec<PeerView> {
        self.inner
            .active()
            .map(|active| active.peers.peers())
            .unwrap_or_default()
    }

    pub fn best_peer_height(&self) -> i32 {
        self.inner
            .active()
            .map(|active| active.peers.best_peer_height())
            .unwrap_or(0)
    }

    pub fn add_sync_progress_listener(
        &self,
        id: impl Into<String>,
        listener: Arc<dyn SyncProgressListener>,
    ) -> Result<(), ListenerError> {
        self.inner.progress_listeners.add(id, listener)
    }

    pub fn remove_sync_progress_listener(&self, id: &str) {
        self.inner.progress_listeners.remove(id);
    }

    pub fn add_tx_and_block_listener(
        &self,
        id: impl Into<String>,
        listener: Arc<dyn TxAndBlockNtfnListener<T>>,
    ) -> Result<(), ListenerError> {
        self.inner.tx_listeners.add(id, listener)
    }

    pub fn remove_tx_and_block_listener(&self, id: &str) {
        self.inner.tx_listeners.remove(id);
    }

    pub fn add_blocks_rescan_listener(
        &self,
        id: impl Into<String>,
        listener: Arc<dyn BlocksRescanListener>,
    ) -> Result<(), ListenerError> {
        self.inner.rescan_listeners.add(id, listener)
    }

    pub fn remove_blocks_rescan_listener(&self, id: &str) {
        self.inner.rescan_listeners.remove(id);
    }

    /// Wait for every listener notification dispatched so far to be handled.
    pub async fn wait_for_background_processes(&self) {
        self.inner.drain_listeners().await;
    }
}

impl<T> Inner<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn active(&self) -> Option<Arc<ActiveSync>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn start_chain_client(&self) -> Result<mpsc::Receiver<ChainNotification>, ChainError> {
        self.chain.start().await?;

        let notifications = match self.chain.notifications() {
            Ok(notifications) => notifications,
            Err(e) => {
                self.shutdown_chain_client().await;
                return Err(e);
            }
        };
        if let Err(e) = self.chain.notify_blocks().await {
            self.shutdown_chain_client().await;
            return Err(e);
        }
        Ok(notifications)
    }

    async fn shutdown_chain_client(&self) {
        debug!("Stopping chain client");
        self.chain.stop();
        self.chain.wait_for_shutdown().await;
    }

    async fn run_session(self: Arc<Self>, handle: SessionHandle, active: Arc<ActiveSync>) {
        let token = handle.token().clone();

        let result = self.monitor_sync_activity(&token, &active).await;
        if let Err(e) = &result {
            error!("Sync stopped: {}", e);
        }
        token.cancel();

        info!("Stopping wallet synchronization");
        // The wallet must let go of the chain client before the client stops.
        self.wallet.desynchronize().await;
        self.shutdown_chain_client().await;
        active.mux.join().await;

        self.active.lock().unwrap_or_else(PoisonError::into_inner).take();
        active.tasks.close();
        active.tasks.wait().await;

        self.drain_listeners().await;
        self.publish_sync_ended(result.err());
        self.progress_listeners.wait().await;

        handle.end();
        info!("Wallet synchronization stopped");
    }

    async fn monitor_sync_activity(
        &self,
        token: &CancellationToken,
        active: &ActiveSync,
    ) -> Result<(), WalletSyncError> {
        let mut notifications = active.mux.default_stream().ok_or_else(|| {
            WalletSyncError::SyncError("notification stream already taken".to_string())
        })?;
        let peers = &active.peers;
        let reporter = &active.reporter;

        let current_tip = match self.wallet.best_block().await {
            Ok(block) => block.height,
            Err(e) => {
                warn!("Couldn't read wallet best block: {}", e);
                0
            }
        };
        reporter.sync_started(current_tip, peers.best_peer_height());

        let mut caught_up = false;
        let mut last_peer_count = None;
        loop {
            let notification = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                notification = notifications.recv() => notification,
            };
            let Some(notification) = notification else {
                if token.is_cancelled() {
                    return Ok(());
                }
                info!("Chain client stopped");
                return Err(WalletSyncError::ChainClientStopped);
            };

            match notification {
                ChainNotification::BlockConnected {
                    height,
                    hash,
                    relevant_txs,
                } => {
                    if !self.wallet.chain_synced() {
                        let target_height = peers.best_peer_height();
                        // Rejected updates are logged by the reporter.
                        let _ = reporter.handle_block_connected(height, target_height, &relevant_txs, true);
                    } else if caught_up {
                        self.handle_new_block(height, &hash, &relevant_txs).await;
                    }
                }
                ChainNotification::BlockDisconnected { height, .. } => {
                    info!(
                        "BlockDisconnected {}, target is {}",
                        height,
                        peers.best_peer_height()
                    );
                    if let Err(e) = self.handle_reorg(height).await {
                        error!("Unable to roll back transaction index: {}", e);
                    }
                }
                ChainNotification::RescanProgress { height } => {
                    // Only sent during manual rescans.
                    if self.rescan.publish_rescan_progress(height).is_some() {
                        let _ = reporter.handle_stage_progress(SyncStage::HeadersRescan, height, false);
                    }
                }
                ChainNotification::RescanFinished { height } => {
                    let rescanning = self.rescan.is_rescanning();
                    info!("RescanFinished at {}, rescanning: {}", height, rescanning);
                    if !rescanning && !caught_up {
                        if self.complete_catch_up(token, active, height).await {
                            caught_up = true;
                        } else {
                            return Ok(());
                        }
                    }
                }
            }

            let peer_count = peers.connected_peer_count();
            if last_peer_count != Some(peer_count) {
                last_peer_count = Some(peer_count);
                reporter.handle_peer_connected_or_disconnected(u32::try_from(peer_count).unwrap_or(u32::MAX));
            }
        }
    }

    /// Finish the initial sync: wait for the wallet engine to catch up, index
    /// its transactions and report completion. Returns `false` if the session
    /// was cancelled while waiting.
    async fn complete_catch_up(&self, token: &CancellationToken, active: &ActiveSync, height: i32) -> bool {
        if !self.wallet.chain_synced() {
            info!("Waiting for wallet to consider itself synced");
            if !self.poll_wallet_chain_synced(token).await {
                return false;
            }
        }

        let mut best_height = active.peers.best_peer_height();
        match self.wallet.best_block().await {
            Ok(block) if block.height > best_height => best_height = block.height,
            Ok(_) => {}
            Err(e) => warn!("Couldn't read wallet best block: {}", e),
        }

        if let Err(e) = self.index_transactions(token, None, best_height).await {
            error!("Unable to index transactions: {}", e);
        }

        let _ = active.reporter.handle_block_connected(height, best_height, &[], false);
        active.reporter.handle_sync_completed();

        if self.wallet.account_discovery_required() {
            self.wallet.mark_account_discovery_complete();
        }
        true
    }

    /// Poll until the wallet engine reports chain-synced. Returns `false` if
    /// `token` is cancelled first.
    async fn poll_wallet_chain_synced(&self, token: &CancellationToken) -> bool {
        let mut interval = tokio::time::interval(self.config.chain_synced_poll_interval());
        loop {
            tokio::select! {
                _ = token.cancelled() => return false,
                _ = interval.tick() => {
                    if self.wallet.chain_synced() {
                        return true;
                    }
                }
            }
        }
    }

    /// Index wallet transactions from the last indexed block (or from
    /// `start_height`, rolling the index back first) through `best_height`.
    async fn index_transactions(
        &self,
        token: &CancellationToken,
        start_height: Option<i32>,
        best_height: i32,
    ) -> Result<(), WalletSyncError> {
        let Some(processor) = &self.processor else {
            debug!("tx indexing not configured");
            return Ok(());
        };
        let indexer = processor.indexer();

        let mut last_indexed = indexer.tx_index_last_block().await?;
        match start_height {
            Some(start) if start < last_indexed => {
                info!("Re-indexing transactions from block {} to {}", start, best_height);
                indexer.rollback_tx_index_last_block(start).await?;
                last_indexed = start;
            }
            _ => info!("Indexing transactions from block {} to {}", last_indexed, best_height),
        }

        let range = self.wallet.transactions(last_indexed, best_height, token).await?;
        let indexed = processor.index_range(&range, token).await;
        if token.is_cancelled() {
            info!("Transaction indexing cancelled after {} transactions", indexed.indexed());
            return Ok(());
        }

        if let Err(e) = indexer.save_tx_index_last_block(best_height).await {
            error!("SaveTxIndexLastBlock error: {}", e);
        }

        match indexer.count_transactions(&[]).await {
            Ok(total) => info!(
                "Transaction indexing complete. Indexed {} transactions, {} failed. {} txs total.",
                indexed.indexed(),
                indexed.failed,
                total
            ),
            Err(_) => info!(
                "Transaction indexing complete. Indexed {} transactions, {} failed.",
                indexed.indexed(),
                indexed.failed
            ),
        }
        Ok(())
    }

    /// Index a block connected after catch-up and pass it on to tx and block
    /// listeners.
    async fn handle_new_block(&self, height: i32, hash: &str, relevant_txs: &[TransactionSummary]) {
        if self.rescan.is_rescanning() {
            debug!("Ignoring block {} while rescanning", height);
            return;
        }
        let Some(processor) = &self.processor else {
            return;
        };

        let (block, failed) = processor.index_block(height, hash, relevant_txs).await;
        info!(
            "tx/block ntfn: block {} with {} txs ({} failed)",
            height,
            block.txs.len(),
            failed
        );

        let blocks = vec![block];
        self.tx_listeners
            .range_async(move |listener| listener.on_tx_or_block_update(&[], &blocks));
    }

    /// Forget indexed transactions from a disconnected block onwards,
    /// including blocks indexed live after catch-up.
    async fn handle_reorg(&self, height: i32) -> Result<(), WalletSyncError> {
        let Some(processor) = &self.processor else {
            return Ok(());
        };
        processor.indexer().disconnect_block(height).await?;
        Ok(())
    }

    async fn drain_listeners(&self) {
        self.progress_listeners.wait().await;
        self.tx_listeners.wait().await;
        self.rescan_listeners.wait().await;
    }

    fn publish_sync_ended(&self, error: Option<WalletSyncError>) {
        let error = error.map(Arc::new);
        self.progress_listeners
            .range_async(move |listener| listener.on_sync_ended(error.as_deref()));
    }
}
