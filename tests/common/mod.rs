#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use wallet_sync::chain::{
    ChainClient, ChainError, ChainNotification, ConnectedPeer, NotificationStream, PeerConnections,
    TransactionSummary,
};
use wallet_sync::txindex::{MemoryStore, RecordStore, TxIndexConfig, TxIndexer};
use wallet_sync::wallet::sync::{
    BlockWithTxs, BlocksRescanListener, RescanReport, SyncProgressListener, SyncProgressReport,
    TransactionProcessor, TxAndBlockNtfnListener, TxTransformer,
};
use wallet_sync::wallet::{BlockStamp, BlockTransactions, TransactionsInRange, WalletEngine, WalletSyncError};
use wallet_sync::{SyncConfig, SyncOrchestrator};

/// A chain client whose notification stream is fed by the test.
#[derive(Default)]
pub struct ScriptedChainClient {
    pub fail_start: AtomicBool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    sender: Mutex<Option<mpsc::Sender<ChainNotification>>>,
    receiver: Mutex<Option<NotificationStream>>,
    live_peers: Mutex<Vec<ConnectedPeer>>,
    pub connects: Mutex<Vec<String>>,
}

impl ScriptedChainClient {
    pub async fn send(&self, notification: ChainNotification) {
        let sender = self.sender.lock().unwrap().clone();
        if let Some(sender) = sender {
            sender.send(notification).await.unwrap();
        }
    }

    /// Close the notification stream as if the client died.
    pub fn close_stream(&self) {
        self.sender.lock().unwrap().take();
    }

    pub fn set_peer(&self, addr: &str, last_block: i32) {
        self.live_peers.lock().unwrap().push(ConnectedPeer {
            addr: addr.to_string(),
            starting_height: 0,
            last_block,
        });
    }
}

#[async_trait::async_trait]
impl PeerConnections for ScriptedChainClient {
    async fn connect_node(&self, addr: &str, _permanent: bool) -> Result<(), ChainError> {
        self.connects.lock().unwrap().push(addr.to_string());
        Ok(())
    }

    async fn remove_node_by_addr(&self, _addr: &str) -> Result<(), ChainError> {
        Ok(())
    }

    fn peers(&self) -> Vec<ConnectedPeer> {
        self.live_peers.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChainClient for ScriptedChainClient {
    async fn start(&self) -> Result<(), ChainError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ChainError::StartFailed("no route to network".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        *self.sender.lock().unwrap() = Some(tx);
        *self.receiver.lock().unwrap() = Some(rx);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.sender.lock().unwrap().take();
    }

    async fn wait_for_shutdown(&self) {}

    async fn notify_blocks(&self) -> Result<(), ChainError> {
        Ok(())
    }

    fn notifications(&self) -> Result<NotificationStream, ChainError> {
        self.receiver
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ChainError::NotificationsUnavailable("already taken".to_string()))
    }
}

/// A wallet engine with a switchable chain-synced flag.
#[derive(Default)]
pub struct MockWallet {
    pub synced: AtomicBool,
    pub best_height: AtomicI32,
    pub unmined: Mutex<Vec<TransactionSummary>>,
    pub mined: Mutex<Vec<BlockTransactions>>,
    pub synchronized: AtomicUsize,
    pub desynchronized: AtomicUsize,
    pub discovery_required: AtomicBool,
    pub discovery_marked: AtomicBool,
    pub hold_rescan: AtomicBool,
    pub release_rescan: Notify,
    pub rescans: Mutex<Vec<i32>>,
}

impl MockWallet {
    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }

    pub fn add_mined(&self, height: i32, hashes: &[&str]) {
        self.mined.lock().unwrap().push(BlockTransactions {
            height,
            hash: format!("block-{height}"),
            transactions: hashes.iter().map(|h| summary(h)).collect(),
        });
        self.best_height.fetch_max(height, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl WalletEngine for MockWallet {
    fn chain_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    async fn best_block(&self) -> Result<BlockStamp, WalletSyncError> {
        let height = self.best_height.load(Ordering::SeqCst);
        Ok(BlockStamp {
            height,
            hash: format!("block-{height}"),
        })
    }

    async fn transactions(
        &self,
        from: i32,
        to: i32,
        _cancel: &CancellationToken,
    ) -> Result<TransactionsInRange, WalletSyncError> {
        Ok(TransactionsInRange {
            unmined: self.unmined.lock().unwrap().clone(),
            mined: self
                .mined
                .lock()
                .unwrap()
                .iter()
                .filter(|block| block.height >= from && block.height <= to)
                .cloned()
                .collect(),
        })
    }

    async fn rescan(&self, from: i32) -> Result<(), WalletSyncError> {
        self.rescans.lock().unwrap().push(from);
        if self.hold_rescan.load(Ordering::SeqCst) {
            self.release_rescan.notified().await;
        }
        Ok(())
    }

    fn synchronize(&self, _client: Arc<dyn ChainClient>) {
        self.synchronized.fetch_add(1, Ordering::SeqCst);
    }

    async fn desynchronize(&self) {
        self.desynchronized.fetch_add(1, Ordering::SeqCst);
    }

    fn account_discovery_required(&self) -> bool {
        self.discovery_required.load(Ordering::SeqCst)
    }

    fn mark_account_discovery_complete(&self) {
        self.discovery_marked.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingProgressListener {
    pub started: AtomicUsize,
    pub completed: AtomicUsize,
    pub reports: Mutex<Vec<SyncProgressReport>>,
    pub peer_counts: Mutex<Vec<u32>>,
    pub ended: Mutex<Vec<Option<String>>>,
}

impl SyncProgressListener for RecordingProgressListener {
    fn on_sync_started(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_peer_connected_or_disconnected(&self, connected_peers: u32) {
        self.peer_counts.lock().unwrap().push(connected_peers);
    }

    fn on_progress(&self, report: &SyncProgressReport) {
        self.reports.lock().unwrap().push(report.clone());
    }

    fn on_sync_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_sync_ended(&self, error: Option<&WalletSyncError>) {
        self.ended.lock().unwrap().push(error.map(|e| e.to_string()));
    }
}

#[derive(Default)]
pub struct RecordingTxListener {
    pub blocks: Mutex<Vec<BlockWithTxs<WalletTx>>>,
}

impl TxAndBlockNtfnListener<WalletTx> for RecordingTxListener {
    fn on_tx_or_block_update(&self, _unmined_txs: &[WalletTx], blocks: &[BlockWithTxs<WalletTx>]) {
        self.blocks.lock().unwrap().extend(blocks.iter().cloned());
    }
}

#[derive(Default)]
pub struct RecordingRescanListener {
    pub progress: Mutex<Vec<RescanReport>>,
    pub ended: Mutex<Vec<Option<String>>>,
}

impl BlocksRescanListener for RecordingRescanListener {
    fn on_blocks_rescan_progress(&self, report: Option<&RescanReport>, error: Option<&WalletSyncError>) {
        match report {
            Some(report) => self.progress.lock().unwrap().push(report.clone()),
            None => self.ended.lock().unwrap().push(error.map(|e| e.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTx {
    pub hash: String,
    pub height: i32,
}

pub struct WalletTxTransformer;

impl TxTransformer<WalletTx> for WalletTxTransformer {
    fn transform(&self, block_height: i32, tx: &TransactionSummary) -> Result<WalletTx, WalletSyncError> {
        Ok(WalletTx {
            hash: tx.hash.clone(),
            height: block_height,
        })
    }
}

pub fn summary(hash: &str) -> TransactionSummary {
    TransactionSummary {
        hash: hash.to_string(),
        timestamp: 1_700_000_000,
        raw: Vec::new(),
    }
}

pub struct Harness {
    pub orchestrator: SyncOrchestrator<WalletTx>,
    pub chain: Arc<ScriptedChainClient>,
    pub wallet: Arc<MockWallet>,
    pub indexer: Arc<TxIndexer<WalletTx>>,
    pub progress: Arc<RecordingProgressListener>,
}

pub async fn harness() -> Harness {
    wallet_sync::logging::init_logging("wallet_sync=debug");

    let chain = Arc::new(ScriptedChainClient::default());
    let wallet = Arc::new(MockWallet::default());

    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let indexer = Arc::new(
        TxIndexer::open(store, TxIndexConfig::new(1, "hash", "height"))
            .await
            .unwrap(),
    );
    let processor = TransactionProcessor::new(indexer.clone(), Arc::new(WalletTxTransformer));

    let config = SyncConfig {
        chain_synced_poll_interval_ms: 10,
        ..SyncConfig::default()
    };
    let orchestrator = SyncOrchestrator::new(config, wallet.clone(), chain.clone(), Some(processor)).unwrap();

    let progress = Arc::new(RecordingProgressListener::default());
    orchestrator
        .add_sync_progress_listener("recorder", progress.clone())
        .unwrap();

    Harness {
        orchestrator,
        chain,
        wallet,
        indexer,
        progress,
    }
}

/// Poll `condition` until it holds, failing the test after a few seconds.
pub async fn eventually<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
