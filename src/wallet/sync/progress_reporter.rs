//! Stage-based sync progress reporting.
//!
//! This module provides the `SyncProgressReporter`, a small state machine over
//! [`SyncStage`] that turns raw "block connected" and "rescan progress" events
//! into normalized percentage/ETA reports and publishes them to registered
//! [`SyncProgressListener`]s.
//!
//! Each stage keeps its own [`ProgressRecord`]. Updates are only accepted for
//! the stage that is current; anything else is logged and skipped. Stages move
//! forward only, except that `HeadersRescan` may be re-entered after sync has
//! completed (manual rescans).

use crate::chain::TransactionSummary;
use crate::utils::{format_percentage, format_time_remaining};
use crate::wallet::sync::events::{SyncProgressListener, SyncProgressReport, SyncStage};
use crate::wallet::sync::listeners::ListenerRegistry;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Errors for progress updates that don't fit the current stage
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgressError {
    #[error("Invalid attempt to update {update} progress in {current} stage")]
    WrongStage { update: SyncStage, current: SyncStage },

    #[error("No report to update for sync stage {0}")]
    NoRecord(SyncStage),

    #[error("Invalid sync stage transition from {from} to {to}")]
    InvalidTransition { from: SyncStage, to: SyncStage },
}

/// Progress accounting for one stage
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRecord {
    /// When this stage started
    pub start_timestamp: DateTime<Utc>,
    /// Block height at the start of this stage
    pub start_height: i32,
    /// Intended final height for this stage
    pub target_height: i32,
    /// Last block height processed by this stage
    pub last_height: i32,
}

impl ProgressRecord {
    pub fn new(start_height: i32, target_height: i32) -> Self {
        Self::starting_at(Utc::now(), start_height, target_height)
    }

    pub fn starting_at(start_timestamp: DateTime<Utc>, start_height: i32, target_height: i32) -> Self {
        let mut record = Self {
            start_timestamp,
            start_height,
            target_height,
            last_height: start_height,
        };
        record.clean_values();
        record
    }

    /// Normalize heights so that `start <= last <= target`.
    pub fn clean_values(&mut self) {
        if self.target_height < self.start_height {
            self.target_height = self.start_height;
        }
        self.last_height = self.last_height.clamp(self.start_height, self.target_height);
    }

    /// Percentage complete (0..=100) and estimated time remaining, measured
    /// against the current time.
    pub fn calculate_progress(&mut self) -> (f64, Duration) {
        self.calculate_progress_at(Utc::now())
    }

    pub fn calculate_progress_at(&mut self, now: DateTime<Utc>) -> (f64, Duration) {
        self.clean_values();

        // Heights may span the whole i32 range.
        let start = i64::from(self.start_height);
        let done = (i64::from(self.last_height) - start).max(0);
        let all_to_do = (i64::from(self.target_height) - start).max(0);
        if all_to_do == 0 {
            return (100.0, Duration::ZERO);
        }
        let percentage = done as f64 / all_to_do as f64 * 100.0;

        if done == 0 {
            return (percentage, Duration::ZERO);
        }
        let elapsed = (now - self.start_timestamp).to_std().unwrap_or_default();
        let remaining_blocks = (i64::from(self.target_height) - i64::from(self.last_height)) as f64;
        let time_remaining = Duration::try_from_secs_f64(elapsed.as_secs_f64() * remaining_blocks / done as f64)
            .unwrap_or(Duration::MAX);

        (percentage, time_remaining)
    }

    pub fn is_final(&self) -> bool {
        self.last_height >= self.target_height
    }
}

struct ThrottleState {
    last_logged: Instant,
    enabled: bool,
}

/// Lets a progress log line through at most once per interval.
pub struct ProgressLogThrottle {
    interval: Duration,
    state: Mutex<ThrottleState>,
}

impl ProgressLogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(ThrottleState {
                last_logged: Instant::now(),
                enabled: true,
            }),
        }
    }

    /// Whether a line may be logged now. Consumes the allowance if so.
    pub fn should_log(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.enabled {
            return true;
        }
        let now = Instant::now();
        if now.duration_since(state.last_logged) >= self.interval {
            state.last_logged = now;
            return true;
        }
        false
    }

    /// Stop throttling; every line is logged from now on.
    pub fn disable(&self) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).enabled = false;
    }

    /// Start throttling again with a fresh interval.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.enabled = true;
        state.last_logged = Instant::now();
    }
}

struct ReporterState {
    current_stage: SyncStage,
    records: HashMap<SyncStage, ProgressRecord>,
    /// Set once the run has reached `Complete`.
    caught_up: bool,
}

/// Converts raw sync events into progress reports for listeners.
pub struct SyncProgressReporter {
    listeners: Arc<ListenerRegistry<dyn SyncProgressListener>>,
    state: Mutex<ReporterState>,
    log_throttle: ProgressLogThrottle,
}

impl SyncProgressReporter {
    pub fn new(listeners: Arc<ListenerRegistry<dyn SyncProgressListener>>, log_interval: Duration) -> Self {
        Self {
            listeners,
            state: Mutex::new(ReporterState {
                current_stage: SyncStage::Invalid,
                records: HashMap::new(),
                caught_up: false,
            }),
            log_throttle: ProgressLogThrottle::new(log_interval),
        }
    }

    pub fn current_stage(&self) -> SyncStage {
        self.state().current_stage
    }

    /// The latest report for `stage`, if that stage has been entered.
    pub fn progress(&self, stage: SyncStage) -> Option<SyncProgressReport> {
        let mut state = self.state();
        let record = state.records.get_mut(&stage)?;
        Some(Self::make_report(stage, record))
    }

    /// Begin a new sync run in the `HeadersFetch` stage.
    pub fn sync_started(&self, start_height: i32, target_height: i32) {
        {
            let mut state = self.state();
            state.current_stage = SyncStage::HeadersFetch;
            state.caught_up = false;
            state.records = HashMap::from([(
                SyncStage::HeadersFetch,
                ProgressRecord::new(start_height, target_height),
            )]);
        }
        self.log_throttle.reset();

        info!(start_height, target_height, "Sync started");
        self.listeners.range_async(|listener| listener.on_sync_started());
    }

    pub fn handle_peer_connected_or_disconnected(&self, connected_peers: u32) {
        debug!("Connected peers: {}", connected_peers);
        self.listeners
            .range_async(move |listener| listener.on_peer_connected_or_disconnected(connected_peers));
    }

    /// Record a connected block during the `HeadersFetch` stage.
    ///
    /// `log_progress` lets the caller suppress the log line for this update;
    /// otherwise it is subject to the log throttle, except for the final
    /// update of the stage which is always logged.
    pub fn handle_block_connected(
        &self,
        height: i32,
        target_height: i32,
        relevant_txs: &[TransactionSummary],
        log_progress: bool,
    ) -> Result<SyncProgressReport, ProgressError> {
        if !relevant_txs.is_empty() {
            debug!("Block {} has {} relevant transactions", height, relevant_txs.len());
        }
        self.update_stage(SyncStage::HeadersFetch, height, Some(target_height), log_progress)
    }

    /// Move to `stage`, starting a fresh record for it.
    pub fn begin_stage(&self, stage: SyncStage, start_height: i32, target_height: i32) -> Result<(), ProgressError> {
        {
            let mut state = self.state();
            let current = state.current_stage;
            let allowed = match stage {
                SyncStage::Invalid | SyncStage::HeadersFetch | SyncStage::Complete => false,
                SyncStage::HeadersRescan => current != SyncStage::Invalid,
                SyncStage::CFiltersFetch | SyncStage::AddressDiscovery => {
                    current != SyncStage::Invalid && stage > current
                }
            };
            if !allowed {
                let err = ProgressError::InvalidTransition {
                    from: current,
                    to: stage,
                };
                error!("{}", err);
                return Err(err);
            }
            state.current_stage = stage;
            state
                .records
                .insert(stage, ProgressRecord::new(start_height, target_height));
        }
        info!(start_height, target_height, "Sync stage changed to {}", stage);
        Ok(())
    }

    /// Record progress for `stage`, which must be the current stage.
    pub fn handle_stage_progress(
        &self,
        stage: SyncStage,
        height: i32,
        log_progress: bool,
    ) -> Result<SyncProgressReport, ProgressError> {
        self.update_stage(stage, height, None, log_progress)
    }

    /// The wallet has caught up with the chain.
    pub fn handle_sync_completed(&self) {
        {
            let mut state = self.state();
            state.current_stage = SyncStage::Complete;
            state.caught_up = true;
        }
        self.log_throttle.disable();

        self.listeners.range_async(|listener| listener.on_sync_completed());
        info!("Syncing 100% complete");
    }

    /// Leave the `HeadersRescan` stage after a manual rescan. A run that had
    /// already caught up goes back to `Complete` without notifying listeners
    /// again; otherwise the stage is left for the catch-up to finish.
    pub fn end_rescan_stage(&self) {
        let mut state = self.state();
        if state.current_stage == SyncStage::HeadersRescan && state.caught_up {
            state.current_stage = SyncStage::Complete;
            debug!("Rescan finished, back to {}", SyncStage::Complete);
        }
    }

    /// Wait for all listener notifications dispatched so far to be handled.
    pub async fn wait_for_background_processes(&self) {
        self.listeners.wait().await;
    }

    fn update_stage(
        &self,
        stage: SyncStage,
        height: i32,
        target_height: Option<i32>,
        log_progress: bool,
    ) -> Result<SyncProgressReport, ProgressError> {
        let (report, is_final) = {
            let mut state = self.state();
            if state.current_stage != stage {
                let err = ProgressError::WrongStage {
                    update: stage,
                    current: state.current_stage,
                };
                error!("{}", err);
                return Err(err);
            }
            let Some(record) = state.records.get_mut(&stage) else {
                let err = ProgressError::NoRecord(stage);
                error!("{}", err);
                return Err(err);
            };

            record.last_height = height;
            if let Some(target_height) = target_height {
                record.target_height = target_height;
            }
            let report = Self::make_report(stage, record);
            (report, record.is_final())
        };

        let published = report.clone();
        self.listeners
            .range_async(move |listener| listener.on_progress(&published));

        if log_progress && (is_final || self.log_throttle.should_log()) {
            Self::log_progress(&report);
        }
        Ok(report)
    }

    fn make_report(stage: SyncStage, record: &mut ProgressRecord) -> SyncProgressReport {
        let (percentage, time_remaining) = record.calculate_progress();
        SyncProgressReport {
            stage,
            current_height: record.last_height,
            target_height: record.target_height,
            percentage,
            time_remaining,
        }
    }

    fn log_progress(report: &SyncProgressReport) {
        info!(
            "Syncing {} complete, remaining {}. Current stage: {}, {}/{} blocks processed.",
            format_percentage(report.percentage),
            format_time_remaining(report.time_remaining),
            report.stage,
            report.current_height,
            report.target_height
        );
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ReporterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingListener {
        started: StdMutex<u32>,
        completed: StdMutex<u32>,
        reports: StdMutex<Vec<SyncProgressReport>>,
    }

    impl SyncProgressListener for RecordingListener {
        fn on_sync_started(&self) {
            *self.started.lock().unwrap() += 1;
        }

        fn on_progress(&self, report: &SyncProgressReport) {
            self.reports.lock().unwrap().push(report.clone());
        }

        fn on_sync_completed(&self) {
            *self.completed.lock().unwrap() += 1;
        }
    }

    fn reporter_with_listener() -> (SyncProgressReporter, Arc<RecordingListener>) {
        let registry: Arc<ListenerRegistry<dyn SyncProgressListener>> =
            Arc::new(ListenerRegistry::new("sync progress"));
        let listener = Arc::new(RecordingListener::default());
        registry.add("recorder", listener.clone()).unwrap();
        (
            SyncProgressReporter::new(registry, Duration::from_secs(3)),
            listener,
        )
    }

    #[test]
    fn equal_start_and_target_is_complete() {
        let mut record = ProgressRecord::new(500, 500);
        let (percentage, remaining) = record.calculate_progress();
        assert_eq!(percentage, 100.0);
        assert_eq!(remaining, Duration::ZERO);
    }

    #[test]
    fn clean_values_keeps_last_between_start_and_target() {
        let mut record = ProgressRecord::new(100, 200);
        record.last_height = 50;
        record.clean_values();
        assert_eq!(record.last_height, 100);

        record.last_height = 250;
        record.clean_values();
        assert_eq!(record.last_height, 200);

        let mut inverted = ProgressRecord::new(300, 200);
        inverted.last_height = 250;
        inverted.clean_values();
        assert!(inverted.start_height <= inverted.last_height);
        assert!(inverted.last_height <= inverted.target_height);
        assert_eq!(inverted.calculate_progress().0, 100.0);
    }

    #[test]
    fn eta_scales_elapsed_by_remaining_work() {
        let start = Utc::now() - chrono::Duration::seconds(10);
        let mut record = ProgressRecord::starting_at(start, 0, 300);
        record.last_height = 100;
        let (percentage, remaining) = record.calculate_progress_at(start + chrono::Duration::seconds(10));
        assert!((percentage - 33.333).abs() < 0.01);
        assert_eq!(remaining, Duration::from_secs(20));
    }

    #[tokio::test]
    async fn headers_fetch_then_complete() {
        let (reporter, listener) = reporter_with_listener();
        assert_eq!(reporter.current_stage(), SyncStage::Invalid);

        reporter.sync_started(100, 200);
        let report = reporter.handle_block_connected(150, 200, &[], true).unwrap();
        assert_eq!(report.percentage, 50.0);
        assert_eq!(report.stage, SyncStage::HeadersFetch);
        assert_eq!(reporter.current_stage(), SyncStage::HeadersFetch);

        reporter.handle_sync_completed();
        assert_eq!(reporter.current_stage(), SyncStage::Complete);

        reporter.wait_for_background_processes().await;
        assert_eq!(*listener.started.lock().unwrap(), 1);
        assert_eq!(*listener.completed.lock().unwrap(), 1);
        assert_eq!(listener.reports.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_outside_current_stage_is_skipped() {
        let (reporter, listener) = reporter_with_listener();

        assert_eq!(
            reporter.handle_block_connected(10, 20, &[], false),
            Err(ProgressError::WrongStage {
                update: SyncStage::HeadersFetch,
                current: SyncStage::Invalid,
            })
        );

        reporter.sync_started(0, 20);
        reporter.handle_sync_completed();
        assert!(reporter.handle_block_connected(10, 20, &[], false).is_err());

        reporter.wait_for_background_processes().await;
        assert!(listener.reports.lock().unwrap().is_empty());
        assert_eq!(reporter.progress(SyncStage::HeadersFetch).unwrap().current_height, 0);
    }

    #[tokio::test]
    async fn rescan_stage_reenters_after_complete() {
        let (reporter, _listener) = reporter_with_listener();
        reporter.sync_started(0, 10);
        reporter.handle_sync_completed();

        reporter.begin_stage(SyncStage::HeadersRescan, 0, 40).unwrap();
        let report = reporter
            .handle_stage_progress(SyncStage::HeadersRescan, 10, false)
            .unwrap();
        assert_eq!(report.percentage, 25.0);

        // A second manual rescan re-enters the same stage.
        reporter.begin_stage(SyncStage::HeadersRescan, 20, 40).unwrap();
        assert_eq!(reporter.progress(SyncStage::HeadersRescan).unwrap().percentage, 0.0);

        reporter.end_rescan_stage();
        assert_eq!(reporter.current_stage(), SyncStage::Complete);
    }

    #[tokio::test]
    async fn rescan_before_catch_up_keeps_rescan_stage() {
        let (reporter, listener) = reporter_with_listener();
        reporter.sync_started(0, 10);
        reporter.begin_stage(SyncStage::HeadersRescan, 0, 10).unwrap();

        reporter.end_rescan_stage();
        assert_eq!(reporter.current_stage(), SyncStage::HeadersRescan);

        reporter.wait_for_background_processes().await;
        assert_eq!(*listener.completed.lock().unwrap(), 0);
    }

    #[test]
    fn extreme_heights_do_not_overflow() {
        let mut record = ProgressRecord::new(-2, i32::MAX);
        record.last_height = i32::MAX - 1;
        let (percentage, _) = record.calculate_progress();
        assert!(percentage > 99.9 && percentage < 100.0);

        let mut record = ProgressRecord::new(i32::MIN, i32::MAX);
        record.last_height = i32::MIN + 1;
        let (percentage, _) = record.calculate_progress();
        assert!(percentage > 0.0 && percentage < 0.001);

        let mut inverted = ProgressRecord::new(i32::MAX, i32::MIN);
        assert_eq!(inverted.calculate_progress(), (100.0, Duration::ZERO));
    }

    #[tokio::test]
    async fn stages_never_move_backwards() {
        let (reporter, _listener) = reporter_with_listener();
        assert!(reporter.begin_stage(SyncStage::CFiltersFetch, 0, 10).is_err());

        reporter.sync_started(0, 10);
        reporter.begin_stage(SyncStage::AddressDiscovery, 0, 10).unwrap();
        assert_eq!(
            reporter.begin_stage(SyncStage::CFiltersFetch, 0, 10),
            Err(ProgressError::InvalidTransition {
                from: SyncStage::AddressDiscovery,
                to: SyncStage::CFiltersFetch,
            })
        );
        assert!(reporter.begin_stage(SyncStage::Complete, 0, 10).is_err());
        assert_eq!(reporter.current_stage(), SyncStage::AddressDiscovery);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_allows_one_line_per_interval() {
        let throttle = ProgressLogThrottle::new(Duration::from_secs(3));
        assert!(!throttle.should_log());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(throttle.should_log());
        assert!(!throttle.should_log());

        throttle.disable();
        assert!(throttle.should_log());
        assert!(throttle.should_log());
    }
}
