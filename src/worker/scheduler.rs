//! Recurring sync jobs and the single-flight run guard.
//!
//! Three jobs share one scheduler: the stock sync (sub-hourly tick, only
//! executed inside the trading window), the mutual fund sync (daily after
//! market close) and the discovery probe (weekly). All three acquire the
//! same run guard; a trigger that fires while a run is in progress is
//! logged and permanently dropped, never queued.

use crate::constants::{
    DISCOVERY_CANDIDATES, DISCOVERY_HOUR, DISCOVERY_MINUTE, DISCOVERY_WEEKDAY, FUND_BATCH_SIZE,
    FUND_SYNC_HOUR, FUND_SYNC_MINUTE, INTER_BATCH_DELAY_MS, PENNY_PRICE_THRESHOLD,
    STOCK_BATCH_SIZE, STOCK_SYNC_INTERVAL_SECS,
};
use crate::services::discovery::{discover_penny_stocks, DiscoveryReport};
use crate::services::fund_source::FundSource;
use crate::services::market_hours;
use crate::services::reconciler::{reconcile_funds, reconcile_stocks, SyncReport};
use crate::services::stock_source::StockSource;
use crate::services::store::SharedMarketStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Snapshot of the scheduler's run state.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub is_running: bool,
    pub last_stock_sync: Option<DateTime<Utc>>,
    pub last_mutual_fund_sync: Option<DateTime<Utc>>,
    pub last_discovery_sync: Option<DateTime<Utc>>,
}

/// Result of a triggered run: either it ran, or the guard was held and the
/// trigger was dropped.
#[derive(Debug)]
pub enum SyncOutcome {
    Completed(SyncReport),
    Skipped,
}

#[derive(Debug)]
pub enum DiscoveryOutcome {
    Completed(DiscoveryReport),
    Skipped,
}

/// Scheduler-owned run state. The flag is flipped only by the run wrapper
/// through `try_begin`; the guard restores it when the run finishes,
/// whether it returned or failed.
pub(crate) struct SyncState {
    running: AtomicBool,
    last_stock_sync: RwLock<Option<DateTime<Utc>>>,
    last_fund_sync: RwLock<Option<DateTime<Utc>>>,
    last_discovery_sync: RwLock<Option<DateTime<Utc>>>,
}

impl SyncState {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            last_stock_sync: RwLock::new(None),
            last_fund_sync: RwLock::new(None),
            last_discovery_sync: RwLock::new(None),
        }
    }

    pub(crate) fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard { state: self })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub(crate) struct RunGuard<'a> {
    state: &'a SyncState,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
    }
}

pub struct SyncScheduler {
    stock_source: Arc<dyn StockSource>,
    fund_source: Arc<dyn FundSource>,
    store: SharedMarketStore,
    pub(crate) state: SyncState,
    shutdown: watch::Sender<bool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    // Handle back to the owning Arc so the job loops can be spawned from
    // &self methods.
    self_handle: Weak<SyncScheduler>,
}

impl SyncScheduler {
    pub fn new(
        stock_source: Arc<dyn StockSource>,
        fund_source: Arc<dyn FundSource>,
        store: SharedMarketStore,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new_cyclic(|weak| Self {
            stock_source,
            fund_source,
            store,
            state: SyncState::new(),
            shutdown,
            tasks: StdMutex::new(Vec::new()),
            self_handle: weak.clone(),
        })
    }

    /// Spawn the recurring jobs. Calling this twice is a no-op.
    pub fn init_cron_jobs(&self) {
        let Some(scheduler) = self.self_handle.upgrade() else {
            return;
        };

        let mut tasks = self.tasks.lock().expect("scheduler task list poisoned");
        if !tasks.is_empty() {
            warn!("sync jobs already initialized");
            return;
        }

        tasks.push(tokio::spawn(scheduler.clone().stock_loop(self.shutdown.subscribe())));
        tasks.push(tokio::spawn(scheduler.clone().fund_loop(self.shutdown.subscribe())));
        tasks.push(tokio::spawn(scheduler.discovery_loop(self.shutdown.subscribe())));

        info!(
            stock_interval_secs = STOCK_SYNC_INTERVAL_SECS,
            fund_sync = %format!("{:02}:{:02} IST daily", FUND_SYNC_HOUR, FUND_SYNC_MINUTE),
            discovery = %format!("{:?} {:02}:{:02} IST weekly", DISCOVERY_WEEKDAY, DISCOVERY_HOUR, DISCOVERY_MINUTE),
            "sync jobs initialized"
        );
    }

    /// Signal the recurring jobs to stop. An in-flight run completes; the
    /// loops exit at their next scheduling point.
    pub fn stop_cron_jobs(&self) {
        let _ = self.shutdown.send(true);
        self.tasks.lock().expect("scheduler task list poisoned").clear();
        info!("sync jobs stopped");
    }

    async fn stock_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = interval(Duration::from_secs(STOCK_SYNC_INTERVAL_SECS));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if !market_hours::is_market_open() {
                        debug!("outside trading window, stock sync tick skipped");
                        continue;
                    }
                    self.force_sync_stocks().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("stock sync loop stopped");
    }

    async fn fund_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let delay = market_hours::delay_until_daily(FUND_SYNC_HOUR, FUND_SYNC_MINUTE);
            debug!(delay_secs = delay.as_secs(), "next fund sync scheduled");

            tokio::select! {
                _ = sleep(delay) => {
                    self.force_sync_mutual_funds().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("fund sync loop stopped");
    }

    async fn discovery_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let delay = market_hours::delay_until_weekly(
                DISCOVERY_WEEKDAY,
                DISCOVERY_HOUR,
                DISCOVERY_MINUTE,
            );
            debug!(delay_secs = delay.as_secs(), "next discovery probe scheduled");

            tokio::select! {
                _ = sleep(delay) => {
                    self.run_discovery().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("discovery loop stopped");
    }

    pub async fn force_sync_stocks(&self) -> SyncOutcome {
        let Some(_guard) = self.state.try_begin() else {
            info!(kind = "stocks", "sync already in progress, trigger dropped");
            return SyncOutcome::Skipped;
        };

        let tickers = self.store.stock_tickers().await;
        info!(tickers = tickers.len(), "stock sync started");

        let report = reconcile_stocks(
            self.stock_source.as_ref(),
            &self.store,
            &tickers,
            STOCK_BATCH_SIZE,
            Duration::from_millis(INTER_BATCH_DELAY_MS),
        )
        .await;

        *self.state.last_stock_sync.write().await = Some(Utc::now());
        if let Err(e) = self.store.save_snapshots().await {
            warn!(error = %e, "snapshot save failed after stock sync");
        }

        info!(
            fetched = report.fetched,
            skipped = report.skipped,
            failed_batches = report.failed_batches,
            "stock sync finished"
        );
        SyncOutcome::Completed(report)
    }

    pub async fn force_sync_mutual_funds(&self) -> SyncOutcome {
        let Some(_guard) = self.state.try_begin() else {
            info!(kind = "mutual_funds", "sync already in progress, trigger dropped");
            return SyncOutcome::Skipped;
        };

        let codes = self.store.fund_codes().await;
        info!(schemes = codes.len(), "mutual fund sync started");

        let report = reconcile_funds(
            self.fund_source.as_ref(),
            &self.store,
            &codes,
            FUND_BATCH_SIZE,
            Duration::from_millis(INTER_BATCH_DELAY_MS),
        )
        .await;

        *self.state.last_fund_sync.write().await = Some(Utc::now());
        if let Err(e) = self.store.save_snapshots().await {
            warn!(error = %e, "snapshot save failed after fund sync");
        }

        info!(
            fetched = report.fetched,
            skipped = report.skipped,
            failed_batches = report.failed_batches,
            "mutual fund sync finished"
        );
        SyncOutcome::Completed(report)
    }

    /// Probe the candidate universe for new penny stocks. Shares the run
    /// guard with the stock and fund syncs.
    pub async fn run_discovery(&self) -> DiscoveryOutcome {
        let Some(_guard) = self.state.try_begin() else {
            info!(kind = "discovery", "sync already in progress, trigger dropped");
            return DiscoveryOutcome::Skipped;
        };

        let candidates: Vec<String> = DISCOVERY_CANDIDATES.iter().map(|s| s.to_string()).collect();
        info!(candidates = candidates.len(), "discovery probe started");

        let report = discover_penny_stocks(
            self.stock_source.as_ref(),
            &self.store,
            &candidates,
            PENNY_PRICE_THRESHOLD,
        )
        .await;

        *self.state.last_discovery_sync.write().await = Some(Utc::now());
        if let Err(e) = self.store.save_snapshots().await {
            warn!(error = %e, "snapshot save failed after discovery");
        }

        info!(added = report.added.len(), probed = report.probed, "discovery probe finished");
        DiscoveryOutcome::Completed(report)
    }

    pub async fn get_sync_status(&self) -> SyncStatus {
        SyncStatus {
            is_running: self.state.is_running(),
            last_stock_sync: *self.state.last_stock_sync.read().await,
            last_mutual_fund_sync: *self.state.last_fund_sync.read().await,
            last_discovery_sync: *self.state.last_discovery_sync.read().await,
        }
    }
}
