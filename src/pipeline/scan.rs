//! Scan stage.
//!
//! One-at-a-time pipeline producer: crawls the feed page by page, converts
//! each raw record, hands the page synchronously downstream, and waits for
//! the downstream queues to drain before fetching the next page. Memory
//! stays bounded at one page in flight, and strategies act on fresh data
//! while the crawl continues.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::gamma::{GammaClient, ListParams};
use crate::errors::EngineResult;
use crate::models::{MarketData, RawMarket};
use crate::pipeline::{StageListener, StageState};

const BACKPRESSURE_POLL: Duration = Duration::from_secs(1);
const FEED_RETRY_DELAY: Duration = Duration::from_secs(2);
const PAUSE_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub scan_interval: Duration,
    pub max_pages: u32,
    pub page_limit: u32,
    /// Base listing filter; limit/offset are overwritten per page.
    pub params: ListParams,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(3_600),
            max_pages: 50,
            page_limit: 100,
            params: ListParams {
                active: Some(true),
                closed: Some(false),
                ..Default::default()
            },
        }
    }
}

/// Feed seam; the production implementation is [`GammaClient`].
#[async_trait]
pub trait MarketFeed: Send + Sync {
    async fn fetch_page(&self, params: &ListParams) -> EngineResult<Vec<RawMarket>>;
}

#[async_trait]
impl MarketFeed for GammaClient {
    async fn fetch_page(&self, params: &ListParams) -> EngineResult<Vec<RawMarket>> {
        self.get_markets(params).await.into_result()
    }
}

/// What the scan hands each page to: the storage stage plus the dispatcher,
/// and the combined idle-wait across storage, strategies, and orders.
#[async_trait]
pub trait ScanDownstream: Send + Sync {
    fn has_backpressure(&self) -> bool;
    async fn on_markets_scanned(&self, markets: Vec<MarketData>);
    async fn wait_until_idle(&self);
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStats {
    pub cycles_completed: u64,
    pub pages_fetched: u64,
    pub markets_scanned: u64,
    pub convert_errors: u64,
    pub feed_errors: u64,
    pub backpressure_waits: u64,
    pub last_cycle_started_ms: Option<i64>,
    pub last_cycle_completed_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanStatus {
    pub state: StageState,
    pub stats: ScanStats,
}

pub struct ScanStage {
    feed: Arc<dyn MarketFeed>,
    downstream: Arc<dyn ScanDownstream>,
    config: Mutex<ScanConfig>,
    state: Mutex<StageState>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    stats: Mutex<ScanStats>,
    listeners: Mutex<Vec<Arc<dyn StageListener>>>,
}

impl ScanStage {
    pub fn new(
        feed: Arc<dyn MarketFeed>,
        downstream: Arc<dyn ScanDownstream>,
        config: ScanConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            feed,
            downstream,
            config: Mutex::new(config),
            state: Mutex::new(StageState::Stopped),
            stop_tx: Mutex::new(None),
            stats: Mutex::new(ScanStats::default()),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn add_listener(&self, listener: Arc<dyn StageListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn set_config(&self, config: ScanConfig) {
        *self.config.lock() = config;
    }

    pub fn state(&self) -> StageState {
        *self.state.lock()
    }

    pub fn status(&self) -> ScanStatus {
        ScanStatus {
            state: self.state(),
            stats: self.stats.lock().clone(),
        }
    }

    /// Spawn the scan loop. Only one loop runs at a time.
    pub fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state != StageState::Stopped {
                return;
            }
            *state = StageState::Running;
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        *self.stop_tx.lock() = Some(stop_tx);

        let stage = Arc::clone(self);
        tokio::spawn(async move {
            info!("scan stage started");
            loop {
                stage.run_cycle().await;
                if stage.state() == StageState::Stopped {
                    break;
                }
                let interval = stage.config.lock().scan_interval;
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop_rx.changed() => {}
                }
                if stage.state() == StageState::Stopped {
                    break;
                }
            }
            info!("scan stage stopped");
        });
    }

    pub fn pause(&self) {
        let mut state = self.state.lock();
        if *state == StageState::Running {
            *state = StageState::Paused;
            info!("scan stage paused");
        }
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        if *state == StageState::Paused {
            *state = StageState::Running;
            info!("scan stage resumed");
        }
    }

    /// Drop inflight work and return to `stopped`; pending pages are not
    /// fetched.
    pub fn stop(&self) {
        *self.state.lock() = StageState::Stopped;
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(true);
        }
    }

    fn stopped(&self) -> bool {
        self.state() == StageState::Stopped
    }

    fn notify_start(&self, label: &str) {
        for l in self.listeners.lock().iter() {
            l.on_task_start("scan", label);
        }
    }

    fn notify_complete(&self, label: &str, duration_ms: u64) {
        for l in self.listeners.lock().iter() {
            l.on_task_complete("scan", label, duration_ms);
        }
    }

    fn notify_error(&self, label: &str, error: &str) {
        for l in self.listeners.lock().iter() {
            l.on_task_error("scan", label, error);
        }
    }

    /// One full paginated crawl. Public so the control surface and tests
    /// can drive a single cycle.
    pub async fn run_cycle(&self) {
        let started = Instant::now();
        let (max_pages, page_limit, base_params) = {
            let config = self.config.lock();
            (config.max_pages, config.page_limit, config.params.clone())
        };
        self.stats.lock().last_cycle_started_ms = Some(chrono::Utc::now().timestamp_millis());
        self.notify_start("cycle");

        let mut total_markets = 0u64;
        for page in 1..=max_pages.max(1) {
            if self.stopped() {
                return;
            }
            while self.state() == StageState::Paused {
                tokio::time::sleep(PAUSE_POLL).await;
                if self.stopped() {
                    return;
                }
            }

            // Backpressure gate: do not advance the page while downstream
            // buffers are near capacity.
            while self.downstream.has_backpressure() {
                debug!(page, "downstream backpressure, waiting");
                self.stats.lock().backpressure_waits += 1;
                tokio::time::sleep(BACKPRESSURE_POLL).await;
                if self.stopped() {
                    return;
                }
            }

            let mut params = base_params.clone();
            params.limit = Some(page_limit);
            params.offset = Some((page - 1) * page_limit);

            let raw = match self.fetch_with_retry(&params, page).await {
                Some(raw) => raw,
                None => break,
            };
            let raw_count = raw.len();
            self.stats.lock().pages_fetched += 1;

            let mut converted = Vec::with_capacity(raw_count);
            for record in raw {
                match MarketData::try_from(record) {
                    Ok(market) => converted.push(market),
                    Err(e) => {
                        self.stats.lock().convert_errors += 1;
                        debug!(page, error = %e, "market conversion failed");
                    }
                }
            }
            total_markets += converted.len() as u64;
            self.stats.lock().markets_scanned += converted.len() as u64;

            self.downstream.on_markets_scanned(converted).await;
            self.downstream.wait_until_idle().await;

            if raw_count < page_limit as usize {
                debug!(page, raw_count, "short page, end of data");
                break;
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        {
            let mut stats = self.stats.lock();
            stats.cycles_completed += 1;
            stats.last_cycle_completed_ms = Some(chrono::Utc::now().timestamp_millis());
        }
        self.notify_complete("cycle", duration_ms);
        info!(markets = total_markets, duration_ms, "scan cycle complete");
    }

    /// One retry after a 2 s pause; a second failure ends the cycle while
    /// keeping earlier pages.
    async fn fetch_with_retry(&self, params: &ListParams, page: u32) -> Option<Vec<RawMarket>> {
        match self.feed.fetch_page(params).await {
            Ok(raw) => Some(raw),
            Err(first) => {
                warn!(page, error = %first, "feed page failed, retrying once");
                tokio::time::sleep(FEED_RETRY_DELAY).await;
                if self.stopped() {
                    return None;
                }
                match self.feed.fetch_page(params).await {
                    Ok(raw) => Some(raw),
                    Err(second) => {
                        self.stats.lock().feed_errors += 1;
                        self.notify_error("page", &second.to_string());
                        warn!(page, error = %second, "feed page failed twice, ending cycle");
                        None
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EngineError;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

    struct FakeFeed {
        pages: Vec<Vec<RawMarket>>,
        calls: AtomicU32,
        fail_first_calls: u32,
    }

    impl FakeFeed {
        fn with_pages(pages: Vec<Vec<RawMarket>>) -> Arc<Self> {
            Arc::new(Self {
                pages,
                calls: AtomicU32::new(0),
                fail_first_calls: 0,
            })
        }
    }

    #[async_trait]
    impl MarketFeed for FakeFeed {
        async fn fetch_page(&self, params: &ListParams) -> EngineResult<Vec<RawMarket>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first_calls {
                return Err(EngineError::ServerBusy(503));
            }
            let offset = params.offset.unwrap_or(0);
            let limit = params.limit.unwrap_or(100);
            let page_index = (offset / limit) as usize;
            Ok(self.pages.get(page_index).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct RecordingDownstream {
        pages: Mutex<Vec<usize>>,
        idle_waits: AtomicUsize,
        backpressure: AtomicBool,
    }

    #[async_trait]
    impl ScanDownstream for RecordingDownstream {
        fn has_backpressure(&self) -> bool {
            self.backpressure.load(Ordering::SeqCst)
        }

        async fn on_markets_scanned(&self, markets: Vec<MarketData>) {
            self.pages.lock().push(markets.len());
        }

        async fn wait_until_idle(&self) {
            self.idle_waits.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn raw(id: &str) -> RawMarket {
        RawMarket {
            condition_id: Some(id.to_string()),
            outcomes: vec!["Yes".into(), "No".into()],
            clob_token_ids: vec![format!("{}-y", id), format!("{}-n", id)],
            ..Default::default()
        }
    }

    fn page_of(n: usize, prefix: &str) -> Vec<RawMarket> {
        (0..n).map(|i| raw(&format!("{}-{}", prefix, i))).collect()
    }

    #[tokio::test]
    async fn cycle_pages_until_short_page() {
        let feed = FakeFeed::with_pages(vec![page_of(3, "a"), page_of(3, "b"), page_of(1, "c")]);
        let downstream = Arc::new(RecordingDownstream::default());
        let stage = ScanStage::new(
            feed,
            downstream.clone(),
            ScanConfig {
                max_pages: 10,
                page_limit: 3,
                ..Default::default()
            },
        );

        stage.run_cycle().await;

        assert_eq!(*downstream.pages.lock(), vec![3, 3, 1]);
        // One drain wait per page.
        assert_eq!(downstream.idle_waits.load(Ordering::SeqCst), 3);
        let stats = stage.status().stats;
        assert_eq!(stats.pages_fetched, 3);
        assert_eq!(stats.markets_scanned, 7);
        assert_eq!(stats.cycles_completed, 1);
    }

    #[tokio::test]
    async fn max_pages_caps_the_crawl() {
        let feed = FakeFeed::with_pages(vec![page_of(2, "a"), page_of(2, "b"), page_of(2, "c")]);
        let downstream = Arc::new(RecordingDownstream::default());
        let stage = ScanStage::new(
            feed,
            downstream.clone(),
            ScanConfig {
                max_pages: 2,
                page_limit: 2,
                ..Default::default()
            },
        );
        stage.run_cycle().await;
        assert_eq!(downstream.pages.lock().len(), 2);
    }

    #[tokio::test]
    async fn conversion_errors_skip_records_not_pages() {
        let mut page = page_of(2, "ok");
        page.push(RawMarket::default()); // no condition id
        let feed = FakeFeed::with_pages(vec![page]);
        let downstream = Arc::new(RecordingDownstream::default());
        let stage = ScanStage::new(
            feed,
            downstream.clone(),
            ScanConfig {
                max_pages: 1,
                page_limit: 5,
                ..Default::default()
            },
        );
        stage.run_cycle().await;
        assert_eq!(*downstream.pages.lock(), vec![2]);
        assert_eq!(stage.status().stats.convert_errors, 1);
    }

    #[tokio::test]
    async fn transient_feed_failure_is_retried_once() {
        let feed = Arc::new(FakeFeed {
            pages: vec![page_of(1, "a")],
            calls: AtomicU32::new(0),
            fail_first_calls: 1,
        });
        let downstream = Arc::new(RecordingDownstream::default());
        let stage = ScanStage::new(
            feed.clone(),
            downstream.clone(),
            ScanConfig {
                max_pages: 1,
                page_limit: 5,
                ..Default::default()
            },
        );
        stage.run_cycle().await;
        // First call failed, retry succeeded.
        assert_eq!(feed.calls.load(Ordering::SeqCst), 2);
        assert_eq!(*downstream.pages.lock(), vec![1]);
        assert_eq!(stage.status().stats.feed_errors, 0);
    }

    #[tokio::test]
    async fn persistent_feed_failure_ends_cycle_gracefully() {
        let feed = Arc::new(FakeFeed {
            pages: vec![page_of(5, "a"), page_of(5, "b")],
            calls: AtomicU32::new(0),
            fail_first_calls: 100,
        });
        let downstream = Arc::new(RecordingDownstream::default());
        let stage = ScanStage::new(
            feed,
            downstream.clone(),
            ScanConfig {
                max_pages: 2,
                page_limit: 5,
                ..Default::default()
            },
        );
        stage.run_cycle().await;
        assert!(downstream.pages.lock().is_empty());
        let stats = stage.status().stats;
        assert_eq!(stats.feed_errors, 1);
        assert_eq!(stats.cycles_completed, 1);
    }

    #[tokio::test]
    async fn backpressure_delays_page_fetch() {
        let feed = FakeFeed::with_pages(vec![page_of(1, "a")]);
        let downstream = Arc::new(RecordingDownstream::default());
        downstream.backpressure.store(true, Ordering::SeqCst);
        let stage = ScanStage::new(
            feed,
            downstream.clone(),
            ScanConfig {
                max_pages: 1,
                page_limit: 5,
                ..Default::default()
            },
        );

        let release = {
            let downstream = downstream.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1_200)).await;
                downstream.backpressure.store(false, Ordering::SeqCst);
            })
        };

        let started = Instant::now();
        stage.run_cycle().await;
        release.await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(1_000));
        assert_eq!(*downstream.pages.lock(), vec![1]);
        assert!(stage.status().stats.backpressure_waits >= 1);
    }

    #[tokio::test]
    async fn state_machine_transitions() {
        let feed = FakeFeed::with_pages(vec![]);
        let downstream = Arc::new(RecordingDownstream::default());
        let stage = ScanStage::new(feed, downstream, ScanConfig::default());

        assert_eq!(stage.state(), StageState::Stopped);
        stage.start();
        assert_eq!(stage.state(), StageState::Running);
        stage.pause();
        assert_eq!(stage.state(), StageState::Paused);
        stage.resume();
        assert_eq!(stage.state(), StageState::Running);
        stage.stop();
        assert_eq!(stage.state(), StageState::Stopped);
        // Pause on a stopped stage is a no-op.
        stage.pause();
        assert_eq!(stage.state(), StageState::Stopped);
    }
}
