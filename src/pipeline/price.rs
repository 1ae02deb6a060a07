//! Price stage.
//!
//! Independent periodic loop that re-fetches precise bid/ask quotes for
//! stored tokens and records `market_prices` rows. At most one scan is in
//! flight; rows with both sides unknown or any non-finite numeric are
//! dropped before persistence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::client::clob::{OrderSide, PriceSource};
use crate::models::MarketPrice;
use crate::pipeline::StageState;
use crate::store::MarketStore;

#[derive(Debug, Clone)]
pub struct PriceScanConfig {
    /// Per-cycle cap on fetched tokens.
    pub batch_size: usize,
    pub token_interval: Duration,
    pub batch_interval: Duration,
    pub scan_interval: Duration,
    pub active_only: bool,
    pub min_liquidity: f64,
}

impl Default for PriceScanConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            token_interval: Duration::from_millis(100),
            batch_interval: Duration::from_secs(1),
            scan_interval: Duration::from_secs(60),
            active_only: true,
            min_liquidity: 100.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PriceStats {
    pub scans: u64,
    pub tokens_fetched: u64,
    pub rows_written: u64,
    pub rows_dropped: u64,
    pub errors: u64,
    pub last_scan_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceStatus {
    pub state: StageState,
    pub stats: PriceStats,
}

pub struct PriceStage {
    store: Arc<MarketStore>,
    quotes: Arc<dyn PriceSource>,
    config: Mutex<PriceScanConfig>,
    state: Mutex<StageState>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    stats: Mutex<PriceStats>,
    /// Guarantees at most one scan in flight.
    scan_lock: AsyncMutex<()>,
}

impl PriceStage {
    pub fn new(
        store: Arc<MarketStore>,
        quotes: Arc<dyn PriceSource>,
        config: PriceScanConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            quotes,
            config: Mutex::new(config),
            state: Mutex::new(StageState::Stopped),
            stop_tx: Mutex::new(None),
            stats: Mutex::new(PriceStats::default()),
            scan_lock: AsyncMutex::new(()),
        })
    }

    pub fn state(&self) -> StageState {
        *self.state.lock()
    }

    pub fn status(&self) -> PriceStatus {
        PriceStatus {
            state: self.state(),
            stats: self.stats.lock().clone(),
        }
    }

    pub fn set_config(&self, config: PriceScanConfig) {
        *self.config.lock() = config;
    }

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
            info!("price stage started");
            let mut last_scan: Option<Instant> = None;
            loop {
                if stage.state() == StageState::Stopped {
                    break;
                }
                let scan_interval = stage.config.lock().scan_interval;
                let due = last_scan
                    .map(|t| t.elapsed() >= scan_interval)
                    .unwrap_or(true);

                let mut pause = Duration::from_secs(1);
                if due {
                    match stage.run_scan().await {
                        Ok(_) => last_scan = Some(Instant::now()),
                        Err(e) => {
                            warn!(error = %e, "price scan failed");
                            stage.stats.lock().errors += 1;
                            pause = Duration::from_secs(5);
                        }
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = stop_rx.changed() => {}
                }
            }
            info!("price stage stopped");
        });
    }

    pub fn stop(&self) {
        *self.state.lock() = StageState::Stopped;
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(true);
        }
    }

    /// One precise-price sweep over the eligible stored tokens.
    pub async fn run_scan(&self) -> anyhow::Result<usize> {
        let Ok(_guard) = self.scan_lock.try_lock() else {
            debug!("price scan already in flight");
            return Ok(0);
        };
        let config = self.config.lock().clone();

        let markets = {
            let store = Arc::clone(&self.store);
            let active_only = config.active_only;
            tokio::task::spawn_blocking(move || store.get_markets_for_price_scan(active_only))
                .await??
        };

        // Flatten to (condition, token, outcome, index) and cap per cycle.
        let mut targets = Vec::new();
        for market in markets {
            if market.liquidity.unwrap_or(0.0) < config.min_liquidity {
                continue;
            }
            for (index, token_id) in market.clob_token_ids.iter().enumerate() {
                let outcome = market
                    .outcomes
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| format!("outcome-{}", index));
                targets.push((
                    market.condition_id.clone(),
                    token_id.clone(),
                    outcome,
                    index,
                ));
            }
        }
        targets.truncate(config.batch_size);
        if targets.is_empty() {
            return Ok(0);
        }

        let mut rows = Vec::with_capacity(targets.len());
        let mut dropped = 0usize;
        let total = targets.len();
        for (position, (condition_id, token_id, outcome, index)) in targets.into_iter().enumerate()
        {
            let (buy, sell) = tokio::join!(
                self.quotes.price(&token_id, OrderSide::Buy),
                self.quotes.price(&token_id, OrderSide::Sell),
            );
            let buy = buy.unwrap_or(None);
            let sell = sell.unwrap_or(None);
            self.stats.lock().tokens_fetched += 1;

            let row = MarketPrice::new(
                condition_id,
                token_id,
                outcome,
                index,
                buy,
                sell,
                Utc::now(),
            );
            if row.is_persistable() {
                rows.push(row);
            } else {
                dropped += 1;
            }

            if position + 1 < total {
                tokio::time::sleep(config.token_interval).await;
            }
        }
        tokio::time::sleep(config.batch_interval).await;

        let written = if rows.is_empty() {
            0
        } else {
            let store = Arc::clone(&self.store);
            tokio::task::spawn_blocking(move || store.insert_market_prices_ignore_duplicates(&rows))
                .await??
        };

        {
            let mut stats = self.stats.lock();
            stats.scans += 1;
            stats.rows_written += written as u64;
            stats.rows_dropped += dropped as u64;
            stats.last_scan_ms = Some(Utc::now().timestamp_millis());
        }
        debug!(written, dropped, "price scan complete");
        Ok(written)
    }
}
