//! Market-Making strategy.
//!
//! Dual-side quoting around the mid price of qualifying markets. Per market
//! the strategy keeps a `MarketMakingState` with its open quotes and
//! inventory; a single refresh timer re-quotes every active market each
//! `refresh_interval_ms`, and offsetting inventory above the merge
//! threshold is redeemed on-chain.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::clob::{OrderSide, PriceSource};
use crate::client::contract::ContractClient;
use crate::dispatch::{DispatchTask, StrategyHandler};
use crate::models::MarketData;
use crate::orders::{OrderPriority, OrderQueue, OrderSpec};
use crate::strategy::config::{StrategyConfigManager, StrategyKind};
use crate::strategy::{
    in_cooldown, now_ms, Confidence, DayStats, DayStatsCell, StrategyMatch, StrategyRunner,
    StrategyWorker,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketMakingStatus {
    Active,
    Exiting,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenQuote {
    pub venue_order_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketMakingState {
    pub condition_id: String,
    pub token_id: String,
    pub open_orders: Vec<OpenQuote>,
    /// Long inventory in the quoted token.
    pub position_long: f64,
    /// Inventory in the complementary token.
    pub position_short: f64,
    pub inventory_skew: f64,
    pub last_mid: f64,
    pub last_refresh_ms: i64,
    pub status: MarketMakingStatus,
    pub total_profit: f64,
    pub total_volume: f64,
}

/// Symmetric quotes around `mid`, leaned against inventory: positive skew
/// (long-heavy) lowers both quotes to favor selling down.
pub fn compute_quotes(mid: f64, spread_percent: f64, skew: f64) -> (f64, f64) {
    let half_spread = spread_percent / 200.0;
    let lean = -skew * half_spread * 0.5;
    let center = mid + lean;
    let bid = (center - half_spread).clamp(0.01, 0.99);
    let ask = (center + half_spread).clamp(0.01, 0.99);
    (bid, ask)
}

pub struct MarketMakingStrategy {
    config: Arc<StrategyConfigManager>,
    orders: Arc<OrderQueue>,
    quotes: Arc<dyn PriceSource>,
    contract: Arc<dyn ContractClient>,
    states: Mutex<HashMap<String, MarketMakingState>>,
    cooldowns: Mutex<HashMap<String, i64>>,
    stats: DayStatsCell,
    worker: OnceLock<StrategyWorker>,
    refresh_stop: Mutex<Option<watch::Sender<bool>>>,
}

impl MarketMakingStrategy {
    pub fn new(
        config: Arc<StrategyConfigManager>,
        orders: Arc<OrderQueue>,
        quotes: Arc<dyn PriceSource>,
        contract: Arc<dyn ContractClient>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            orders,
            quotes,
            contract,
            states: Mutex::new(HashMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
            stats: DayStatsCell::default(),
            worker: OnceLock::new(),
            refresh_stop: Mutex::new(None),
        })
    }

    /// Spawn the serialized worker and the quote refresh timer.
    pub fn start(self: &Arc<Self>) {
        let _ = self.worker.set(StrategyWorker::spawn(Arc::clone(self)));

        let (stop_tx, mut stop_rx) = watch::channel(false);
        *self.refresh_stop.lock() = Some(stop_tx);
        let strategy = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let interval_ms = strategy.config.get().market_making.refresh_interval_ms;
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(interval_ms.max(100))) => {}
                    _ = stop_rx.changed() => break,
                }
                if *stop_rx.borrow() {
                    break;
                }
                let active: Vec<String> = strategy
                    .states
                    .lock()
                    .values()
                    .filter(|s| s.status == MarketMakingStatus::Active)
                    .map(|s| s.condition_id.clone())
                    .collect();
                for condition_id in active {
                    strategy.refresh_orders(&condition_id).await;
                }
            }
        });
    }

    pub async fn stop_all(&self) {
        if let Some(tx) = self.refresh_stop.lock().take() {
            let _ = tx.send(true);
        }
        let markets: Vec<String> = self.states.lock().keys().cloned().collect();
        for condition_id in markets {
            self.exit_market(&condition_id).await;
        }
        if let Some(worker) = self.worker.get() {
            worker.stop();
        }
    }

    pub fn day_stats(&self) -> DayStats {
        self.stats.snapshot()
    }

    pub fn state_of(&self, condition_id: &str) -> Option<MarketMakingState> {
        self.states.lock().get(condition_id).cloned()
    }

    pub fn active_market_count(&self) -> usize {
        self.states.lock().len()
    }

    pub fn detect(&self, market: &MarketData) -> Option<(Confidence, f64, String)> {
        let cfg = self.config.get().market_making;
        if !cfg.enabled || !market.has_order_book() {
            return None;
        }
        if in_cooldown(
            self.cooldowns.lock().get(&market.condition_id).copied(),
            now_ms(),
            cfg.cooldown_ms,
        ) {
            return None;
        }
        let mid = market.mid_price()?;
        if mid < cfg.price_range_min || mid > cfg.price_range_max {
            return None;
        }
        let liquidity = market.liquidity_usd();
        if liquidity < cfg.min_liquidity {
            return None;
        }
        let volume_24h = market.volume_24h_usd();
        if volume_24h < cfg.min_volume_24h {
            return None;
        }
        let (bid, ask) = (market.best_bid?, market.best_ask?);
        let market_spread_pct = (ask - bid) * 100.0;
        if market_spread_pct < cfg.spread_percent / 2.0 {
            return None;
        }
        if market_spread_pct > cfg.max_market_spread {
            return None;
        }

        // Confidence scales with how comfortably the market clears the
        // liquidity, volume, and spread floors.
        let ratios = [
            liquidity / cfg.min_liquidity,
            volume_24h / cfg.min_volume_24h,
            market_spread_pct / (cfg.spread_percent / 2.0),
        ];
        let confidence = if ratios.iter().all(|&r| r >= 2.0) {
            Confidence::High
        } else if ratios.iter().all(|&r| r >= 1.25) {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        let estimated_profit =
            cfg.order_size * (market_spread_pct / 100.0) / 2.0 * (1.0 - cfg.estimated_fee_rate);
        let reason = format!(
            "spread {:.2}pp, liquidity ${:.0}, 24h volume ${:.0}",
            market_spread_pct, liquidity, volume_24h
        );
        Some((confidence, estimated_profit, reason))
    }

    /// Place the initial two-sided quotes and register the market state.
    pub async fn enter_market(&self, market: &MarketData) -> bool {
        let cfg = self.config.get().market_making;
        let condition_id = market.condition_id.clone();
        if self.states.lock().contains_key(&condition_id) {
            return false;
        }
        let Some(mid) = market.mid_price() else {
            return false;
        };
        let Some(token_id) = market.clob_token_ids.first().cloned() else {
            return false;
        };
        let size = cfg.max_position_per_side / 2.0;
        let gate = self.config.can_execute_trade(StrategyKind::MarketMaking, size);
        if !gate.allowed {
            info!(
                condition_id = %condition_id,
                reason = gate.reason.as_deref().unwrap_or(""),
                "market-making entry gated"
            );
            return false;
        }

        let (bid, ask) = compute_quotes(mid, cfg.spread_percent, 0.0);
        let open_orders = self
            .place_quotes(&condition_id, &token_id, bid, ask, size)
            .await;
        if open_orders.is_empty() {
            warn!(condition_id = %condition_id, "entry failed: no quote accepted");
            return false;
        }

        self.states.lock().insert(
            condition_id.clone(),
            MarketMakingState {
                condition_id: condition_id.clone(),
                token_id,
                open_orders,
                position_long: 0.0,
                position_short: 0.0,
                inventory_skew: 0.0,
                last_mid: mid,
                last_refresh_ms: now_ms(),
                status: MarketMakingStatus::Active,
                total_profit: 0.0,
                total_volume: 0.0,
            },
        );
        self.cooldowns.lock().insert(condition_id.clone(), now_ms());
        info!(condition_id = %condition_id, mid, bid, ask, size, "entered market");
        true
    }

    /// Replace the open quotes at the current mid. Open orders are
    /// reconciled against our own book once per tick.
    pub async fn refresh_orders(&self, condition_id: &str) {
        let cfg = self.config.get().market_making;
        let Some((token_id, previous, last_mid, skew)) = self.states.lock().get(condition_id).map(|s| {
            (
                s.token_id.clone(),
                s.open_orders.clone(),
                s.last_mid,
                s.inventory_skew,
            )
        }) else {
            return;
        };

        for quote in &previous {
            let result = self
                .orders
                .submit_and_wait(OrderSpec::cancel(
                    StrategyKind::MarketMaking,
                    condition_id.to_string(),
                    quote.venue_order_id.clone(),
                ))
                .await;
            if !result.success {
                debug!(
                    condition_id = %condition_id,
                    venue_order_id = %quote.venue_order_id,
                    "stale quote cancel failed"
                );
            }
        }

        let mid = match (
            self.quotes.price(&token_id, OrderSide::Buy).await,
            self.quotes.price(&token_id, OrderSide::Sell).await,
        ) {
            (Ok(Some(buy)), Ok(Some(sell))) => (buy + sell) / 2.0,
            _ => last_mid,
        };

        let (bid, ask) = compute_quotes(mid, cfg.spread_percent, skew);
        let size = cfg.max_position_per_side / 2.0;
        let open_orders = self
            .place_quotes(condition_id, &token_id, bid, ask, size)
            .await;

        if let Some(state) = self.states.lock().get_mut(condition_id) {
            state.open_orders = open_orders;
            state.last_mid = mid;
            state.last_refresh_ms = now_ms();
        }

        if cfg.auto_merge {
            self.merge_positions(condition_id).await;
        }
    }

    /// Record an observed fill; inventory skew is re-derived.
    pub fn record_fill(&self, condition_id: &str, side: OrderSide, size: f64) {
        let cfg = self.config.get().market_making;
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(condition_id) {
            match side {
                OrderSide::Buy => state.position_long += size,
                OrderSide::Sell => state.position_short += size,
            }
            state.total_volume += size;
            let cap = cfg.max_position_per_side.max(1.0);
            state.inventory_skew = (state.position_long - state.position_short) / cap;
        }
    }

    /// Redeem offsetting double-sided holdings above the merge threshold.
    pub async fn merge_positions(&self, condition_id: &str) {
        let cfg = self.config.get().market_making;
        let paired = match self.states.lock().get(condition_id) {
            Some(state) => state.position_long.min(state.position_short),
            None => return,
        };
        if paired < cfg.merge_threshold {
            return;
        }
        if !self.contract.is_enabled() {
            debug!(condition_id = %condition_id, "merge skipped: signing unavailable");
            return;
        }
        let result = self
            .orders
            .submit_and_wait(
                OrderSpec::merge(StrategyKind::MarketMaking, condition_id.to_string(), paired, 2)
                    .with_priority(OrderPriority::High),
            )
            .await;
        if result.success {
            let mut states = self.states.lock();
            if let Some(state) = states.get_mut(condition_id) {
                state.position_long -= paired;
                state.position_short -= paired;
                let cap = cfg.max_position_per_side.max(1.0);
                state.inventory_skew = (state.position_long - state.position_short) / cap;
            }
            info!(condition_id = %condition_id, amount = paired, "positions merged");
        }
    }

    /// Cancel all quotes and drop the market state.
    pub async fn exit_market(&self, condition_id: &str) {
        let open = match self.states.lock().get_mut(condition_id) {
            Some(state) => {
                state.status = MarketMakingStatus::Exiting;
                state.open_orders.clone()
            }
            None => return,
        };
        for quote in open {
            let _ = self
                .orders
                .submit_and_wait(OrderSpec::cancel(
                    StrategyKind::MarketMaking,
                    condition_id.to_string(),
                    quote.venue_order_id,
                ))
                .await;
        }
        self.states.lock().remove(condition_id);
        info!(condition_id = %condition_id, "exited market");
    }

    async fn place_quotes(
        &self,
        condition_id: &str,
        token_id: &str,
        bid: f64,
        ask: f64,
        size: f64,
    ) -> Vec<OpenQuote> {
        let mut placed = Vec::new();
        for (side, price) in [(OrderSide::Buy, bid), (OrderSide::Sell, ask)] {
            let spec = match side {
                OrderSide::Buy => OrderSpec::buy(
                    StrategyKind::MarketMaking,
                    condition_id.to_string(),
                    token_id.to_string(),
                    price,
                    size,
                ),
                OrderSide::Sell => OrderSpec::sell(
                    StrategyKind::MarketMaking,
                    condition_id.to_string(),
                    token_id.to_string(),
                    price,
                    size,
                ),
            };
            let result = self.orders.submit_and_wait(spec).await;
            match (result.success, result.venue_order_id) {
                (true, Some(venue_order_id)) => {
                    self.config
                        .record_trade_volume(StrategyKind::MarketMaking, size);
                    placed.push(OpenQuote {
                        venue_order_id,
                        side,
                        price,
                        size,
                    });
                }
                _ => warn!(
                    condition_id = %condition_id,
                    side = side.as_str(),
                    price,
                    "quote placement failed"
                ),
            }
        }
        placed
    }
}

#[async_trait]
impl StrategyRunner for MarketMakingStrategy {
    async fn process(&self, task: DispatchTask) {
        if self.detect(&task.market).is_none() {
            debug!(condition_id = %task.market.condition_id, "market no longer quotable");
            return;
        }
        self.stats.record_found();
        let cfg = self.config.get().market_making;
        if !cfg.auto_execute {
            info!(
                condition_id = %task.market.condition_id,
                "market-making candidate detected (auto-execute off)"
            );
            return;
        }
        if self.enter_market(&task.market).await {
            self.stats.record_success(0.0);
        }
    }
}

#[async_trait]
impl StrategyHandler for MarketMakingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MarketMaking
    }

    fn classify(&self, market: &MarketData) -> Option<StrategyMatch> {
        let (confidence, estimated_profit, reason) = self.detect(market)?;
        Some(StrategyMatch::new(
            StrategyKind::MarketMaking,
            confidence,
            estimated_profit,
            reason,
        ))
    }

    fn dispatch(&self, task: DispatchTask) -> bool {
        match self.worker.get() {
            Some(worker) => worker.enqueue(task),
            None => false,
        }
    }

    async fn wait_until_idle(&self) {
        if let Some(worker) = self.worker.get() {
            worker.wait_until_idle().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::clob::{CreateOrderArgs, CreateOrderOptions, OrderPlacement, VenueOrderApi};
    use crate::errors::EngineError;
    use crate::models::RawMarket;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct StubVenue {
        counter: AtomicU64,
        cancelled: Mutex<Vec<String>>,
    }

    impl StubVenue {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                counter: AtomicU64::new(0),
                cancelled: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl VenueOrderApi for StubVenue {
        async fn place(
            &self,
            _args: CreateOrderArgs,
            _: CreateOrderOptions,
        ) -> Result<OrderPlacement, EngineError> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(OrderPlacement {
                success: true,
                order_id: Some(format!("q{}", n)),
                error_msg: None,
                transactions_hashes: None,
            })
        }

        async fn cancel(&self, order_id: &str) -> Result<(), EngineError> {
            self.cancelled.lock().push(order_id.to_string());
            Ok(())
        }
    }

    struct StubQuotes;

    #[async_trait]
    impl PriceSource for StubQuotes {
        async fn price(&self, _: &str, side: OrderSide) -> Result<Option<f64>, EngineError> {
            Ok(Some(match side {
                OrderSide::Buy => 0.58,
                OrderSide::Sell => 0.62,
            }))
        }
    }

    struct StubContract;

    #[async_trait]
    impl ContractClient for StubContract {
        async fn mint_tokens(&self, _: &str, _: f64, _: usize) -> crate::client::contract::ContractResult {
            crate::client::contract::ContractResult {
                success: true,
                tx_hash: Some("0x1".into()),
                error: None,
            }
        }

        async fn merge_tokens(&self, _: &str, _: f64, _: usize) -> crate::client::contract::ContractResult {
            crate::client::contract::ContractResult {
                success: true,
                tx_hash: Some("0x2".into()),
                error: None,
            }
        }

        async fn ensure_usdc_approval(&self, _: f64) -> Result<(), EngineError> {
            Ok(())
        }

        async fn get_usdc_balance(&self) -> Result<f64, EngineError> {
            Ok(1_000.0)
        }

        async fn get_token_balance(&self, _: &str) -> Result<f64, EngineError> {
            Ok(0.0)
        }

        fn is_enabled(&self) -> bool {
            true
        }
    }

    fn quotable_market() -> MarketData {
        MarketData::try_from(RawMarket {
            condition_id: Some("mm1".into()),
            question: Some("quote me".into()),
            outcomes: vec!["Yes".into(), "No".into()],
            outcome_prices: vec![0.6, 0.4],
            clob_token_ids: vec!["yes".into(), "no".into()],
            enable_order_book: Some(true),
            active: Some(true),
            best_bid: Some(0.58),
            best_ask: Some(0.62),
            liquidity: Some(5_000.0),
            volume_24h: Some(10_000.0),
            ..Default::default()
        })
        .unwrap()
    }

    fn strategy() -> (Arc<MarketMakingStrategy>, Arc<StubVenue>) {
        let manager = Arc::new(StrategyConfigManager::default());
        manager
            .update(&serde_json::json!({
                "market_making": {
                    "enabled": true,
                    "auto_execute": true,
                    "spread_percent": 2.0,
                    "max_position_per_side": 100.0,
                    "min_liquidity": 500.0,
                    "min_volume_24h": 1000.0,
                    "merge_threshold": 10.0,
                    "max_open_position": 10000.0,
                    "order_size": 50.0
                }
            }))
            .unwrap();
        let venue = StubVenue::new();
        let queue = OrderQueue::new(venue.clone(), Arc::new(StubContract), 0.015);
        queue.start();
        let strategy =
            MarketMakingStrategy::new(manager, queue, Arc::new(StubQuotes), Arc::new(StubContract));
        (strategy, venue)
    }

    #[test]
    fn quotes_straddle_mid_and_lean_against_inventory() {
        let (bid, ask) = compute_quotes(0.60, 2.0, 0.0);
        assert!((bid - 0.59).abs() < 1e-12);
        assert!((ask - 0.61).abs() < 1e-12);

        // Long-heavy book leans both quotes down.
        let (lean_bid, lean_ask) = compute_quotes(0.60, 2.0, 1.0);
        assert!(lean_bid < bid);
        assert!(lean_ask < ask);

        // Quotes never escape the valid price band.
        let (low_bid, _) = compute_quotes(0.01, 2.0, 0.0);
        assert!(low_bid >= 0.01);
    }

    #[tokio::test]
    async fn detection_grades_market_quality() {
        let (strategy, _) = strategy();
        let market = quotable_market();
        let (confidence, profit, _) = strategy.detect(&market).expect("quotable");
        // 10x liquidity, 10x volume, 4x spread floor → HIGH.
        assert_eq!(confidence, Confidence::High);
        assert!(profit > 0.0);

        let mut tight = market.clone();
        tight.best_ask = Some(0.581); // 0.1pp spread, below spread_percent/2
        assert!(strategy.detect(&tight).is_none());

        let mut edge = market.clone();
        edge.best_bid = Some(0.02);
        edge.best_ask = Some(0.04);
        assert!(strategy.detect(&edge).is_none(), "mid outside price range");
    }

    #[tokio::test]
    async fn enter_refresh_and_exit_lifecycle() {
        let (strategy, venue) = strategy();
        let market = quotable_market();

        assert!(strategy.enter_market(&market).await);
        let state = strategy.state_of("mm1").unwrap();
        assert_eq!(state.open_orders.len(), 2);
        assert_eq!(state.status, MarketMakingStatus::Active);
        let first_ids: Vec<String> = state
            .open_orders
            .iter()
            .map(|q| q.venue_order_id.clone())
            .collect();

        strategy.refresh_orders("mm1").await;
        let state = strategy.state_of("mm1").unwrap();
        assert_eq!(state.open_orders.len(), 2);
        // Old quotes were cancelled and replaced.
        let cancelled = venue.cancelled.lock().clone();
        for id in &first_ids {
            assert!(cancelled.contains(id));
        }
        assert!((state.last_mid - 0.60).abs() < 1e-9);

        strategy.exit_market("mm1").await;
        assert!(strategy.state_of("mm1").is_none());
    }

    #[tokio::test]
    async fn offsetting_inventory_merges_above_threshold() {
        let (strategy, _) = strategy();
        let market = quotable_market();
        assert!(strategy.enter_market(&market).await);

        strategy.record_fill("mm1", OrderSide::Buy, 25.0);
        strategy.record_fill("mm1", OrderSide::Sell, 18.0);
        let state = strategy.state_of("mm1").unwrap();
        assert!((state.inventory_skew - 0.07).abs() < 1e-9);

        strategy.merge_positions("mm1").await;
        let state = strategy.state_of("mm1").unwrap();
        // 18 paired shares redeemed.
        assert!((state.position_long - 7.0).abs() < 1e-9);
        assert!((state.position_short - 0.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn below_threshold_inventory_is_left_alone() {
        let (strategy, _) = strategy();
        let market = quotable_market();
        assert!(strategy.enter_market(&market).await);
        strategy.record_fill("mm1", OrderSide::Buy, 5.0);
        strategy.record_fill("mm1", OrderSide::Sell, 5.0);
        strategy.merge_positions("mm1").await;
        let state = strategy.state_of("mm1").unwrap();
        assert!((state.position_long - 5.0).abs() < 1e-9);
    }
}
