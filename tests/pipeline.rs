//! End-to-end pipeline scenarios: feed pages flow through scan → storage +
//! dispatch → strategy execution → order queue, against in-memory stores
//! and stubbed venue surfaces.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use polyarb::client::clob::{
    CreateOrderArgs, CreateOrderOptions, OrderPlacement, OrderSide, PriceSource, VenueOrderApi,
};
use polyarb::client::contract::{ContractClient, ContractResult};
use polyarb::dispatch::{Dispatcher, DispatcherConfig, StrategyHandler};
use polyarb::engine::PipelineHub;
use polyarb::errors::{EngineError, EngineResult};
use polyarb::models::RawMarket;
use polyarb::orders::OrderQueue;
use polyarb::pipeline::scan::{MarketFeed, ScanConfig, ScanStage};
use polyarb::pipeline::storage::{StorageConfig, StorageStage};
use polyarb::store::MarketStore;
use polyarb::strategy::arb_long::ArbLongStrategy;
use polyarb::strategy::config::{StrategyConfigManager, StrategyKind};
use polyarb::strategy::mint_split::MintSplitStrategy;
use polyarb::client::gamma::ListParams;

struct RecordingVenue {
    placed: Mutex<Vec<(String, OrderSide, f64, f64)>>,
}

impl RecordingVenue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            placed: Mutex::new(Vec::new()),
        })
    }

    fn placements(&self) -> Vec<(String, OrderSide, f64, f64)> {
        self.placed.lock().clone()
    }
}

#[async_trait]
impl VenueOrderApi for RecordingVenue {
    async fn place(
        &self,
        args: CreateOrderArgs,
        _: CreateOrderOptions,
    ) -> Result<OrderPlacement, EngineError> {
        self.placed
            .lock()
            .push((args.token_id.clone(), args.side, args.price, args.size));
        Ok(OrderPlacement {
            success: true,
            order_id: Some(format!("venue-{}", args.token_id)),
            error_msg: None,
            transactions_hashes: None,
        })
    }

    async fn cancel(&self, _order_id: &str) -> Result<(), EngineError> {
        Ok(())
    }
}

struct RecordingContract {
    mints: AtomicU64,
}

impl RecordingContract {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            mints: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl ContractClient for RecordingContract {
    async fn mint_tokens(&self, _: &str, _: f64, _: usize) -> ContractResult {
        self.mints.fetch_add(1, Ordering::SeqCst);
        ContractResult {
            success: true,
            tx_hash: Some("0xmint".into()),
            error: None,
        }
    }

    async fn merge_tokens(&self, _: &str, _: f64, _: usize) -> ContractResult {
        ContractResult {
            success: true,
            tx_hash: Some("0xmerge".into()),
            error: None,
        }
    }

    async fn ensure_usdc_approval(&self, _: f64) -> Result<(), EngineError> {
        Ok(())
    }

    async fn get_usdc_balance(&self) -> Result<f64, EngineError> {
        Ok(10_000.0)
    }

    async fn get_token_balance(&self, _: &str) -> Result<f64, EngineError> {
        Ok(0.0)
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

struct StaticQuotes {
    prices: HashMap<String, f64>,
}

#[async_trait]
impl PriceSource for StaticQuotes {
    async fn price(&self, token_id: &str, _: OrderSide) -> Result<Option<f64>, EngineError> {
        Ok(self.prices.get(token_id).copied())
    }
}

struct PageFeed {
    pages: Vec<Vec<RawMarket>>,
}

#[async_trait]
impl MarketFeed for PageFeed {
    async fn fetch_page(&self, params: &ListParams) -> EngineResult<Vec<RawMarket>> {
        let offset = params.offset.unwrap_or(0);
        let limit = params.limit.unwrap_or(100).max(1);
        let index = (offset / limit) as usize;
        Ok(self.pages.get(index).cloned().unwrap_or_default())
    }
}

fn raw_market(id: &str, outcomes: &[(&str, f64)], liquidity: f64) -> RawMarket {
    RawMarket {
        condition_id: Some(id.to_string()),
        question: Some(format!("Question {}?", id)),
        slug: Some(format!("slug-{}", id)),
        outcomes: outcomes.iter().map(|(o, _)| o.to_string()).collect(),
        outcome_prices: outcomes.iter().map(|(_, p)| *p).collect(),
        clob_token_ids: outcomes
            .iter()
            .map(|(o, _)| format!("{}-{}", id, o.to_lowercase()))
            .collect(),
        enable_order_book: Some(true),
        active: Some(true),
        closed: Some(false),
        liquidity: Some(liquidity),
        volume_24h: Some(liquidity),
        ..Default::default()
    }
}

struct Fixture {
    store: Arc<MarketStore>,
    config: Arc<StrategyConfigManager>,
    venue: Arc<RecordingVenue>,
    contract: Arc<RecordingContract>,
    orders: Arc<OrderQueue>,
    mint_split: Arc<MintSplitStrategy>,
    arb_long: Arc<ArbLongStrategy>,
    dispatcher: Arc<Dispatcher>,
    storage: Arc<StorageStage>,
}

impl Fixture {
    fn new(quotes: HashMap<String, f64>, strategy_config: serde_json::Value) -> Self {
        let store = Arc::new(MarketStore::in_memory().unwrap());
        let config = Arc::new(StrategyConfigManager::default());
        config.update(&strategy_config).unwrap();

        let venue = RecordingVenue::new();
        let contract = RecordingContract::new();
        let orders = OrderQueue::new(venue.clone(), contract.clone(), 0.015);

        let mint_split =
            MintSplitStrategy::new(config.clone(), orders.clone(), contract.clone());
        let arb_long = ArbLongStrategy::new(
            config.clone(),
            orders.clone(),
            Arc::new(StaticQuotes { prices: quotes }),
        );
        let handlers: Vec<Arc<dyn StrategyHandler>> =
            vec![mint_split.clone() as _, arb_long.clone() as _];
        let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default(), handlers));
        let storage = StorageStage::new(store.clone(), StorageConfig::default());

        Self {
            store,
            config,
            venue,
            contract,
            orders,
            mint_split,
            arb_long,
            dispatcher,
            storage,
        }
    }

    fn start(&self) {
        self.orders.start();
        self.mint_split.start();
        self.arb_long.start();
    }

    fn scan_stage(&self, feed: PageFeed, page_limit: u32) -> Arc<ScanStage> {
        let hub = PipelineHub::new(
            self.storage.clone(),
            self.dispatcher.clone(),
            self.orders.clone(),
        );
        ScanStage::new(
            Arc::new(feed),
            hub,
            ScanConfig {
                max_pages: 10,
                page_limit,
                ..Default::default()
            },
        )
    }
}

fn auto_execute_config() -> serde_json::Value {
    serde_json::json!({
        "global": { "enabled": true, "max_daily_volume": 100_000.0 },
        "mint_split": {
            "enabled": true,
            "auto_execute": true,
            "min_price_sum": 1.005,
            "min_outcomes": 3,
            "min_liquidity": 100.0,
            "mint_amount": 100.0,
            "max_mint_per_trade": 100.0,
            "max_mint_per_day": 1000.0
        },
        "arbitrage_long": {
            "enabled": true,
            "auto_execute": true,
            "long": { "enabled": true, "max_price_sum": 0.995, "min_spread": 0.5 },
            "trade_amount": 100.0,
            "max_slippage": 1.0,
            "min_liquidity": 100.0,
            "max_trade_per_order": 100.0,
            "max_trade_per_day": 1000.0
        }
    })
}

#[tokio::test]
async fn scan_page_flows_to_storage_and_execution() {
    // C1: mint-split (sum 1.05); C2: arbitrage-long (sum 0.95); C3: fair.
    let quotes = HashMap::from([
        ("c2-yes".to_string(), 0.48),
        ("c2-no".to_string(), 0.47),
    ]);
    let fixture = Fixture::new(quotes, auto_execute_config());
    fixture.start();

    let page = vec![
        raw_market("c1", &[("A", 0.35), ("B", 0.38), ("C", 0.32)], 1_000.0),
        raw_market("c2", &[("Yes", 0.48), ("No", 0.47)], 1_000.0),
        raw_market("c3", &[("Yes", 0.50), ("No", 0.50)], 1_000.0),
    ];
    let scan = fixture.scan_stage(PageFeed { pages: vec![page] }, 100);
    scan.run_cycle().await;

    // Storage: all three markets and one snapshot each.
    assert_eq!(fixture.store.count_markets().unwrap(), 3);
    assert_eq!(fixture.store.count_snapshots().unwrap(), 3);

    // Mint-split: one on-chain mint plus one sell per outcome of C1.
    assert_eq!(fixture.contract.mints.load(Ordering::SeqCst), 1);
    let placements = fixture.venue.placements();
    let c1_sells: Vec<_> = placements
        .iter()
        .filter(|(token, side, _, _)| token.starts_with("c1-") && *side == OrderSide::Sell)
        .collect();
    assert_eq!(c1_sells.len(), 3);
    assert!(c1_sells.iter().all(|(_, _, _, size)| (*size - 100.0).abs() < 1e-9));

    // Arbitrage-long: a buy per outcome of C2 at the listed prices.
    let c2_buys: Vec<_> = placements
        .iter()
        .filter(|(token, side, _, _)| token.starts_with("c2-") && *side == OrderSide::Buy)
        .collect();
    assert_eq!(c2_buys.len(), 2);
    let buy_prices: Vec<f64> = c2_buys.iter().map(|(_, _, p, _)| *p).collect();
    assert!(buy_prices.contains(&0.48) && buy_prices.contains(&0.47));

    // C3 produced no orders.
    assert!(placements.iter().all(|(token, _, _, _)| !token.starts_with("c3-")));

    // Daily ledger credited both strategies.
    let stats = fixture.config.get_daily_stats();
    assert!((stats.per_strategy[&StrategyKind::MintSplit] - 100.0).abs() < 1e-9);
    assert!((stats.per_strategy[&StrategyKind::ArbitrageLong] - 100.0).abs() < 1e-9);

    // Strategy day stats observed one success each.
    assert_eq!(fixture.mint_split.day_stats().success, 1);
    assert_eq!(fixture.arb_long.day_stats().success, 1);

    fixture.orders.stop();
}

#[tokio::test]
async fn second_cycle_is_suppressed_by_cooldowns() {
    let quotes = HashMap::from([
        ("c2-yes".to_string(), 0.48),
        ("c2-no".to_string(), 0.47),
    ]);
    let fixture = Fixture::new(quotes, auto_execute_config());
    fixture.start();

    let page = vec![raw_market("c2", &[("Yes", 0.48), ("No", 0.47)], 1_000.0)];
    let scan = fixture.scan_stage(
        PageFeed {
            pages: vec![page.clone()],
        },
        100,
    );

    scan.run_cycle().await;
    scan.run_cycle().await;

    // One execution only: the strategy's own cooldown (and the dispatcher's)
    // swallow the second pass.
    let buys = fixture
        .venue
        .placements()
        .iter()
        .filter(|(_, side, _, _)| *side == OrderSide::Buy)
        .count();
    assert_eq!(buys, 2, "exactly one two-leg execution");

    let stats = fixture.config.get_daily_stats();
    assert!((stats.per_strategy[&StrategyKind::ArbitrageLong] - 100.0).abs() < 1e-9);

    fixture.orders.stop();
}

#[tokio::test]
async fn daily_cap_stops_third_mint() {
    let mut config = auto_execute_config();
    config["mint_split"]["max_mint_per_day"] = serde_json::json!(200.0);
    let fixture = Fixture::new(HashMap::new(), config);
    fixture.start();

    let page = vec![
        raw_market("m1", &[("A", 0.35), ("B", 0.38), ("C", 0.32)], 1_000.0),
        raw_market("m2", &[("A", 0.35), ("B", 0.38), ("C", 0.32)], 1_000.0),
        raw_market("m3", &[("A", 0.35), ("B", 0.38), ("C", 0.32)], 1_000.0),
    ];
    let scan = fixture.scan_stage(PageFeed { pages: vec![page] }, 100);
    scan.run_cycle().await;

    // Two mints fit under the $200 cap; the third is gated.
    assert_eq!(fixture.contract.mints.load(Ordering::SeqCst), 2);
    let stats = fixture.config.get_daily_stats();
    assert!((stats.per_strategy[&StrategyKind::MintSplit] - 200.0).abs() < 1e-9);

    let gate = fixture
        .config
        .can_execute_trade(StrategyKind::MintSplit, 100.0);
    assert!(!gate.allowed);
    assert!(gate.reason.unwrap().contains("daily limit"));

    fixture.orders.stop();
}

#[tokio::test]
async fn multi_page_crawl_drains_between_pages() {
    let fixture = Fixture::new(HashMap::new(), auto_execute_config());
    fixture.start();

    // Two full pages of two markets, then a short page of one.
    let pages = vec![
        vec![
            raw_market("p1a", &[("Yes", 0.5), ("No", 0.5)], 10.0),
            raw_market("p1b", &[("Yes", 0.5), ("No", 0.5)], 10.0),
        ],
        vec![
            raw_market("p2a", &[("Yes", 0.5), ("No", 0.5)], 10.0),
            raw_market("p2b", &[("Yes", 0.5), ("No", 0.5)], 10.0),
        ],
        vec![raw_market("p3a", &[("Yes", 0.5), ("No", 0.5)], 10.0)],
    ];
    let scan = fixture.scan_stage(PageFeed { pages }, 2);
    scan.run_cycle().await;

    assert_eq!(fixture.store.count_markets().unwrap(), 5);
    let status = scan.status();
    assert_eq!(status.stats.pages_fetched, 3);
    assert_eq!(status.stats.markets_scanned, 5);
    // Replaying the same crawl only appends snapshots.
    scan.run_cycle().await;
    assert_eq!(fixture.store.count_markets().unwrap(), 5);
    assert_eq!(fixture.store.count_snapshots().unwrap(), 10);

    fixture.orders.stop();
}
