//! Engine assembly.
//!
//! One `Engine` value owns the store, the venue clients, the pipeline
//! stages, the dispatcher, the strategies, and the order queue. It is
//! constructed in `main` and handed to the control surface; tests build a
//! fresh one instead of resetting globals. Lifecycle: construct →
//! `start()` → run → `shutdown()`.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::client::clob::ClobClient;
use crate::client::contract::{ContractClient, DisabledContractClient};
use crate::client::gamma::GammaClient;
use crate::client::log_sink::{
    LogSink, MemoryLogSink, MultiSink, RotatingFileSink, DEFAULT_LOG_MAX_BYTES,
};
use crate::config::EnvConfig;
use crate::dispatch::{Dispatcher, DispatcherConfig, StrategyHandler};
use crate::models::MarketData;
use crate::orders::OrderQueue;
use crate::pipeline::price::{PriceScanConfig, PriceStage};
use crate::pipeline::scan::{ScanConfig, ScanDownstream, ScanStage};
use crate::pipeline::storage::{StorageConfig, StorageStage};
use crate::store::MarketStore;
use crate::strategy::arb_long::ArbLongStrategy;
use crate::strategy::config::StrategyConfigManager;
use crate::strategy::market_making::MarketMakingStrategy;
use crate::strategy::mint_split::MintSplitStrategy;
use crate::strategy::TAKER_FEE_PCT;

/// Scan hand-off target: each page goes to storage and the dispatcher, and
/// the idle-wait spans storage, every strategy worker, and the order queue.
pub struct PipelineHub {
    storage: Arc<StorageStage>,
    dispatcher: Arc<Dispatcher>,
    orders: Arc<OrderQueue>,
}

impl PipelineHub {
    pub fn new(
        storage: Arc<StorageStage>,
        dispatcher: Arc<Dispatcher>,
        orders: Arc<OrderQueue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            dispatcher,
            orders,
        })
    }
}

#[async_trait]
impl ScanDownstream for PipelineHub {
    fn has_backpressure(&self) -> bool {
        self.storage.has_backpressure()
    }

    async fn on_markets_scanned(&self, markets: Vec<MarketData>) {
        self.dispatcher.analyze(&markets);
        self.storage.add(markets).await;
    }

    async fn wait_until_idle(&self) {
        self.storage.wait_until_idle().await;
        self.dispatcher.wait_until_idle().await;
        self.orders.wait_until_idle().await;
    }
}

pub struct Engine {
    pub env: EnvConfig,
    pub store: Arc<MarketStore>,
    pub gamma: Arc<GammaClient>,
    pub clob: Arc<ClobClient>,
    pub contract: Arc<dyn ContractClient>,
    pub config: Arc<StrategyConfigManager>,
    pub orders: Arc<OrderQueue>,
    pub mint_split: Arc<MintSplitStrategy>,
    pub arb_long: Arc<ArbLongStrategy>,
    pub market_making: Arc<MarketMakingStrategy>,
    pub dispatcher: Arc<Dispatcher>,
    pub storage: Arc<StorageStage>,
    pub scan: Arc<ScanStage>,
    pub price: Arc<PriceStage>,
    /// Recent request log, surfaced on the control API.
    pub request_log: Arc<MemoryLogSink>,
}

impl Engine {
    /// Build the engine with the default (disabled) contract capability.
    pub fn new(env: EnvConfig) -> Result<Arc<Self>> {
        let contract: Arc<dyn ContractClient> = Arc::new(DisabledContractClient);
        if env.signing_enabled() {
            // Order signing works through the CLOB client; the on-chain
            // transport still needs to be injected via `with_contract`.
            warn!("PRIVATE_KEY set but no contract transport wired; mint/merge stay disabled");
        }
        Self::with_contract(env, contract)
    }

    /// Build the engine around an operator-supplied contract capability.
    pub fn with_contract(env: EnvConfig, contract: Arc<dyn ContractClient>) -> Result<Arc<Self>> {
        let request_log = Arc::new(MemoryLogSink::new(1_000));
        let file_sink = RotatingFileSink::new(
            format!("{}/api-requests.log", env.log_dir),
            DEFAULT_LOG_MAX_BYTES,
        )
        .context("open request log")?;
        let sink: Arc<dyn LogSink> = Arc::new(MultiSink::new(vec![
            Arc::new(file_sink),
            Arc::clone(&request_log) as Arc<dyn LogSink>,
        ]));

        let store = Arc::new(MarketStore::open(&env.database_path).context("open store")?);
        let gamma = Arc::new(GammaClient::new(env.gamma_api_url.clone(), Arc::clone(&sink))?);
        let clob = Arc::new(ClobClient::new(
            env.clob_api_url.clone(),
            Arc::clone(&sink),
            env.signing_enabled(),
        )?);

        let config = Arc::new(StrategyConfigManager::default());
        let orders = OrderQueue::new(
            Arc::clone(&clob) as _,
            Arc::clone(&contract),
            TAKER_FEE_PCT,
        );

        let mint_split = MintSplitStrategy::new(
            Arc::clone(&config),
            Arc::clone(&orders),
            Arc::clone(&contract),
        );
        let arb_long = ArbLongStrategy::new(
            Arc::clone(&config),
            Arc::clone(&orders),
            Arc::clone(&clob) as _,
        );
        let market_making = MarketMakingStrategy::new(
            Arc::clone(&config),
            Arc::clone(&orders),
            Arc::clone(&clob) as _,
            Arc::clone(&contract),
        );

        let handlers: Vec<Arc<dyn StrategyHandler>> = vec![
            Arc::clone(&mint_split) as _,
            Arc::clone(&arb_long) as _,
            Arc::clone(&market_making) as _,
        ];
        let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default(), handlers));

        let storage = StorageStage::new(Arc::clone(&store), StorageConfig::default());
        let hub = PipelineHub::new(
            Arc::clone(&storage),
            Arc::clone(&dispatcher),
            Arc::clone(&orders),
        );
        let scan = ScanStage::new(Arc::clone(&gamma) as _, hub, ScanConfig::default());
        let price = PriceStage::new(
            Arc::clone(&store),
            Arc::clone(&clob) as _,
            PriceScanConfig::default(),
        );

        Ok(Arc::new(Self {
            env,
            store,
            gamma,
            clob,
            contract,
            config,
            orders,
            mint_split,
            arb_long,
            market_making,
            dispatcher,
            storage,
            scan,
            price,
            request_log,
        }))
    }

    /// Bring every stage up. Order matters: consumers first, producer last.
    pub fn start(&self) {
        self.orders.start();
        self.mint_split.start();
        self.arb_long.start();
        self.market_making.start();
        self.storage.start();
        self.price.start();
        self.scan.start();
        info!("engine started");
    }

    /// Stop producers, drain what is buffered, then stop consumers.
    pub async fn shutdown(&self) {
        info!("engine shutting down");
        self.scan.stop();
        self.price.stop();
        self.market_making.stop_all().await;
        self.mint_split.stop();
        self.arb_long.stop();
        self.storage.wait_until_idle().await;
        self.storage.stop();
        self.orders.wait_until_idle().await;
        self.orders.stop();
        info!("engine stopped");
    }

    /// Aggregate queue/stage status for the control surface.
    pub fn queues_status(&self) -> serde_json::Value {
        serde_json::json!({
            "scan": self.scan.status(),
            "storage": self.storage.stats(),
            "price": self.price.status(),
            "orders": self.orders.status(),
            "dispatcher": self.dispatcher.stats(),
            "emergency_stop": self.config.is_emergency_stopped(),
        })
    }
}
