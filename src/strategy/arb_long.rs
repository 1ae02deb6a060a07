//! Arbitrage-Long strategy.
//!
//! Binary markets whose ask prices sum below 1: buy both outcomes, hold to
//! resolution, collect $1 per pair. A pre-execution slippage guard aborts
//! when live prices have drifted from the planned ones.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::clob::{OrderSide, PriceSource};
use crate::dispatch::{DispatchTask, StrategyHandler};
use crate::models::MarketData;
use crate::orders::{BatchSpec, OrderQueue, OrderSpec};
use crate::strategy::config::{ArbitrageLongConfig, StrategyConfigManager, StrategyKind};
use crate::strategy::{
    in_cooldown, now_ms, Confidence, DayStats, DayStatsCell, Opportunity, OpportunityState,
    StrategyMatch, StrategyRunner, StrategyWorker, MIN_TX_COST, TAKER_FEE_PCT,
};

#[derive(Debug, Clone)]
pub struct PlannedBuy {
    pub token_id: String,
    pub outcome: String,
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone)]
pub struct ArbLongPlan {
    pub opportunity_id: String,
    pub condition_id: String,
    pub size: f64,
    pub buys: Vec<PlannedBuy>,
    pub plan_price_sum: f64,
}

pub fn generate_execution_plan(
    opportunity: &Opportunity,
    market: &MarketData,
    config: &ArbitrageLongConfig,
) -> ArbLongPlan {
    let size = opportunity.suggested_amount.min(config.max_trade_per_order);
    let buys: Vec<PlannedBuy> = market
        .outcomes
        .iter()
        .zip(market.clob_token_ids.iter())
        .zip(opportunity.prices.iter())
        .map(|((outcome, token_id), &price)| PlannedBuy {
            token_id: token_id.clone(),
            outcome: outcome.clone(),
            price,
            size,
        })
        .collect();
    ArbLongPlan {
        opportunity_id: opportunity.id.clone(),
        condition_id: opportunity.condition_id.clone(),
        size,
        buys,
        plan_price_sum: opportunity.price_sum,
    }
}

/// Drift between planned and observed price sums, in percent of plan.
pub fn slippage_pct(plan_sum: f64, market_sum: f64) -> f64 {
    if plan_sum == 0.0 {
        return f64::INFINITY;
    }
    ((plan_sum - market_sum).abs() / plan_sum) * 100.0
}

pub struct ArbLongStrategy {
    config: Arc<StrategyConfigManager>,
    orders: Arc<OrderQueue>,
    quotes: Arc<dyn PriceSource>,
    cooldowns: Mutex<HashMap<String, i64>>,
    stats: DayStatsCell,
    worker: OnceLock<StrategyWorker>,
}

impl ArbLongStrategy {
    pub fn new(
        config: Arc<StrategyConfigManager>,
        orders: Arc<OrderQueue>,
        quotes: Arc<dyn PriceSource>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            orders,
            quotes,
            cooldowns: Mutex::new(HashMap::new()),
            stats: DayStatsCell::default(),
            worker: OnceLock::new(),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let _ = self.worker.set(StrategyWorker::spawn(Arc::clone(self)));
    }

    pub fn stop(&self) {
        if let Some(worker) = self.worker.get() {
            worker.stop();
        }
    }

    pub fn day_stats(&self) -> DayStats {
        self.stats.snapshot()
    }

    pub fn detect_opportunity(&self, market: &MarketData) -> Option<Opportunity> {
        let cfg = self.config.get().arbitrage_long;
        if !cfg.enabled || !cfg.long.enabled || !market.has_order_book() {
            return None;
        }
        if market.outcomes.len() != 2 {
            return None;
        }
        let prices = market.aligned_prices()?;
        if prices.iter().any(|&p| !(p > 0.0 && p < 1.0)) {
            return None;
        }
        if in_cooldown(
            self.cooldowns.lock().get(&market.condition_id).copied(),
            now_ms(),
            cfg.cooldown_ms,
        ) {
            return None;
        }

        let price_sum: f64 = prices.iter().sum();
        if price_sum >= cfg.long.max_price_sum {
            return None;
        }
        let spread_pct = (1.0 - price_sum) * 100.0;
        if spread_pct < cfg.long.min_spread {
            return None;
        }
        if market.liquidity_usd() < cfg.min_liquidity {
            return None;
        }

        let gross = (1.0 - price_sum) * cfg.trade_amount;
        let net = gross * (1.0 - TAKER_FEE_PCT) - MIN_TX_COST;
        if net < 0.01 {
            return None;
        }

        let confidence = if price_sum < 0.98 && net > 0.10 {
            Confidence::High
        } else if price_sum < 0.99 && net > 0.05 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        Some(Opportunity {
            id: Uuid::new_v4().to_string(),
            strategy: StrategyKind::ArbitrageLong,
            condition_id: market.condition_id.clone(),
            question: market.question.clone(),
            outcomes: market.outcomes.clone(),
            prices: prices.to_vec(),
            price_sum,
            spread: spread_pct,
            gross_profit: gross,
            net_profit: net,
            confidence,
            state: OpportunityState::Detected,
            detected_at_ms: now_ms(),
            suggested_amount: cfg.trade_amount,
        })
    }

    /// Re-quote each leg, apply the slippage guard, then buy both outcomes.
    async fn execute_plan(&self, plan: &ArbLongPlan) -> bool {
        let cfg = self.config.get().arbitrage_long;
        let gate = self
            .config
            .can_execute_trade(StrategyKind::ArbitrageLong, plan.size);
        if !gate.allowed {
            info!(
                condition_id = %plan.condition_id,
                reason = gate.reason.as_deref().unwrap_or(""),
                "arbitrage-long execution gated"
            );
            return false;
        }

        // Slippage guard: compare live ask sum against the planned sum.
        let mut market_sum = 0.0;
        for buy in &plan.buys {
            match self.quotes.price(&buy.token_id, OrderSide::Buy).await {
                Ok(Some(price)) => market_sum += price,
                Ok(None) | Err(_) => {
                    warn!(
                        condition_id = %plan.condition_id,
                        token_id = %buy.token_id,
                        "aborting: live price unavailable"
                    );
                    return false;
                }
            }
        }
        let drift = slippage_pct(plan.plan_price_sum, market_sum);
        if drift > cfg.max_slippage {
            warn!(
                condition_id = %plan.condition_id,
                drift_pct = drift,
                max = cfg.max_slippage,
                "aborting: slippage guard tripped"
            );
            return false;
        }

        let results = self
            .orders
            .submit_batch(BatchSpec {
                batch_id: Some(format!("arb-{}", plan.opportunity_id)),
                orders: plan
                    .buys
                    .iter()
                    .map(|buy| {
                        OrderSpec::buy(
                            StrategyKind::ArbitrageLong,
                            plan.condition_id.clone(),
                            buy.token_id.clone(),
                            buy.price,
                            buy.size,
                        )
                        .with_opportunity(plan.opportunity_id.clone())
                    })
                    .collect(),
                priority: None,
                atomic: false,
                sequential: true,
            })
            .await;

        let all_filled =
            results.len() == plan.buys.len() && results.iter().all(|r| r.success);

        self.config
            .record_trade_volume(StrategyKind::ArbitrageLong, plan.size);
        self.cooldowns
            .lock()
            .insert(plan.condition_id.clone(), now_ms());

        if all_filled {
            let profit =
                (1.0 - plan.plan_price_sum) * plan.size * (1.0 - TAKER_FEE_PCT) - MIN_TX_COST;
            info!(
                condition_id = %plan.condition_id,
                size = plan.size,
                expected_profit = profit,
                "arbitrage-long executed"
            );
            self.stats.record_success(profit);
        } else {
            warn!(condition_id = %plan.condition_id, "arbitrage-long legs incomplete");
            self.stats.record_failure();
        }
        all_filled
    }
}

#[async_trait]
impl StrategyRunner for ArbLongStrategy {
    async fn process(&self, task: DispatchTask) {
        let Some(opportunity) = self.detect_opportunity(&task.market) else {
            debug!(condition_id = %task.market.condition_id, "opportunity gone on re-check");
            return;
        };
        self.stats.record_found();

        let cfg = self.config.get().arbitrage_long;
        if !cfg.auto_execute {
            info!(
                condition_id = %opportunity.condition_id,
                spread_pct = opportunity.spread,
                net = opportunity.net_profit,
                "arbitrage-long opportunity detected (auto-execute off)"
            );
            return;
        }
        let plan = generate_execution_plan(&opportunity, &task.market, &cfg);
        self.execute_plan(&plan).await;
    }
}

#[async_trait]
impl StrategyHandler for ArbLongStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ArbitrageLong
    }

    fn classify(&self, market: &MarketData) -> Option<StrategyMatch> {
        let opportunity = self.detect_opportunity(market)?;
        Some(StrategyMatch::new(
            StrategyKind::ArbitrageLong,
            opportunity.confidence,
            opportunity.net_profit,
            format!("ask sum {:.4} under 1", opportunity.price_sum),
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
