//! Mint-Split strategy.
//!
//! Multi-outcome markets whose outcome prices sum above 1: mint a full
//! outcome set on-chain for $1 per share, then sell every outcome at its
//! quoted price. Edge is the price sum minus 1, less taker fees and the
//! fixed transaction cost.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::contract::ContractClient;
use crate::dispatch::{DispatchTask, StrategyHandler};
use crate::models::MarketData;
use crate::orders::{OrderPriority, OrderQueue, OrderSpec};
use crate::strategy::config::{MintSplitConfig, StrategyConfigManager, StrategyKind};
use crate::strategy::{
    in_cooldown, now_ms, Confidence, DayStats, DayStatsCell, Opportunity, OpportunityState,
    StrategyMatch, StrategyRunner, StrategyWorker, MIN_TX_COST, TAKER_FEE_PCT,
};

/// Pause between consecutive sell submissions.
const INTER_ORDER_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct PlannedSell {
    pub token_id: String,
    pub outcome: String,
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone)]
pub struct MintSplitPlan {
    pub opportunity_id: String,
    pub condition_id: String,
    pub mint_amount: f64,
    pub outcome_count: usize,
    pub sells: Vec<PlannedSell>,
    pub expected_revenue: f64,
}

/// Build the plan: clamp the mint size to the per-trade cap and the depth
/// heuristic, then one sell per outcome at its quoted price.
pub fn generate_execution_plan(
    opportunity: &Opportunity,
    market: &MarketData,
    config: &MintSplitConfig,
) -> MintSplitPlan {
    let max_mint_amount = config.max_mint_per_trade.min(10.0 * config.mint_amount);
    let mint_amount = opportunity
        .suggested_amount
        .min(max_mint_amount)
        .min(config.max_mint_per_trade);

    let sells: Vec<PlannedSell> = market
        .outcomes
        .iter()
        .zip(market.clob_token_ids.iter())
        .zip(opportunity.prices.iter())
        .map(|((outcome, token_id), &price)| PlannedSell {
            token_id: token_id.clone(),
            outcome: outcome.clone(),
            price,
            size: mint_amount,
        })
        .collect();
    let expected_revenue = sells.iter().map(|s| s.price * s.size).sum();

    MintSplitPlan {
        opportunity_id: opportunity.id.clone(),
        condition_id: opportunity.condition_id.clone(),
        mint_amount,
        outcome_count: market.outcomes.len(),
        sells,
        expected_revenue,
    }
}

pub struct MintSplitStrategy {
    config: Arc<StrategyConfigManager>,
    orders: Arc<OrderQueue>,
    contract: Arc<dyn ContractClient>,
    cooldowns: Mutex<HashMap<String, i64>>,
    stats: DayStatsCell,
    worker: OnceLock<StrategyWorker>,
}

impl MintSplitStrategy {
    pub fn new(
        config: Arc<StrategyConfigManager>,
        orders: Arc<OrderQueue>,
        contract: Arc<dyn ContractClient>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            orders,
            contract,
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

    /// Screen a market against the detection rule. Markets in this
    /// strategy's own cooldown are not re-detected.
    pub fn detect_opportunity(&self, market: &MarketData) -> Option<Opportunity> {
        let cfg = self.config.get().mint_split;
        if !cfg.enabled || !market.has_order_book() {
            return None;
        }
        if market.outcomes.len() < cfg.min_outcomes {
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
        if price_sum <= cfg.min_price_sum {
            return None;
        }
        if market.liquidity_usd() < cfg.min_liquidity {
            return None;
        }

        let gross = (price_sum - 1.0) * cfg.mint_amount;
        let net = gross * (1.0 - TAKER_FEE_PCT) - MIN_TX_COST;
        if net < cfg.min_profit.max(0.01) {
            return None;
        }

        let confidence = if price_sum > 1.02 && net > 0.10 {
            Confidence::High
        } else if price_sum > 1.01 && net > 0.05 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        Some(Opportunity {
            id: Uuid::new_v4().to_string(),
            strategy: StrategyKind::MintSplit,
            condition_id: market.condition_id.clone(),
            question: market.question.clone(),
            outcomes: market.outcomes.clone(),
            prices: prices.to_vec(),
            price_sum,
            spread: (price_sum - 1.0) * 100.0,
            gross_profit: gross,
            net_profit: net,
            confidence,
            state: OpportunityState::Detected,
            detected_at_ms: now_ms(),
            suggested_amount: cfg.mint_amount,
        })
    }

    /// Mint the full set, then liquidate every outcome with paced sells.
    async fn execute_plan(&self, plan: &MintSplitPlan) -> bool {
        if !self.contract.is_enabled() {
            warn!(
                condition_id = %plan.condition_id,
                "mint-split execution skipped: signing unavailable"
            );
            return false;
        }
        let gate = self
            .config
            .can_execute_trade(StrategyKind::MintSplit, plan.mint_amount);
        if !gate.allowed {
            info!(
                condition_id = %plan.condition_id,
                reason = gate.reason.as_deref().unwrap_or(""),
                "mint-split execution gated"
            );
            return false;
        }

        let mint = self
            .orders
            .submit_and_wait(
                OrderSpec::mint(
                    StrategyKind::MintSplit,
                    plan.condition_id.clone(),
                    plan.mint_amount,
                    plan.outcome_count,
                )
                .with_opportunity(plan.opportunity_id.clone())
                .with_priority(OrderPriority::High),
            )
            .await;
        if !mint.success {
            warn!(
                condition_id = %plan.condition_id,
                error = mint.error.as_deref().unwrap_or("unknown"),
                "mint failed"
            );
            return false;
        }

        let mut revenue = 0.0;
        let mut all_sold = true;
        for (index, sell) in plan.sells.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(INTER_ORDER_DELAY).await;
            }
            let result = self
                .orders
                .submit_and_wait(
                    OrderSpec::sell(
                        StrategyKind::MintSplit,
                        plan.condition_id.clone(),
                        sell.token_id.clone(),
                        sell.price,
                        sell.size,
                    )
                    .with_opportunity(plan.opportunity_id.clone()),
                )
                .await;
            if result.success {
                revenue += sell.price * sell.size;
            } else {
                all_sold = false;
                warn!(
                    condition_id = %plan.condition_id,
                    outcome = %sell.outcome,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "sell leg failed"
                );
            }
        }

        let actual_profit =
            revenue - plan.mint_amount - revenue * TAKER_FEE_PCT - MIN_TX_COST;
        self.config
            .record_trade_volume(StrategyKind::MintSplit, plan.mint_amount);
        self.cooldowns
            .lock()
            .insert(plan.condition_id.clone(), now_ms());

        if all_sold {
            info!(
                condition_id = %plan.condition_id,
                mint_amount = plan.mint_amount,
                profit = actual_profit,
                "mint-split executed"
            );
            self.stats.record_success(actual_profit);
        } else {
            self.stats.record_failure();
        }
        all_sold
    }
}

#[async_trait]
impl StrategyRunner for MintSplitStrategy {
    async fn process(&self, task: DispatchTask) {
        let Some(opportunity) = self.detect_opportunity(&task.market) else {
            debug!(condition_id = %task.market.condition_id, "opportunity gone on re-check");
            return;
        };
        self.stats.record_found();

        let cfg = self.config.get().mint_split;
        if !cfg.auto_execute {
            info!(
                condition_id = %opportunity.condition_id,
                price_sum = opportunity.price_sum,
                net = opportunity.net_profit,
                "mint-split opportunity detected (auto-execute off)"
            );
            return;
        }
        let plan = generate_execution_plan(&opportunity, &task.market, &cfg);
        self.execute_plan(&plan).await;
    }
}

#[async_trait]
impl StrategyHandler for MintSplitStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MintSplit
    }

    fn classify(&self, market: &MarketData) -> Option<StrategyMatch> {
        let opportunity = self.detect_opportunity(market)?;
        Some(StrategyMatch::new(
            StrategyKind::MintSplit,
            opportunity.confidence,
            opportunity.net_profit,
            format!("price sum {:.4} over 1", opportunity.price_sum),
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
