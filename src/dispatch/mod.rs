//! Strategy dispatcher.
//!
//! Classifies each scanned market against the enabled strategies, keeps the
//! best-scoring match, enforces the per-(market, strategy) cooldown, and
//! hands the task to the matching strategy's handler. The dispatcher is the
//! only writer of its cooldown entries, so checks never race within a
//! strategy.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::MarketData;
use crate::strategy::config::StrategyKind;
use crate::strategy::{in_cooldown, now_ms, Confidence, StrategyMatch};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub auto_dispatch: bool,
    pub min_confidence: Confidence,
    pub cooldown_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            auto_dispatch: true,
            min_confidence: Confidence::Low,
            cooldown_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Pending,
    Dispatched,
}

/// One market routed to its best-matching strategy.
#[derive(Debug, Clone)]
pub struct DispatchTask {
    pub id: String,
    pub market: MarketData,
    pub matches: Vec<StrategyMatch>,
    pub best: StrategyMatch,
    pub status: DispatchStatus,
    pub created_at_ms: i64,
}

/// Typed per-strategy handler registered with the dispatcher. `classify`
/// is a cheap synchronous screen; `dispatch` enqueues onto the strategy's
/// serialized worker.
#[async_trait]
pub trait StrategyHandler: Send + Sync {
    fn kind(&self) -> StrategyKind;
    fn classify(&self, market: &MarketData) -> Option<StrategyMatch>;
    fn dispatch(&self, task: DispatchTask) -> bool;
    async fn wait_until_idle(&self);
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchStats {
    pub analyzed: u64,
    pub matched: u64,
    pub dispatched: u64,
    pub dropped_confidence: u64,
    pub dropped_cooldown: u64,
    pub per_strategy: HashMap<StrategyKind, u64>,
    pub last_dispatch_ms: Option<i64>,
}

pub struct Dispatcher {
    config: Mutex<DispatcherConfig>,
    handlers: Vec<Arc<dyn StrategyHandler>>,
    cooldowns: Mutex<HashMap<(String, StrategyKind), i64>>,
    stats: Mutex<DispatchStats>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, handlers: Vec<Arc<dyn StrategyHandler>>) -> Self {
        Self {
            config: Mutex::new(config),
            handlers,
            cooldowns: Mutex::new(HashMap::new()),
            stats: Mutex::new(DispatchStats::default()),
        }
    }

    pub fn set_config(&self, config: DispatcherConfig) {
        *self.config.lock() = config;
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.lock().clone()
    }

    /// Classify a page of markets and dispatch the winners.
    pub fn analyze(&self, markets: &[MarketData]) -> Vec<DispatchTask> {
        self.analyze_at(markets, now_ms())
    }

    pub(crate) fn analyze_at(&self, markets: &[MarketData], now_ms: i64) -> Vec<DispatchTask> {
        let config = self.config.lock().clone();
        let mut tasks = Vec::new();

        for market in markets {
            self.stats.lock().analyzed += 1;

            // Markets without outcomes are skipped by all strategies.
            if market.outcomes.is_empty() {
                continue;
            }

            let matches: Vec<StrategyMatch> = self
                .handlers
                .iter()
                .filter_map(|h| h.classify(market))
                .filter(|m| m.confidence.meets(config.min_confidence))
                .collect();

            let all_matches: usize = self
                .handlers
                .iter()
                .filter_map(|h| h.classify(market))
                .count();
            if all_matches > matches.len() {
                self.stats.lock().dropped_confidence += (all_matches - matches.len()) as u64;
            }

            // Highest score wins; strict comparison keeps the earliest
            // handler on ties (stable input order).
            let Some(best) = matches
                .iter()
                .cloned()
                .reduce(|best, m| if m.score > best.score { m } else { best })
            else {
                continue;
            };
            self.stats.lock().matched += 1;

            let key = (market.condition_id.clone(), best.strategy);
            {
                let cooldowns = self.cooldowns.lock();
                if in_cooldown(cooldowns.get(&key).copied(), now_ms, config.cooldown_ms) {
                    debug!(
                        condition_id = %market.condition_id,
                        strategy = %best.strategy,
                        "dispatch suppressed by cooldown"
                    );
                    self.stats.lock().dropped_cooldown += 1;
                    continue;
                }
            }

            let mut task = DispatchTask {
                id: Uuid::new_v4().to_string(),
                market: market.clone(),
                matches: matches.clone(),
                best: best.clone(),
                status: DispatchStatus::Pending,
                created_at_ms: now_ms,
            };

            if config.auto_dispatch {
                // Cooldown is stamped before the handler runs so a re-scan
                // arriving mid-execution cannot double-dispatch.
                self.cooldowns.lock().insert(key, now_ms);
                if let Some(handler) = self.handlers.iter().find(|h| h.kind() == best.strategy) {
                    if handler.dispatch(task.clone()) {
                        task.status = DispatchStatus::Dispatched;
                        let mut stats = self.stats.lock();
                        stats.dispatched += 1;
                        *stats.per_strategy.entry(best.strategy).or_insert(0) += 1;
                        stats.last_dispatch_ms = Some(now_ms);
                        info!(
                            condition_id = %market.condition_id,
                            strategy = %best.strategy,
                            score = best.score,
                            "task dispatched"
                        );
                    }
                }
            }

            tasks.push(task);
        }
        tasks
    }

    /// Await drain of every registered strategy worker.
    pub async fn wait_until_idle(&self) {
        for handler in &self.handlers {
            handler.wait_until_idle().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn cooldown_entry(&self, condition_id: &str, kind: StrategyKind) -> Option<i64> {
        self.cooldowns
            .lock()
            .get(&(condition_id.to_string(), kind))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawMarket;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeHandler {
        kind: StrategyKind,
        verdict: Option<(Confidence, f64)>,
        dispatched: AtomicUsize,
    }

    impl FakeHandler {
        fn new(kind: StrategyKind, verdict: Option<(Confidence, f64)>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                verdict,
                dispatched: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl StrategyHandler for FakeHandler {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        fn classify(&self, _market: &MarketData) -> Option<StrategyMatch> {
            self.verdict
                .map(|(c, p)| StrategyMatch::new(self.kind, c, p, "fake"))
        }

        fn dispatch(&self, _task: DispatchTask) -> bool {
            self.dispatched.fetch_add(1, Ordering::SeqCst);
            true
        }

        async fn wait_until_idle(&self) {}
    }

    fn market(id: &str) -> MarketData {
        MarketData::try_from(RawMarket {
            condition_id: Some(id.into()),
            outcomes: vec!["Yes".into(), "No".into()],
            outcome_prices: vec![0.5, 0.5],
            clob_token_ids: vec!["a".into(), "b".into()],
            enable_order_book: Some(true),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn best_match_wins_by_score() {
        let low_profit = FakeHandler::new(StrategyKind::MintSplit, Some((Confidence::High, 1.0)));
        let high_profit =
            FakeHandler::new(StrategyKind::ArbitrageLong, Some((Confidence::Medium, 5.0)));
        let dispatcher = Dispatcher::new(
            DispatcherConfig::default(),
            vec![low_profit.clone(), high_profit.clone()],
        );

        // mint: 80 + 10 = 90; arb: 50 + 50 = 100 → arb wins.
        let tasks = dispatcher.analyze_at(&[market("c1")], 1_000);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].best.strategy, StrategyKind::ArbitrageLong);
        assert_eq!(high_profit.dispatched.load(Ordering::SeqCst), 1);
        assert_eq!(low_profit.dispatched.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn ties_keep_registration_order() {
        let first = FakeHandler::new(StrategyKind::MintSplit, Some((Confidence::High, 1.0)));
        let second = FakeHandler::new(StrategyKind::ArbitrageLong, Some((Confidence::High, 1.0)));
        let dispatcher =
            Dispatcher::new(DispatcherConfig::default(), vec![first.clone(), second]);
        let tasks = dispatcher.analyze_at(&[market("c1")], 1_000);
        assert_eq!(tasks[0].best.strategy, StrategyKind::MintSplit);
    }

    #[test]
    fn min_confidence_filters_matches() {
        let weak = FakeHandler::new(StrategyKind::MintSplit, Some((Confidence::Low, 100.0)));
        let dispatcher = Dispatcher::new(
            DispatcherConfig {
                min_confidence: Confidence::Medium,
                ..Default::default()
            },
            vec![weak.clone()],
        );
        let tasks = dispatcher.analyze_at(&[market("c1")], 1_000);
        assert!(tasks.is_empty());
        assert_eq!(weak.dispatched.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.stats().dropped_confidence, 1);
    }

    #[test]
    fn cooldown_drops_second_dispatch() {
        let handler = FakeHandler::new(StrategyKind::MintSplit, Some((Confidence::High, 1.0)));
        let dispatcher = Dispatcher::new(
            DispatcherConfig {
                cooldown_ms: 60_000,
                ..Default::default()
            },
            vec![handler.clone()],
        );

        let t0 = 1_000_000;
        let tasks = dispatcher.analyze_at(&[market("c1")], t0);
        assert_eq!(tasks.len(), 1);
        assert_eq!(dispatcher.cooldown_entry("c1", StrategyKind::MintSplit), Some(t0));

        // 10 s later: still cooling down, no dispatch, no counter bump.
        let tasks = dispatcher.analyze_at(&[market("c1")], t0 + 10_000);
        assert!(tasks.is_empty());
        assert_eq!(handler.dispatched.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.stats().dropped_cooldown, 1);

        // After the window it dispatches again.
        let tasks = dispatcher.analyze_at(&[market("c1")], t0 + 61_000);
        assert_eq!(tasks.len(), 1);
        assert_eq!(handler.dispatched.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_outcomes_are_skipped() {
        let handler = FakeHandler::new(StrategyKind::MintSplit, Some((Confidence::High, 1.0)));
        let dispatcher = Dispatcher::new(DispatcherConfig::default(), vec![handler.clone()]);
        let mut m = market("c1");
        m.outcomes.clear();
        let tasks = dispatcher.analyze_at(&[m], 1_000);
        assert!(tasks.is_empty());
        assert_eq!(handler.dispatched.load(Ordering::SeqCst), 0);
    }
}
