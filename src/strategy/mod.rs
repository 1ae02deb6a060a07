//! Strategy evaluators.
//!
//! All three evaluators share a shape: detect an opportunity on a market,
//! turn it into an execution plan, and execute the plan through the order
//! queue. Each strategy serializes its executions through a single-consumer
//! [`StrategyWorker`] and keeps its own per-market cooldowns plus per-day
//! volume accounting via the config manager.

pub mod arb_long;
pub mod config;
pub mod market_making;
pub mod mint_split;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Notify};
use tracing::warn;

use crate::dispatch::DispatchTask;
use crate::strategy::config::StrategyKind;

/// Taker fee applied to sell-side revenue.
pub const TAKER_FEE_PCT: f64 = 0.015;
/// Fixed per-execution transaction cost in USD.
pub const MIN_TX_COST: f64 = 0.01;
/// Opportunities stuck in a non-terminal state past this age are expired.
pub const MAX_OPPORTUNITY_AGE_MS: i64 = 300_000;
/// Per-execution task timeout inside a strategy worker.
const STRATEGY_TASK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn score(&self) -> f64 {
        match self {
            Confidence::High => 80.0,
            Confidence::Medium => 50.0,
            Confidence::Low => 20.0,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Confidence::High => 2,
            Confidence::Medium => 1,
            Confidence::Low => 0,
        }
    }

    pub fn meets(&self, minimum: Confidence) -> bool {
        self.rank() >= minimum.rank()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityState {
    Detected,
    Pending,
    Executing,
    Executed,
    Failed,
    Expired,
}

impl OpportunityState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OpportunityState::Executed | OpportunityState::Failed | OpportunityState::Expired
        )
    }
}

/// A detected, classifiable candidate execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub strategy: StrategyKind,
    pub condition_id: String,
    pub question: String,
    pub outcomes: Vec<String>,
    pub prices: Vec<f64>,
    pub price_sum: f64,
    /// Edge in percentage points.
    pub spread: f64,
    pub gross_profit: f64,
    pub net_profit: f64,
    pub confidence: Confidence,
    pub state: OpportunityState,
    pub detected_at_ms: i64,
    pub suggested_amount: f64,
}

impl Opportunity {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        !self.state.is_terminal() && now_ms - self.detected_at_ms > MAX_OPPORTUNITY_AGE_MS
    }
}

/// One strategy's verdict on a market, scored for dispatcher tie-breaking.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyMatch {
    pub strategy: StrategyKind,
    pub confidence: Confidence,
    pub estimated_profit: f64,
    pub reason: String,
    pub score: f64,
}

impl StrategyMatch {
    pub fn new(
        strategy: StrategyKind,
        confidence: Confidence,
        estimated_profit: f64,
        reason: impl Into<String>,
    ) -> Self {
        let score = confidence.score() + estimated_profit * 10.0;
        Self {
            strategy,
            confidence,
            estimated_profit,
            reason: reason.into(),
            score,
        }
    }
}

/// Running per-strategy counters, reset lazily on date change so the
/// control surface reports today's numbers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DayStats {
    pub date: String,
    pub found: u64,
    pub success: u64,
    pub failed: u64,
    pub profit: f64,
}

#[derive(Default)]
pub struct DayStatsCell {
    inner: Mutex<DayStats>,
}

impl DayStatsCell {
    fn touch(&self, today: &str) -> parking_lot::MutexGuard<'_, DayStats> {
        let mut stats = self.inner.lock();
        if stats.date != today {
            *stats = DayStats {
                date: today.to_string(),
                ..Default::default()
            };
        }
        stats
    }

    pub fn record_found(&self) {
        self.touch(&today_string()).found += 1;
    }

    pub fn record_success(&self, profit: f64) {
        let mut stats = self.touch(&today_string());
        stats.success += 1;
        stats.profit += profit;
    }

    pub fn record_failure(&self) {
        self.touch(&today_string()).failed += 1;
    }

    pub fn snapshot(&self) -> DayStats {
        self.touch(&today_string()).clone()
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn today_string() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Whether a market is still cooling down for a strategy.
pub fn in_cooldown(last_execution_ms: Option<i64>, now_ms: i64, cooldown_ms: u64) -> bool {
    match last_execution_ms {
        Some(last) => now_ms - last < cooldown_ms as i64,
        None => false,
    }
}

/// Work processed by a strategy's serialized executor.
#[async_trait]
pub trait StrategyRunner: Send + Sync {
    async fn process(&self, task: DispatchTask);
}

/// Single-consumer work queue: executions within a strategy never overlap,
/// and the scan stage can await drain between pages.
pub struct StrategyWorker {
    tx: mpsc::UnboundedSender<DispatchTask>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    stop_tx: watch::Sender<bool>,
}

impl StrategyWorker {
    pub fn spawn<S>(runner: Arc<S>) -> Self
    where
        S: StrategyRunner + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<DispatchTask>();
        let pending = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let worker_pending = Arc::clone(&pending);
        let worker_idle = Arc::clone(&idle);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    task = rx.recv() => {
                        let Some(task) = task else { break };
                        let label = task.market.condition_id.clone();
                        if tokio::time::timeout(STRATEGY_TASK_TIMEOUT, runner.process(task))
                            .await
                            .is_err()
                        {
                            warn!(condition_id = %label, "strategy task timed out");
                        }
                        if worker_pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                            worker_idle.notify_waiters();
                        }
                    }
                }
            }
            // Drain anything still queued so idle waiters are released.
            while rx.try_recv().is_ok() {
                if worker_pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                    worker_idle.notify_waiters();
                }
            }
        });

        Self {
            tx,
            pending,
            idle,
            stop_tx,
        }
    }

    pub fn enqueue(&self, task: DispatchTask) -> bool {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(task).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub async fn wait_until_idle(&self) {
        loop {
            if self.pending() == 0 {
                return;
            }
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}
