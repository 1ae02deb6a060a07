//! Priority order queue.
//!
//! Single-consumer serialized executor: one order is in flight at any time,
//! which keeps contract calls free of nonce collisions. Orders are popped
//! in priority order (FIFO within a priority), retried in place on failure,
//! and archived to a bounded completed registry.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, watch, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::clob::{
    CreateOrderArgs, CreateOrderOptions, OrderSide, OrderType, TickSize, VenueOrderApi,
};
use crate::client::contract::ContractClient;
use crate::errors::EngineError;
use crate::strategy::config::StrategyKind;
use crate::strategy::now_ms;

const COMPLETED_REGISTRY_CAP: usize = 1_000;
const ORDER_EXECUTION_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    Mint,
    Merge,
    Buy,
    Sell,
    Cancel,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Mint => "MINT",
            OrderKind::Merge => "MERGE",
            OrderKind::Buy => "BUY",
            OrderKind::Sell => "SELL",
            OrderKind::Cancel => "CANCEL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderPriority {
    Urgent,
    High,
    Normal,
    Low,
}

impl OrderPriority {
    pub fn score(&self) -> u8 {
        match self {
            OrderPriority::Urgent => 100,
            OrderPriority::High => 75,
            OrderPriority::Normal => 50,
            OrderPriority::Low => 25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Executing,
    Success,
    Failed,
    Cancelled,
}

/// What a strategy submits; the queue assigns identity and bookkeeping.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub strategy: StrategyKind,
    pub opportunity_id: Option<String>,
    pub kind: OrderKind,
    pub priority: OrderPriority,
    pub condition_id: String,
    pub token_id: Option<String>,
    pub side: Option<OrderSide>,
    pub price: Option<f64>,
    pub size: f64,
    /// MINT/MERGE: number of outcome slots in the partition.
    pub outcome_count: Option<usize>,
    /// CANCEL: the venue order id to revoke.
    pub venue_order_id: Option<String>,
    pub tick_size: TickSize,
    pub neg_risk: bool,
    pub max_retries: Option<u32>,
    pub metadata: serde_json::Value,
}

impl OrderSpec {
    pub fn buy(
        strategy: StrategyKind,
        condition_id: impl Into<String>,
        token_id: impl Into<String>,
        price: f64,
        size: f64,
    ) -> Self {
        Self::trade(strategy, condition_id, token_id, OrderSide::Buy, price, size)
    }

    pub fn sell(
        strategy: StrategyKind,
        condition_id: impl Into<String>,
        token_id: impl Into<String>,
        price: f64,
        size: f64,
    ) -> Self {
        Self::trade(strategy, condition_id, token_id, OrderSide::Sell, price, size)
    }

    fn trade(
        strategy: StrategyKind,
        condition_id: impl Into<String>,
        token_id: impl Into<String>,
        side: OrderSide,
        price: f64,
        size: f64,
    ) -> Self {
        Self {
            strategy,
            opportunity_id: None,
            kind: match side {
                OrderSide::Buy => OrderKind::Buy,
                OrderSide::Sell => OrderKind::Sell,
            },
            priority: OrderPriority::Normal,
            condition_id: condition_id.into(),
            token_id: Some(token_id.into()),
            side: Some(side),
            price: Some(price),
            size,
            outcome_count: None,
            venue_order_id: None,
            tick_size: TickSize::Hundredth,
            neg_risk: false,
            max_retries: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn mint(
        strategy: StrategyKind,
        condition_id: impl Into<String>,
        amount: f64,
        outcome_count: usize,
    ) -> Self {
        Self {
            strategy,
            opportunity_id: None,
            kind: OrderKind::Mint,
            priority: OrderPriority::High,
            condition_id: condition_id.into(),
            token_id: None,
            side: None,
            price: None,
            size: amount,
            outcome_count: Some(outcome_count),
            venue_order_id: None,
            tick_size: TickSize::Hundredth,
            neg_risk: false,
            max_retries: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn merge(
        strategy: StrategyKind,
        condition_id: impl Into<String>,
        amount: f64,
        outcome_count: usize,
    ) -> Self {
        let mut spec = Self::mint(strategy, condition_id, amount, outcome_count);
        spec.kind = OrderKind::Merge;
        spec
    }

    pub fn cancel(
        strategy: StrategyKind,
        condition_id: impl Into<String>,
        venue_order_id: impl Into<String>,
    ) -> Self {
        Self {
            strategy,
            opportunity_id: None,
            kind: OrderKind::Cancel,
            priority: OrderPriority::Urgent,
            condition_id: condition_id.into(),
            token_id: None,
            side: None,
            price: None,
            size: 0.0,
            outcome_count: None,
            venue_order_id: Some(venue_order_id.into()),
            tick_size: TickSize::Hundredth,
            neg_risk: false,
            max_retries: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_priority(mut self, priority: OrderPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_opportunity(mut self, opportunity_id: impl Into<String>) -> Self {
        self.opportunity_id = Some(opportunity_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: String,
    pub strategy: StrategyKind,
    pub opportunity_id: Option<String>,
    pub kind: OrderKind,
    pub priority: OrderPriority,
    pub condition_id: String,
    pub token_id: Option<String>,
    pub side: Option<OrderSide>,
    pub price: Option<f64>,
    pub size: f64,
    pub status: OrderStatus,
    pub created_at_ms: i64,
    pub started_at_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    pub tx_hash: Option<String>,
    pub venue_order_id: Option<String>,
    pub filled_size: Option<f64>,
    pub filled_price: Option<f64>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(skip)]
    pub outcome_count: Option<usize>,
    #[serde(skip)]
    pub tick_size: TickSize,
    #[serde(skip)]
    pub neg_risk: bool,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct OrderResult {
    pub order_id: String,
    pub success: bool,
    pub tx_hash: Option<String>,
    pub venue_order_id: Option<String>,
    pub filled_size: Option<f64>,
    pub filled_price: Option<f64>,
    pub fee: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BatchSpec {
    pub batch_id: Option<String>,
    pub orders: Vec<OrderSpec>,
    pub priority: Option<OrderPriority>,
    /// Stop on first failure.
    pub atomic: bool,
    /// Preserve submit order rather than fanning out.
    pub sequential: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderQueueStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total_volume: f64,
    pub total_fees: f64,
    pub volume_by_strategy: HashMap<StrategyKind, f64>,
    pub count_by_kind: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderQueueStatus {
    pub running: bool,
    pub pending: usize,
    pub completed: usize,
    pub stats: OrderQueueStats,
}

struct QueueEntry {
    score: u8,
    seq: u64,
    order: Order,
    responder: oneshot::Sender<OrderResult>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher score first, then earlier sequence.
        self.score
            .cmp(&other.score)
            .then(other.seq.cmp(&self.seq))
    }
}

pub struct OrderTicket {
    pub order_id: String,
    rx: oneshot::Receiver<OrderResult>,
}

impl OrderTicket {
    pub async fn wait(self) -> OrderResult {
        let order_id = self.order_id.clone();
        self.rx.await.unwrap_or(OrderResult {
            order_id,
            success: false,
            tx_hash: None,
            venue_order_id: None,
            filled_size: None,
            filled_price: None,
            fee: 0.0,
            error: Some("order queue dropped the order".into()),
        })
    }
}

pub struct OrderQueue {
    venue: Arc<dyn VenueOrderApi>,
    contract: Arc<dyn ContractClient>,
    fee_rate: f64,
    heap: Mutex<BinaryHeap<QueueEntry>>,
    seq: AtomicU64,
    notify: Arc<Notify>,
    running: AtomicBool,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    completed: Mutex<VecDeque<Order>>,
    stats: Mutex<OrderQueueStats>,
}

impl OrderQueue {
    pub fn new(
        venue: Arc<dyn VenueOrderApi>,
        contract: Arc<dyn ContractClient>,
        fee_rate: f64,
    ) -> Arc<Self> {
        Arc::new(Self {
            venue,
            contract,
            fee_rate,
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            notify: Arc::new(Notify::new()),
            running: AtomicBool::new(false),
            stop_tx: Mutex::new(None),
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            completed: Mutex::new(VecDeque::new()),
            stats: Mutex::new(OrderQueueStats::default()),
        })
    }

    /// Spawn the single consumer task.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        *self.stop_tx.lock() = Some(stop_tx);

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            info!("order queue started");
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                let entry = queue.heap.lock().pop();
                match entry {
                    Some(entry) => queue.execute_entry(entry).await,
                    None => {
                        tokio::select! {
                            _ = queue.notify.notified() => {}
                            _ = stop_rx.changed() => {}
                        }
                    }
                }
            }
            queue.drain_on_stop();
            info!("order queue stopped");
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(true);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Enqueue one order and get a ticket for its eventual result.
    pub fn submit_order(&self, spec: OrderSpec) -> OrderTicket {
        let order = Order {
            id: Uuid::new_v4().to_string(),
            strategy: spec.strategy,
            opportunity_id: spec.opportunity_id,
            kind: spec.kind,
            priority: spec.priority,
            condition_id: spec.condition_id,
            token_id: spec.token_id,
            side: spec.side,
            price: spec.price,
            size: spec.size,
            status: OrderStatus::Pending,
            created_at_ms: now_ms(),
            started_at_ms: None,
            completed_at_ms: None,
            tx_hash: None,
            venue_order_id: spec.venue_order_id,
            filled_size: None,
            filled_price: None,
            error: None,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            outcome_count: spec.outcome_count,
            tick_size: spec.tick_size,
            neg_risk: spec.neg_risk,
            metadata: spec.metadata,
        };
        let (tx, rx) = oneshot::channel();
        let ticket = OrderTicket {
            order_id: order.id.clone(),
            rx,
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        {
            let mut stats = self.stats.lock();
            stats.submitted += 1;
            *stats
                .count_by_kind
                .entry(order.kind.as_str().to_string())
                .or_insert(0) += 1;
        }
        self.heap.lock().push(QueueEntry {
            score: order.priority.score(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            order,
            responder: tx,
        });
        self.notify.notify_one();
        ticket
    }

    pub async fn submit_and_wait(&self, spec: OrderSpec) -> OrderResult {
        self.submit_order(spec).wait().await
    }

    /// Submit a batch. `sequential` awaits orders one at a time (stopping on
    /// the first failure iff `atomic`); otherwise all orders are enqueued at
    /// once and awaited together.
    pub async fn submit_batch(&self, batch: BatchSpec) -> Vec<OrderResult> {
        let batch_id = batch
            .batch_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        debug!(batch_id = %batch_id, orders = batch.orders.len(), "submitting batch");

        let orders: Vec<OrderSpec> = batch
            .orders
            .into_iter()
            .map(|mut spec| {
                if let Some(priority) = batch.priority {
                    spec.priority = priority;
                }
                spec
            })
            .collect();

        if batch.sequential {
            let mut results = Vec::with_capacity(orders.len());
            for spec in orders {
                let result = self.submit_and_wait(spec).await;
                let failed = !result.success;
                results.push(result);
                if failed && batch.atomic {
                    warn!(batch_id = %batch_id, "atomic batch aborted on failure");
                    break;
                }
            }
            results
        } else {
            let tickets: Vec<OrderTicket> =
                orders.into_iter().map(|spec| self.submit_order(spec)).collect();
            let mut results = Vec::with_capacity(tickets.len());
            for ticket in tickets {
                results.push(ticket.wait().await);
            }
            results
        }
    }

    /// Remove a still-pending order. Executing orders are not interruptible.
    pub fn cancel_pending(&self, order_id: &str) -> bool {
        let mut heap = self.heap.lock();
        let mut entries: Vec<QueueEntry> = std::mem::take(&mut *heap).into_vec();
        let position = entries.iter().position(|e| e.order.id == order_id);
        let found = match position {
            Some(idx) => {
                let mut entry = entries.swap_remove(idx);
                entry.order.status = OrderStatus::Cancelled;
                entry.order.completed_at_ms = Some(now_ms());
                let result = OrderResult {
                    order_id: entry.order.id.clone(),
                    success: false,
                    tx_hash: None,
                    venue_order_id: None,
                    filled_size: None,
                    filled_price: None,
                    fee: 0.0,
                    error: Some("cancelled before execution".into()),
                };
                self.archive(entry.order);
                let _ = entry.responder.send(result);
                self.stats.lock().cancelled += 1;
                if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                    self.idle.notify_waiters();
                }
                true
            }
            None => false,
        };
        *heap = entries.into_iter().collect();
        found
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub async fn wait_until_idle(&self) {
        loop {
            if self.pending_count() == 0 {
                return;
            }
            let notified = self.idle.notified();
            if self.pending_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> OrderQueueStats {
        self.stats.lock().clone()
    }

    pub fn status(&self) -> OrderQueueStatus {
        OrderQueueStatus {
            running: self.is_running(),
            pending: self.pending_count(),
            completed: self.completed.lock().len(),
            stats: self.stats(),
        }
    }

    pub fn recent_completed(&self, limit: usize) -> Vec<Order> {
        let completed = self.completed.lock();
        completed.iter().rev().take(limit).cloned().collect()
    }

    async fn execute_entry(&self, entry: QueueEntry) {
        let QueueEntry {
            mut order,
            responder,
            ..
        } = entry;
        order.status = OrderStatus::Executing;
        order.started_at_ms = Some(now_ms());

        let result = loop {
            let attempt =
                tokio::time::timeout(ORDER_EXECUTION_TIMEOUT, self.execute_order(&order)).await;
            let outcome = match attempt {
                Ok(outcome) => outcome,
                Err(_) => Err(EngineError::Transport("order execution timeout".into())),
            };
            match outcome {
                Ok(filled) => break Ok(filled),
                Err(err) => {
                    // Retry the same order in place; it is never re-enqueued.
                    if order.retry_count < order.max_retries {
                        order.retry_count += 1;
                        warn!(
                            order_id = %order.id,
                            kind = order.kind.as_str(),
                            retry = order.retry_count,
                            error = %err,
                            "order retry"
                        );
                        continue;
                    }
                    break Err(err);
                }
            }
        };

        order.completed_at_ms = Some(now_ms());
        let result = match result {
            Ok(filled) => {
                order.status = OrderStatus::Success;
                order.tx_hash = filled.tx_hash.clone();
                order.venue_order_id = filled.venue_order_id.clone();
                order.filled_size = filled.filled_size;
                order.filled_price = filled.filled_price;
                self.account_success(&order, filled.fee);
                OrderResult {
                    order_id: order.id.clone(),
                    success: true,
                    ..filled
                }
            }
            Err(err) => {
                order.status = OrderStatus::Failed;
                order.error = Some(err.to_string());
                self.stats.lock().failed += 1;
                OrderResult {
                    order_id: order.id.clone(),
                    success: false,
                    tx_hash: None,
                    venue_order_id: None,
                    filled_size: None,
                    filled_price: None,
                    fee: 0.0,
                    error: Some(err.to_string()),
                }
            }
        };

        self.archive(order);
        let _ = responder.send(result);
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Route by order type to the contract capability or the venue book.
    async fn execute_order(&self, order: &Order) -> Result<OrderResult, EngineError> {
        match order.kind {
            OrderKind::Mint | OrderKind::Merge => {
                let outcome_count = order.outcome_count.ok_or_else(|| {
                    EngineError::DomainReject("mint/merge requires outcome_count".into())
                })?;
                let result = if order.kind == OrderKind::Mint {
                    self.contract
                        .mint_tokens(&order.condition_id, order.size, outcome_count)
                        .await
                } else {
                    self.contract
                        .merge_tokens(&order.condition_id, order.size, outcome_count)
                        .await
                };
                if result.success {
                    Ok(OrderResult {
                        order_id: order.id.clone(),
                        success: true,
                        tx_hash: result.tx_hash,
                        venue_order_id: None,
                        filled_size: Some(order.size),
                        filled_price: None,
                        fee: 0.0,
                        error: None,
                    })
                } else {
                    let message = result.error.unwrap_or_else(|| "contract call failed".into());
                    if message.contains("signing unavailable") {
                        Err(EngineError::SigningUnavailable)
                    } else {
                        Err(EngineError::Conflict(message))
                    }
                }
            }
            OrderKind::Buy | OrderKind::Sell => {
                let token_id = order.token_id.clone().ok_or_else(|| {
                    EngineError::DomainReject("trade order requires token_id".into())
                })?;
                let price = order.price.ok_or_else(|| {
                    EngineError::DomainReject("trade order requires price".into())
                })?;
                let side = order.side.unwrap_or(match order.kind {
                    OrderKind::Sell => OrderSide::Sell,
                    _ => OrderSide::Buy,
                });
                let placement = self
                    .venue
                    .place(
                        CreateOrderArgs {
                            token_id,
                            side,
                            price,
                            size: order.size,
                            order_type: OrderType::Gtc,
                            expiration: None,
                        },
                        CreateOrderOptions {
                            tick_size: order.tick_size,
                            neg_risk: order.neg_risk,
                        },
                    )
                    .await?;
                if placement.success {
                    Ok(OrderResult {
                        order_id: order.id.clone(),
                        success: true,
                        tx_hash: placement
                            .transactions_hashes
                            .as_ref()
                            .and_then(|h| h.first().cloned()),
                        venue_order_id: placement.order_id,
                        filled_size: Some(order.size),
                        filled_price: Some(price),
                        fee: price * order.size * self.fee_rate,
                        error: None,
                    })
                } else {
                    Err(EngineError::Conflict(
                        placement.error_msg.unwrap_or_else(|| "order rejected".into()),
                    ))
                }
            }
            OrderKind::Cancel => {
                let venue_order_id = order.venue_order_id.clone().ok_or_else(|| {
                    EngineError::DomainReject("cancel requires venue order id".into())
                })?;
                self.venue.cancel(&venue_order_id).await?;
                Ok(OrderResult {
                    order_id: order.id.clone(),
                    success: true,
                    tx_hash: None,
                    venue_order_id: Some(venue_order_id),
                    filled_size: None,
                    filled_price: None,
                    fee: 0.0,
                    error: None,
                })
            }
        }
    }

    fn account_success(&self, order: &Order, fee: f64) {
        let mut stats = self.stats.lock();
        stats.succeeded += 1;
        if let Some(filled) = order.filled_size {
            stats.total_volume += filled;
            *stats.volume_by_strategy.entry(order.strategy).or_insert(0.0) += filled;
        }
        stats.total_fees += fee;
    }

    fn archive(&self, order: Order) {
        let mut completed = self.completed.lock();
        if completed.len() >= COMPLETED_REGISTRY_CAP {
            completed.pop_front();
        }
        completed.push_back(order);
    }

    /// Fail everything left in the heap when the queue stops.
    fn drain_on_stop(&self) {
        let entries: Vec<QueueEntry> = std::mem::take(&mut *self.heap.lock()).into_vec();
        for mut entry in entries {
            entry.order.status = OrderStatus::Cancelled;
            entry.order.completed_at_ms = Some(now_ms());
            let result = OrderResult {
                order_id: entry.order.id.clone(),
                success: false,
                tx_hash: None,
                venue_order_id: None,
                filled_size: None,
                filled_price: None,
                fee: 0.0,
                error: Some(EngineError::Cancelled.to_string()),
            };
            self.archive(entry.order);
            let _ = entry.responder.send(result);
            self.stats.lock().cancelled += 1;
            if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.idle.notify_waiters();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::clob::OrderPlacement;
    use crate::client::contract::ContractResult;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct MockVenue {
        placed: Mutex<Vec<(String, OrderSide, f64)>>,
        failures_remaining: AtomicU32,
        reject_token: Option<String>,
    }

    impl MockVenue {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                placed: Mutex::new(Vec::new()),
                failures_remaining: AtomicU32::new(0),
                reject_token: None,
            })
        }

        fn failing_first(n: u32) -> Arc<Self> {
            Arc::new(Self {
                placed: Mutex::new(Vec::new()),
                failures_remaining: AtomicU32::new(n),
                reject_token: None,
            })
        }

        fn rejecting(token: &str) -> Arc<Self> {
            Arc::new(Self {
                placed: Mutex::new(Vec::new()),
                failures_remaining: AtomicU32::new(0),
                reject_token: Some(token.to_string()),
            })
        }
    }

    #[async_trait]
    impl VenueOrderApi for MockVenue {
        async fn place(
            &self,
            args: CreateOrderArgs,
            _options: CreateOrderOptions,
        ) -> Result<OrderPlacement, EngineError> {
            if self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(EngineError::ServerBusy(503));
            }
            if self.reject_token.as_deref() == Some(args.token_id.as_str()) {
                return Err(EngineError::Conflict("insufficient balance".into()));
            }
            self.placed
                .lock()
                .push((args.token_id.clone(), args.side, args.price));
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

    struct MockContract;

    #[async_trait]
    impl ContractClient for MockContract {
        async fn mint_tokens(&self, _: &str, _: f64, _: usize) -> ContractResult {
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
            Ok(1_000.0)
        }

        async fn get_token_balance(&self, _: &str) -> Result<f64, EngineError> {
            Ok(0.0)
        }

        fn is_enabled(&self) -> bool {
            true
        }
    }

    fn queue_with(venue: Arc<MockVenue>) -> Arc<OrderQueue> {
        OrderQueue::new(venue, Arc::new(MockContract), 0.015)
    }

    #[tokio::test]
    async fn priority_order_with_fifo_ties() {
        let venue = MockVenue::new();
        let queue = queue_with(venue.clone());

        // Enqueue before starting the consumer so ordering is deterministic.
        let t1 = queue.submit_order(
            OrderSpec::buy(StrategyKind::ArbitrageLong, "c", "low", 0.5, 1.0)
                .with_priority(OrderPriority::Low),
        );
        let t2 = queue.submit_order(
            OrderSpec::buy(StrategyKind::ArbitrageLong, "c", "urgent", 0.5, 1.0)
                .with_priority(OrderPriority::Urgent),
        );
        let t3 = queue.submit_order(
            OrderSpec::buy(StrategyKind::ArbitrageLong, "c", "normal-1", 0.5, 1.0),
        );
        let t4 = queue.submit_order(
            OrderSpec::buy(StrategyKind::ArbitrageLong, "c", "normal-2", 0.5, 1.0),
        );

        queue.start();
        for ticket in [t1, t2, t3, t4] {
            assert!(ticket.wait().await.success);
        }

        let order: Vec<String> = venue.placed.lock().iter().map(|(t, _, _)| t.clone()).collect();
        assert_eq!(order, vec!["urgent", "normal-1", "normal-2", "low"]);
        queue.stop();
    }

    #[tokio::test]
    async fn failed_orders_retry_in_place() {
        let venue = MockVenue::failing_first(2);
        let queue = queue_with(venue.clone());
        queue.start();

        let result = queue
            .submit_and_wait(OrderSpec::buy(
                StrategyKind::ArbitrageLong,
                "c",
                "tok",
                0.5,
                10.0,
            ))
            .await;
        assert!(result.success, "order should succeed after retries");
        assert_eq!(venue.placed.lock().len(), 1);

        let completed = queue.recent_completed(1);
        assert_eq!(completed[0].retry_count, 2);
        assert_eq!(completed[0].status, OrderStatus::Success);
        queue.stop();
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_order() {
        let venue = MockVenue::failing_first(10);
        let queue = queue_with(venue);
        queue.start();

        let mut spec = OrderSpec::buy(StrategyKind::ArbitrageLong, "c", "tok", 0.5, 10.0);
        spec.max_retries = Some(2);
        let result = queue.submit_and_wait(spec).await;
        assert!(!result.success);
        let completed = queue.recent_completed(1);
        assert_eq!(completed[0].status, OrderStatus::Failed);
        assert_eq!(completed[0].retry_count, 2);
        queue.stop();
    }

    #[tokio::test]
    async fn atomic_sequential_batch_stops_on_failure() {
        let venue = MockVenue::rejecting("bad");
        let queue = queue_with(venue.clone());
        queue.start();

        let mut bad = OrderSpec::buy(StrategyKind::MintSplit, "c", "bad", 0.5, 1.0);
        bad.max_retries = Some(0);
        let results = queue
            .submit_batch(BatchSpec {
                batch_id: None,
                orders: vec![
                    OrderSpec::sell(StrategyKind::MintSplit, "c", "ok-1", 0.5, 1.0),
                    bad,
                    OrderSpec::sell(StrategyKind::MintSplit, "c", "ok-2", 0.5, 1.0),
                ],
                priority: None,
                atomic: true,
                sequential: true,
            })
            .await;

        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert!(!results[1].success);
        // Third order never executed.
        assert_eq!(venue.placed.lock().len(), 1);
        queue.stop();
    }

    #[tokio::test]
    async fn mint_routes_to_contract_and_accounts_volume() {
        let venue = MockVenue::new();
        let queue = queue_with(venue);
        queue.start();

        let result = queue
            .submit_and_wait(OrderSpec::mint(StrategyKind::MintSplit, "c1", 100.0, 3))
            .await;
        assert!(result.success);
        assert_eq!(result.tx_hash.as_deref(), Some("0xmint"));

        let sell = queue
            .submit_and_wait(OrderSpec::sell(StrategyKind::MintSplit, "c1", "tok", 0.40, 100.0))
            .await;
        assert!(sell.success);
        assert!((sell.fee - 0.40 * 100.0 * 0.015).abs() < 1e-9);

        let stats = queue.stats();
        assert_eq!(stats.succeeded, 2);
        assert!((stats.total_volume - 200.0).abs() < 1e-9);
        assert!(
            (stats.volume_by_strategy[&StrategyKind::MintSplit] - 200.0).abs() < 1e-9
        );
        queue.wait_until_idle().await;
        queue.stop();
    }

    #[tokio::test]
    async fn completed_registry_is_capped() {
        let venue = MockVenue::new();
        let queue = queue_with(venue);
        queue.start();

        for i in 0..(COMPLETED_REGISTRY_CAP + 5) {
            let _ = queue
                .submit_and_wait(OrderSpec::buy(
                    StrategyKind::ArbitrageLong,
                    "c",
                    format!("t{}", i),
                    0.5,
                    1.0,
                ))
                .await;
        }
        assert_eq!(queue.status().completed, COMPLETED_REGISTRY_CAP);
        queue.stop();
    }
}
